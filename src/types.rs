use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload as delivered by the broker: plain JSON, or base64 of AES-ECB ciphertext.
pub type RawMessage = String;

/// One sensor reading, always a JSON object.
pub type DecodedRecord = serde_json::Map<String, serde_json::Value>;

/// Destination of every update issued by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteIdentity {
    pub organization_id: String,
    pub workspace_id: String,
    pub source_id: String,
}

impl RouteIdentity {
    pub fn new(
        organization_id: impl Into<String>,
        workspace_id: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            workspace_id: workspace_id.into(),
            source_id: source_id.into(),
        }
    }
}

/// Stage at which a produce call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CauseTag {
    Cipher,
    Produce,
}

impl CauseTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CauseTag::Cipher => "CIPHER",
            CauseTag::Produce => "PRODUCE",
        }
    }
}

impl fmt::Display for CauseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    Replace,
    #[default]
    Append,
}

impl UpdateMode {
    pub fn replace(&self) -> bool {
        matches!(self, UpdateMode::Replace)
    }
}

/// Handle to the asynchronous task the source update started remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTask {
    pub task_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Success,
    Failed(String),
}
