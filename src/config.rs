use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::app::produce_use_case::ProduceOptions;
use crate::cipher::CipherContext;
use crate::constants::{
    DEFAULT_CLIENT_ID_PREFIX, DEFAULT_DEEPINT_API_URL, DEFAULT_KEY_SIZE, DEFAULT_MQTT_PORT,
    ERRORED_MESSAGES_FILE,
};
use crate::error::{ConnectorError, Result};
use crate::types::RouteIdentity;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub deepint: DeepintConfig,
    #[serde(default)]
    pub cipher: CipherConfig,
    #[serde(default)]
    pub producer: ProduceOptions,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub failure_log: FailureLogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Clone, Deserialize)]
pub struct DeepintConfig {
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_seconds: u64,
    #[serde(default = "default_task_poll_interval_ms")]
    pub task_poll_interval_ms: u64,
    #[serde(default = "default_task_poll_attempts")]
    pub task_poll_attempts: u32,
}

impl Default for DeepintConfig {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            organization_id: String::new(),
            workspace_id: String::new(),
            source_id: String::new(),
            api_url: default_api_url(),
            timeout_seconds: default_timeout_secs(),
            task_poll_interval_ms: default_task_poll_interval_ms(),
            task_poll_attempts: default_task_poll_attempts(),
        }
    }
}

impl std::fmt::Debug for DeepintConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepintConfig")
            .field("auth_token", &"<redacted>")
            .field("organization_id", &self.organization_id)
            .field("workspace_id", &self.workspace_id)
            .field("source_id", &self.source_id)
            .field("api_url", &self.api_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("task_poll_interval_ms", &self.task_poll_interval_ms)
            .field("task_poll_attempts", &self.task_poll_attempts)
            .finish()
    }
}

impl DeepintConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }
}

#[derive(Clone, Deserialize)]
pub struct CipherConfig {
    /// Absent means payloads are plain JSON
    pub key: Option<String>,
    #[serde(default = "default_key_size")]
    pub key_size: usize,
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            key: None,
            key_size: DEFAULT_KEY_SIZE,
        }
    }
}

impl std::fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherConfig")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("key_size", &self.key_size)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub topic: String,
    pub qos: u8,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// Messages buffered before a produce call
    pub max_batch_size: usize,
    /// Flush a partial buffer after this long
    pub flush_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    /// 0 retries forever
    pub max_reconnect_attempts: u32,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_MQTT_PORT,
            client_id: None,
            topic: String::new(),
            qos: 1,
            username: None,
            password: None,
            keep_alive_secs: 30,
            max_batch_size: 1,
            flush_interval_ms: 1000,
            reconnect_delay_ms: 5000,
            max_reconnect_attempts: 0,
        }
    }
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

impl MqttConfig {
    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", DEFAULT_CLIENT_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn qos(&self) -> Result<rumqttc::QoS> {
        match self.qos {
            0 => Ok(rumqttc::QoS::AtMostOnce),
            1 => Ok(rumqttc::QoS::AtLeastOnce),
            2 => Ok(rumqttc::QoS::ExactlyOnce),
            other => Err(ConnectorError::Config(format!("invalid MQTT QoS {}", other))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FailureLogConfig {
    pub path: String,
}

impl Default for FailureLogConfig {
    fn default() -> Self {
        Self {
            path: ERRORED_MESSAGES_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
    pub file_name: String,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            file_name: "connector.log".to_string(),
            filter: "co2_mqtt_deepint_connector=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub listen_addr: Option<SocketAddr>,
}

fn default_api_url() -> String {
    DEFAULT_DEEPINT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_task_poll_interval_ms() -> u64 {
    1000
}

fn default_task_poll_attempts() -> u32 {
    60
}

fn default_key_size() -> usize {
    DEFAULT_KEY_SIZE
}

impl Config {
    /// Read `path`, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)?;
            Self::from_toml_str(&content)?
        } else {
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override values from `lookup`, typically the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, name: &str| {
            if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
                *target = value;
            }
        };
        set(&mut self.deepint.auth_token, "DEEPINT_AUTH_TOKEN");
        set(&mut self.deepint.organization_id, "DEEPINT_ORGANIZATION_ID");
        set(&mut self.deepint.workspace_id, "DEEPINT_WORKSPACE_ID");
        set(&mut self.deepint.source_id, "DEEPINT_SOURCE_ID");
        set(&mut self.deepint.api_url, "DEEPINT_API_URL");
        set(&mut self.mqtt.host, "MQTT_HOST");
        set(&mut self.mqtt.topic, "MQTT_TOPIC");
        set(&mut self.failure_log.path, "FAILURE_LOG_PATH");

        if let Some(key) = lookup("CIPHER_KEY").filter(|v| !v.is_empty()) {
            self.cipher.key = Some(key);
        }
        if let Some(size) = lookup("CIPHER_KEY_SIZE").and_then(|v| v.trim().parse().ok()) {
            self.cipher.key_size = size;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|v| v.trim().parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(username) = lookup("MQTT_USERNAME").filter(|v| !v.is_empty()) {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD").filter(|v| !v.is_empty()) {
            self.mqtt.password = Some(password);
        }
    }

    /// Check everything a produce call needs.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("deepint.auth_token", &self.deepint.auth_token),
            ("deepint.organization_id", &self.deepint.organization_id),
            ("deepint.workspace_id", &self.deepint.workspace_id),
            ("deepint.source_id", &self.deepint.source_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConnectorError::Config(format!("{} is required", name)));
            }
        }
        self.cipher_context()?;
        Ok(())
    }

    /// Additional checks for the MQTT subscriber.
    pub fn validate_for_serve(&self) -> Result<()> {
        self.validate()?;
        if self.mqtt.topic.trim().is_empty() {
            return Err(ConnectorError::Config("mqtt.topic is required".to_string()));
        }
        if self.mqtt.max_batch_size == 0 {
            return Err(ConnectorError::Config(
                "mqtt.max_batch_size must be at least 1".to_string(),
            ));
        }
        self.mqtt.qos()?;
        Ok(())
    }

    pub fn route(&self) -> RouteIdentity {
        RouteIdentity::new(
            self.deepint.organization_id.clone(),
            self.deepint.workspace_id.clone(),
            self.deepint.source_id.clone(),
        )
    }

    pub fn cipher_context(&self) -> Result<Option<CipherContext>> {
        match &self.cipher.key {
            Some(key) => Ok(Some(CipherContext::new(key, self.cipher.key_size)?)),
            None => Ok(None),
        }
    }
}
