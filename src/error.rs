use thiserror::Error;

/// Failures while turning a raw MQTT payload into a record.
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("cipher key is {actual} bytes, at least {expected} required")]
    Key { expected: usize, actual: usize },

    #[error("unsupported AES key size {0} (expected 16, 24 or 32)")]
    UnsupportedKeySize(usize),

    #[error("ciphertext length {0} is not a multiple of the AES block size")]
    BlockAlignment(usize),

    #[error("decrypted payload is not ASCII text")]
    Encoding,

    #[error("no JSON object delimiters in decrypted payload")]
    Format,

    #[error("JSON parsing failed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("payload is valid JSON but not an object")]
    NotAnObject,
}

/// Failures while updating the remote source.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("source update rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("remote task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    #[error("remote task {0} did not finish in time")]
    TaskTimeout(String),

    #[error("batch serialization failed: {0}")]
    Serialize(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cipher setup failed: {0}")]
    Cipher(#[from] CipherError),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
