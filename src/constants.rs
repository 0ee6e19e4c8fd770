/// Defaults shared by configuration, the cipher and the adapters

pub const DEFAULT_KEY_SIZE: usize = 16;
pub const AES_BLOCK_SIZE: usize = 16;

pub const DEFAULT_DEEPINT_API_URL: &str = "https://app.deepint.net/api/v1";
pub const DEEPINT_AUTH_HEADER: &str = "x-auth-token";
pub const DEEPINT_ORGANIZATION_HEADER: &str = "x-deepint-organization";

pub const ERRORED_MESSAGES_FILE: &str = "errored_messages.csv";
pub const FAILURE_LOG_COLUMNS: [&str; 6] =
    ["date", "cause", "organization", "workspace", "source", "message"];
pub const FAILURE_LOG_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
/// Payloads received but not yet handed to a produce call
pub const MESSAGE_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "co2-deepint-connector";
