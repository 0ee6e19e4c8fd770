pub mod deepint_client;
pub mod failure_log;

pub use deepint_client::{DeepintCredentials, DeepintSourceClient};
pub use failure_log::{CsvFailureLog, FailureRecord};
