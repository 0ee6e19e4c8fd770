pub mod batch;
pub mod cipher;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod mqtt;
pub mod types;

// Application layer and its adapters
pub mod app;
pub mod infra;

pub use app::produce_use_case::{DeepintProducer, ProduceOptions, ProduceReport};
pub use batch::Batch;
pub use cipher::{decode, CipherContext};
pub use types::{CauseTag, DecodedRecord, RawMessage, RouteIdentity, UpdateMode};
