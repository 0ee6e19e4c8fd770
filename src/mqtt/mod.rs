mod subscriber;

pub use subscriber::{forward_messages, run_subscriber};

use crate::types::RawMessage;

/// Payloads waiting for the next produce call, in arrival order.
#[derive(Debug)]
pub struct MessageBuffer {
    max_batch_size: usize,
    pending: Vec<RawMessage>,
}

impl MessageBuffer {
    pub fn new(max_batch_size: usize) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            max_batch_size,
            pending: Vec::with_capacity(max_batch_size),
        }
    }

    /// Buffer `message`; returns true once the buffer should be flushed.
    pub fn push(&mut self, message: RawMessage) -> bool {
        self.pending.push(message);
        self.pending.len() >= self.max_batch_size
    }

    pub fn drain(&mut self) -> Vec<RawMessage> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// MQTT payloads are bytes; invalid UTF-8 is replaced so the decoder reports it.
pub fn payload_to_message(payload: &[u8]) -> RawMessage {
    String::from_utf8_lossy(payload).into_owned()
}
