use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::app::ports::{FailureLogPort, SourceUpdatePort};
use crate::batch::Batch;
use crate::cipher::{self, CipherContext};
use crate::error::PublishError;
use crate::metrics::ProducerMetrics;
use crate::types::{CauseTag, RawMessage, RouteIdentity, TaskStatus, UpdateMode, UpdateTask};

/// Knobs for how a batch reaches the source
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProduceOptions {
    /// Append by default; replace wipes the source's existing instances
    pub mode: UpdateMode,
    /// Skip the remote call when nothing decoded
    pub skip_empty_batches: bool,
    /// Block until the remote task reports completion. A produce call can then
    /// take up to the HTTP timeout plus every task poll.
    pub wait_for_task: bool,
}

/// Outcome of one produce call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProduceReport {
    pub received: usize,
    pub decoded: usize,
    pub decode_failures: usize,
    pub task: Option<UpdateTask>,
    pub publish_error: Option<String>,
    pub skipped: bool,
}

impl ProduceReport {
    pub fn published(&self) -> bool {
        self.task.is_some() && self.publish_error.is_none()
    }
}

/// Decodes raw sensor messages and forwards them to a Deep Intelligence source
pub struct DeepintProducer {
    route: RouteIdentity,
    cipher: Option<CipherContext>,
    source: Arc<dyn SourceUpdatePort>,
    failures: Arc<dyn FailureLogPort>,
    options: ProduceOptions,
}

impl DeepintProducer {
    pub fn new(
        route: RouteIdentity,
        cipher: Option<CipherContext>,
        source: Arc<dyn SourceUpdatePort>,
        failures: Arc<dyn FailureLogPort>,
        options: ProduceOptions,
    ) -> Self {
        Self {
            route,
            cipher,
            source,
            failures,
            options,
        }
    }

    pub fn route(&self) -> &RouteIdentity {
        &self.route
    }

    /// Decode, batch and publish `messages`.
    ///
    /// Never fails: decode and publish errors go to the failure log and the
    /// returned report.
    #[instrument(skip_all, fields(source_id = %self.route.source_id, count = messages.len()))]
    pub async fn produce(&self, messages: &[RawMessage]) -> ProduceReport {
        ProducerMetrics::messages_received(messages.len());
        let mut report = ProduceReport {
            received: messages.len(),
            ..Default::default()
        };

        let batch = self.decode_all(messages, &mut report).await;
        report.decoded = batch.len();

        if batch.is_empty() && self.options.skip_empty_batches {
            debug!("no records decoded, skipping source update");
            report.skipped = true;
            return report;
        }

        info!(
            "publishing {} messages to source {}",
            batch.len(),
            self.route.source_id
        );
        match self.publish(&batch).await {
            Ok(task) => {
                ProducerMetrics::records_published(batch.len());
                info!(task_id = %task.task_id, "finished message producing successfully");
                report.task = Some(task);
            }
            Err(e) => {
                ProducerMetrics::publish_failed();
                self.failures
                    .record(CauseTag::Produce, &batch.to_json(), &self.route)
                    .await;
                warn!(error = %e, "Exception during Deep Intelligence source update");
                if let PublishError::TaskFailed { task_id, .. } = &e {
                    report.task = Some(UpdateTask {
                        task_id: task_id.clone(),
                    });
                }
                report.publish_error = Some(e.to_string());
            }
        }

        report
    }

    async fn decode_all(&self, messages: &[RawMessage], report: &mut ProduceReport) -> Batch {
        let mut records = Vec::with_capacity(messages.len());
        let mut first_error = None;

        for message in messages {
            match cipher::decode(message, self.cipher.as_ref()) {
                Ok(record) => records.push(record),
                Err(e) => {
                    ProducerMetrics::decode_failed();
                    report.decode_failures += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            // the whole input list is logged, not only the offending messages
            let payload = serde_json::Value::from(messages.to_vec()).to_string();
            self.failures
                .record(CauseTag::Cipher, &payload, &self.route)
                .await;
            warn!(
                error = %e,
                failed = report.decode_failures,
                "Exception during message decrypt process"
            );
        }

        Batch::from_records(records)
    }

    async fn publish(&self, batch: &Batch) -> Result<UpdateTask, PublishError> {
        let started = Instant::now();
        let task = self
            .source
            .update_instances(&self.route, batch, self.options.mode)
            .await;
        ProducerMetrics::publish_duration(started.elapsed().as_secs_f64());
        let task = task?;

        if !self.options.wait_for_task {
            return Ok(task);
        }

        match self.source.resolve_task(&self.route, &task).await? {
            TaskStatus::Success => Ok(task),
            TaskStatus::Failed(message) => Err(PublishError::TaskFailed {
                task_id: task.task_id,
                message,
            }),
            TaskStatus::Pending => Err(PublishError::TaskTimeout(task.task_id)),
        }
    }
}
