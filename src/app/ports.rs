use async_trait::async_trait;

use crate::batch::Batch;
use crate::error::PublishError;
use crate::types::{CauseTag, RouteIdentity, TaskStatus, UpdateMode, UpdateTask};

/// Remote data source accepting tabular updates.
#[async_trait]
pub trait SourceUpdatePort: Send + Sync {
    /// Issue one update call carrying the whole batch.
    async fn update_instances(
        &self,
        route: &RouteIdentity,
        batch: &Batch,
        mode: UpdateMode,
    ) -> Result<UpdateTask, PublishError>;

    /// Wait for the remote task started by `update_instances` to finish.
    async fn resolve_task(
        &self,
        route: &RouteIdentity,
        task: &UpdateTask,
    ) -> Result<TaskStatus, PublishError>;
}

/// Durable record of failed produce calls. Implementations must not fail the caller.
#[async_trait]
pub trait FailureLogPort: Send + Sync {
    async fn record(&self, cause: CauseTag, payload: &str, route: &RouteIdentity);
}
