//! Cancellable delayed tasks used for stage transitions.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::{runtime::Handle, task::JoinHandle};

use crate::error::SchedulingError;

/// A pending delayed task. Cancelling aborts it if it has not run yet.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

pub trait StageScheduler: Send + Sync {
    fn schedule(
        &self,
        delay: Duration,
        task: BoxFuture<'static, ()>,
    ) -> Result<ScheduledTask, SchedulingError>;
}

/// Runs each task on the current tokio runtime after `delay`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl StageScheduler for TokioScheduler {
    fn schedule(
        &self,
        delay: Duration,
        task: BoxFuture<'static, ()>,
    ) -> Result<ScheduledTask, SchedulingError> {
        let runtime = Handle::try_current().map_err(|_| SchedulingError::NoRuntime)?;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        Ok(ScheduledTask::new(handle))
    }
}
