//! Task executors the aggregator hands its dispatch work to.

use std::fmt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::warn;

/// A unit of dispatch work: one handler invocation for one event.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction over "run this somewhere else, don't wait for it".
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Spawns each task onto a tokio runtime.
///
/// Uses the runtime captured at construction, or the ambient one at
/// submission time. Without any runtime the task runs inline on the caller's
/// thread so that events are never silently lost.
#[derive(Clone, Default)]
pub struct TokioExecutor {
    runtime: Option<Handle>,
}

impl TokioExecutor {
    /// Binds to the current runtime if there is one.
    pub fn new() -> Self {
        Self {
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
        }
    }
}

impl TaskExecutor for TokioExecutor {
    fn execute(&self, task: Task) {
        let runtime = self.runtime.clone().or_else(|| Handle::try_current().ok());
        match runtime {
            Some(runtime) => {
                runtime.spawn(async move { task() });
            }
            None => {
                warn!("⚠️ No tokio runtime available, running event handler inline");
                task();
            }
        }
    }
}

impl fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioExecutor")
            .field("bound", &self.runtime.is_some())
            .finish()
    }
}

/// Runs tasks one at a time, in submission order, on a single tokio task.
///
/// Use it where handlers depend on seeing events in the order they were
/// triggered, e.g. consecutive frames from one connection. The draining task
/// ends once the executor is dropped. Without a runtime at construction,
/// tasks run inline.
pub struct SerialExecutor {
    queue: Option<mpsc::UnboundedSender<Task>>,
}

impl SerialExecutor {
    /// Starts the draining task on the current runtime if there is one.
    pub fn new() -> Self {
        match Handle::try_current() {
            Ok(runtime) => Self::with_handle(runtime),
            Err(_) => Self { queue: None },
        }
    }

    pub fn with_handle(runtime: Handle) -> Self {
        let (queue, mut pending) = mpsc::unbounded_channel::<Task>();
        runtime.spawn(async move {
            while let Some(task) = pending.recv().await {
                task();
            }
        });
        Self { queue: Some(queue) }
    }
}

impl Default for SerialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor for SerialExecutor {
    fn execute(&self, task: Task) {
        let Some(queue) = &self.queue else {
            warn!("⚠️ No tokio runtime available, running event handler inline");
            task();
            return;
        };
        if let Err(mpsc::error::SendError(task)) = queue.send(task) {
            warn!("⚠️ Serial dispatch queue is gone, running event handler inline");
            task();
        }
    }
}

impl fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("bound", &self.queue.is_some())
            .finish()
    }
}

/// Runs every task immediately on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}
