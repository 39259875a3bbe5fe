//! Deferred task queue
//!
//! Work deferred here runs after the current synchronous unit of work, when
//! the owner calls [`TaskQueue::flush`]. Batched view updates use it so that
//! several data writes in one step produce a single resolve pass.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

type Task = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` and wake whoever is waiting in [`notified`](Self::notified)
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        self.tasks.lock().push_back(Box::new(task));
        self.notify.notify_one();
    }

    /// Run queued tasks (including ones queued while flushing); returns how many ran
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        loop {
            // Lock released before the task runs so it may defer more work
            let task = self.tasks.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        if ran > 0 {
            trace!(ran, "flushed deferred tasks");
        }
        ran
    }

    /// Resolves once something has been deferred since the last wake-up
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("pending", &self.len()).finish()
    }
}
