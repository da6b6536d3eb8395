//! Work postponed to the next turn of the broadcasting loop.
//!
//! Consumers defer handler registration here so that routing rules declared
//! right after [`crate::service::BroadcastingConsumer::from_subscription`]
//! are in place before any message is routed. The queue is drained by
//! [`crate::service::BroadcastingManager::pump`] and
//! [`crate::service::BroadcastingManager::run_once`], which it wakes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

use tokio::sync::Notify;

type DeferredTask = Box<dyn FnOnce()>;

/// FIFO of tasks run on the next loop turn.
#[derive(Default)]
pub struct DeferredQueue {
    tasks: RefCell<VecDeque<DeferredTask>>,
    ready: Notify,
}

impl DeferredQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `task` and wakes the loop.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
        self.ready.notify_one();
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Runs the tasks queued so far, in order. Tasks they queue wait for
    /// the next turn. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let due = self.len();
        let mut ran = 0;
        while ran < due {
            let Some(task) = self.tasks.borrow_mut().pop_front() else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    /// Resolves once a task has been queued since the last wake-up.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }
}

impl fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("queued", &self.len())
            .finish_non_exhaustive()
    }
}
