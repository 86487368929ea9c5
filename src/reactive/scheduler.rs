//! Frame scheduler - deferred tasks run once per frame.
//!
//! The host drives frames by calling [`FrameScheduler::run_frame`]. Reactive
//! nodes use it to debounce commits: every write cancels the node's pending
//! frame and requests a new one, so a burst of writes commits once.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Identifier of a requested frame task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

type FrameTask = Box<dyn FnOnce()>;

#[derive(Default)]
struct FrameQueue {
    next_id: u64,
    tasks: VecDeque<(FrameId, FrameTask)>,
}

/// Shared queue of next-frame tasks.
///
/// Cloning shares the queue.
#[derive(Clone, Default)]
pub struct FrameScheduler {
    queue: Rc<RefCell<FrameQueue>>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task for the next frame.
    pub fn request(&self, task: impl FnOnce() + 'static) -> FrameId {
        let mut queue = self.queue.borrow_mut();
        let id = FrameId(queue.next_id);
        queue.next_id += 1;
        queue.tasks.push_back((id, Box::new(task)));
        id
    }

    /// Drop a queued task. Returns false if it already ran or was cancelled.
    pub fn cancel(&self, id: FrameId) -> bool {
        let mut queue = self.queue.borrow_mut();
        match queue.tasks.iter().position(|(queued, _)| *queued == id) {
            Some(pos) => {
                queue.tasks.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.borrow().tasks.len()
    }

    /// Run every task queued before this call, in request order.
    ///
    /// Tasks requested while the frame runs wait for the next frame; a task
    /// cancelled by an earlier task of the same frame does not run.
    /// Returns how many tasks ran.
    pub fn run_frame(&self) -> usize {
        let cutoff = self.queue.borrow().next_id;
        let mut count = 0;
        loop {
            let task = {
                let mut queue = self.queue.borrow_mut();
                let due = queue.tasks.front().is_some_and(|(id, _)| id.0 < cutoff);
                if due {
                    queue.tasks.pop_front()
                } else {
                    None
                }
            };
            let Some((_, task)) = task else { break };
            task();
            count += 1;
        }
        count
    }
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler").field("pending", &self.pending()).finish()
    }
}

/// One debounced frame slot.
#[derive(Debug, Default)]
pub(crate) struct PendingFrame(Cell<Option<FrameId>>);

impl PendingFrame {
    /// Cancel whatever is pending and request `task` instead.
    pub(crate) fn reschedule(&self, scheduler: &FrameScheduler, task: impl FnOnce() + 'static) {
        if let Some(id) = self.0.take() {
            scheduler.cancel(id);
        }
        self.0.set(Some(scheduler.request(task)));
    }

    /// Forget the pending frame (it is running now).
    pub(crate) fn clear(&self) {
        self.0.set(None);
    }
}
