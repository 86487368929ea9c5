//! Reactive state - staged writes, explicit commit, change notification.
//!
//! A [`ReactiveObject`] or [`ReactiveCollection`] holds committed state plus
//! a set of staged changes. Reads see staged values; `commit` folds them in,
//! commits reactive children, and notifies once if anything changed.
//!
//! With a [`FrameScheduler`] attached, writes debounce a commit into the
//! next frame. Nested nodes forward that request to the root of their tree,
//! so the whole tree commits (and notifies) once per frame.

mod collection;
mod object;
mod scheduler;

pub use collection::ReactiveCollection;
pub use object::ReactiveObject;
pub use scheduler::{FrameId, FrameScheduler};

pub(crate) use scheduler::PendingFrame;

use std::cell::Cell;
use std::rc::{Rc, Weak};

use crate::error::{Result, RuntimeError};

/// Notification invoked after a commit that changed something.
pub type CommitCallback = Rc<dyn Fn()>;

// =============================================================================
// Ownership
// =============================================================================

/// Back-link from a nested node to the node holding it.
#[derive(Clone)]
pub(crate) enum Owner {
    Object(Weak<object::ObjectInner>),
    Collection(Weak<collection::CollectionInner>),
}

impl Owner {
    /// Forward a commit request up the tree. A dropped owner swallows it.
    fn schedule_commit(&self) {
        match self {
            Self::Object(weak) => {
                if let Some(inner) = weak.upgrade() {
                    ReactiveObject::from_inner(inner).schedule_commit();
                }
            }
            Self::Collection(weak) => {
                if let Some(inner) = weak.upgrade() {
                    ReactiveCollection::from_inner(inner).schedule_commit();
                }
            }
        }
    }
}

/// Where newly coerced reactive values attach.
#[derive(Clone, Default)]
pub struct CoerceContext {
    scheduler: Option<FrameScheduler>,
    owner: Option<Owner>,
}

impl CoerceContext {
    /// No scheduler and no owner: values only commit when asked to.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Root context that debounces commits on `scheduler`.
    pub fn scheduled(scheduler: FrameScheduler) -> Self {
        Self { scheduler: Some(scheduler), owner: None }
    }

    pub fn scheduler(&self) -> Option<&FrameScheduler> {
        self.scheduler.as_ref()
    }

    fn child(&self, owner: Owner) -> Self {
        Self { scheduler: self.scheduler.clone(), owner: Some(owner) }
    }
}

// =============================================================================
// Commit state
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum CommitState {
    #[default]
    Idle,
    Committing,
}

/// Marks a node as committing until dropped.
pub(crate) struct CommitGuard<'a>(&'a Cell<CommitState>);

impl<'a> CommitGuard<'a> {
    pub(crate) fn enter(state: &'a Cell<CommitState>) -> Result<Self> {
        if state.get() == CommitState::Committing {
            return Err(RuntimeError::ReentrantCommit);
        }
        state.set(CommitState::Committing);
        Ok(Self(state))
    }
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.0.set(CommitState::Idle);
    }
}

/// Relative index into `0..=len`: negatives count from the end.
pub(crate) fn relative_index(index: isize, len: usize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs())
    } else {
        (index as usize).min(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_guard_blocks_reentry() {
        let state = Cell::new(CommitState::Idle);
        let guard = CommitGuard::enter(&state).unwrap();
        assert_eq!(CommitGuard::enter(&state).err(), Some(RuntimeError::ReentrantCommit));
        drop(guard);
        assert_eq!(state.get(), CommitState::Idle);
    }

    #[test]
    fn test_relative_index() {
        assert_eq!(relative_index(-1, 5), 4);
        assert_eq!(relative_index(-9, 5), 0);
        assert_eq!(relative_index(9, 5), 5);
        assert_eq!(relative_index(2, 5), 2);
    }
}
