//! Queue elements and the waiter protocol.
//!
//! A [`QueueElement`] is the producer's handle on one submitted
//! transaction. The appender completes a drained batch either by handing the
//! whole outcome to the first element of the batch, whose waiter then wakes
//! the siblings ([`NotifyMode::FirstWaiter`]), or by committing every
//! element itself ([`NotifyMode::Direct`]). Either way each element reaches
//! exactly one terminal state.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::append_index::AppendIndex;
use crate::error::{AppendError, Result};
use crate::transaction::StorageTransaction;

/// How the appender wakes the waiters of a completed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyMode {
    /// Wake only the first element; its waiter wakes the rest.
    #[default]
    FirstWaiter,
    /// The appender wakes every element.
    Direct,
}

pub(crate) type Sibling = (Arc<ElementInner>, AppendIndex);

enum ElementState {
    Pending {
        /// The producer dropped its handle before completion.
        abandoned: bool,
    },
    HandedOff {
        own: AppendIndex,
        siblings: Vec<Sibling>,
    },
    Committed(AppendIndex),
    Failed(AppendError),
}

pub(crate) struct ElementInner {
    transaction: Mutex<StorageTransaction>,
    state: Mutex<ElementState>,
    ready: Condvar,
}

impl ElementInner {
    pub(crate) fn new(transaction: StorageTransaction) -> Arc<Self> {
        Arc::new(Self {
            transaction: Mutex::new(transaction),
            state: Mutex::new(ElementState::Pending { abandoned: false }),
            ready: Condvar::new(),
        })
    }

    pub(crate) fn transaction(&self) -> parking_lot::MutexGuard<'_, StorageTransaction> {
        self.transaction.lock()
    }

    /// Complete with `append_index` and wake the waiter.
    pub(crate) fn commit(&self, append_index: AppendIndex) {
        let mut state = self.state.lock();
        debug_assert!(matches!(*state, ElementState::Pending { .. }));
        *state = ElementState::Committed(append_index);
        drop(state);
        self.ready.notify_all();
    }

    /// Complete as the first element of a batch, passing on the siblings.
    ///
    /// When nobody is left to wait on this element the siblings are woken
    /// right here.
    pub(crate) fn hand_off(&self, own: AppendIndex, siblings: Vec<Sibling>) {
        let mut state = self.state.lock();
        if let ElementState::Pending { abandoned: true } = *state {
            *state = ElementState::Committed(own);
            drop(state);
            fan_out(siblings);
            return;
        }
        *state = ElementState::HandedOff { own, siblings };
        drop(state);
        self.ready.notify_all();
    }

    /// Fail with `err` and wake the waiter.
    pub(crate) fn fail(&self, err: AppendError) {
        let mut state = self.state.lock();
        debug_assert!(matches!(*state, ElementState::Pending { .. }));
        *state = ElementState::Failed(err);
        drop(state);
        self.ready.notify_all();
    }

    /// Move out of a hand-off, returning the siblings still to be woken.
    fn take_hand_off(state: &mut ElementState) -> Option<(AppendIndex, Vec<Sibling>)> {
        let ElementState::HandedOff { own, .. } = *state else {
            return None;
        };
        match mem::replace(state, ElementState::Committed(own)) {
            ElementState::HandedOff { own, siblings } => Some((own, siblings)),
            _ => None,
        }
    }

    fn outcome(state: &ElementState) -> Option<Result<AppendIndex>> {
        match state {
            ElementState::Committed(index) => Some(Ok(*index)),
            ElementState::Failed(err) => Some(Err(err.clone())),
            ElementState::Pending { .. } | ElementState::HandedOff { .. } => None,
        }
    }
}

fn fan_out(siblings: Vec<Sibling>) {
    for (sibling, append_index) in siblings {
        sibling.commit(append_index);
    }
}

/// Producer handle on a submitted transaction.
///
/// Dropping the handle without waiting is allowed; completion still reaches
/// every other element of the batch.
pub struct QueueElement {
    inner: Arc<ElementInner>,
}

impl QueueElement {
    pub(crate) fn new(inner: Arc<ElementInner>) -> Self {
        Self { inner }
    }

    /// Block until the transaction is appended and forced.
    ///
    /// Returns the append index of the last chunk of the transaction, or the
    /// error that failed its batch. Repeated calls return the same outcome.
    pub fn committed_append_index(&self) -> Result<AppendIndex> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some((own, siblings)) = ElementInner::take_hand_off(&mut state) {
                drop(state);
                fan_out(siblings);
                return Ok(own);
            }
            if let Some(outcome) = ElementInner::outcome(&state) {
                return outcome;
            }
            self.inner.ready.wait(&mut state);
        }
    }

    /// Like [`committed_append_index`](Self::committed_append_index), giving
    /// up after `timeout`.
    ///
    /// Returns `None` when the element is still pending.
    pub fn committed_append_index_timeout(&self, timeout: Duration) -> Option<Result<AppendIndex>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some((own, siblings)) = ElementInner::take_hand_off(&mut state) {
                drop(state);
                fan_out(siblings);
                return Some(Ok(own));
            }
            if let Some(outcome) = ElementInner::outcome(&state) {
                return Some(outcome);
            }
            if self.inner.ready.wait_until(&mut state, deadline).timed_out() {
                if let Some((own, siblings)) = ElementInner::take_hand_off(&mut state) {
                    drop(state);
                    fan_out(siblings);
                    return Some(Ok(own));
                }
                return ElementInner::outcome(&state);
            }
        }
    }

    /// Check if the element reached a terminal state
    pub fn is_done(&self) -> bool {
        !matches!(
            *self.inner.state.lock(),
            ElementState::Pending { .. }
        )
    }

    /// Inspect the transaction, including the [`AppendedChunk`] records of
    /// a committed append.
    ///
    /// [`AppendedChunk`]: crate::transaction::AppendedChunk
    pub fn with_transaction<R>(&self, f: impl FnOnce(&StorageTransaction) -> R) -> R {
        let transaction = self.inner.transaction();
        f(&*transaction)
    }
}

impl Drop for QueueElement {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if let Some((_, siblings)) = ElementInner::take_hand_off(&mut state) {
            drop(state);
            fan_out(siblings);
        } else if let ElementState::Pending { abandoned } = &mut *state {
            *abandoned = true;
        }
    }
}

impl fmt::Debug for QueueElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.lock() {
            ElementState::Pending { .. } => "pending",
            ElementState::HandedOff { .. } => "handed-off",
            ElementState::Committed(_) => "committed",
            ElementState::Failed(_) => "failed",
        };
        f.debug_struct("QueueElement").field("state", &state).finish()
    }
}
