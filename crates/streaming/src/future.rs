//! Single-assignment awaitable result cell
//!
//! A `WsFuture` is settled from the outside (`resolve` / `reject`) and can be
//! awaited by any number of clones. The first settlement wins; later calls
//! are no-ops. Awaiting after settlement yields the stored outcome
//! immediately.

use crate::errors::{ExchangeError, Result};
use futures::channel::oneshot;
use futures::future::{FutureExt, Map, Shared};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

type Received<T> = std::result::Result<Result<T>, oneshot::Canceled>;
type Settled<T> = Shared<Map<oneshot::Receiver<Result<T>>, fn(Received<T>) -> Result<T>>>;

enum Slot<T> {
    Pending(oneshot::Sender<Result<T>>),
    Settled(Result<T>),
}

fn flatten<T>(received: Received<T>) -> Result<T> {
    received.unwrap_or_else(|_| {
        Err(ExchangeError::NetworkError(
            "future dropped before it was settled".to_string(),
        ))
    })
}

/// Externally settled, cloneable future
pub struct WsFuture<T: Clone> {
    slot: Rc<RefCell<Slot<T>>>,
    settled: Settled<T>,
}

impl<T: Clone> WsFuture<T> {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        let settle: fn(Received<T>) -> Result<T> = flatten::<T>;
        Self {
            slot: Rc::new(RefCell::new(Slot::Pending(sender))),
            settled: receiver.map(settle).shared(),
        }
    }

    /// Future that is already rejected with `error`
    pub fn rejected(error: ExchangeError) -> Self {
        let future = Self::new();
        future.reject(error);
        future
    }

    /// Returns false if the future had already been settled
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Returns false if the future had already been settled
    pub fn reject(&self, error: ExchangeError) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Result<T>) -> bool {
        let mut slot = self.slot.borrow_mut();
        if let Slot::Settled(_) = &*slot {
            return false;
        }
        match std::mem::replace(&mut *slot, Slot::Settled(outcome.clone())) {
            Slot::Pending(sender) => {
                // All receivers may be gone; the stored outcome still serves peek()
                let _ = sender.send(outcome);
                true
            }
            Slot::Settled(_) => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.slot.borrow(), Slot::Settled(_))
    }

    /// Settled outcome, if any, without awaiting
    pub fn peek(&self) -> Option<Result<T>> {
        match &*self.slot.borrow() {
            Slot::Settled(outcome) => Some(outcome.clone()),
            Slot::Pending(_) => None,
        }
    }

    /// True if both handles refer to the same cell
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T: Clone> Clone for WsFuture<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
            settled: self.settled.clone(),
        }
    }
}

impl<T: Clone> Default for WsFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> std::fmt::Debug for WsFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsFuture")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl<T: Clone> Future for WsFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().settled.poll_unpin(cx)
    }
}
