use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

const PENDING: u8 = 0;
const GRANTED: u8 = 1;
const FAILED: u8 = 2;

/// One suspended caller of a queueing algorithm's blocking path.
///
/// A waiter is a one-shot completion plus a `Notify` used to wake the
/// suspended task. Resolution is idempotent: the timer callback and the
/// grant callback race to flip `outcome` away from `PENDING` via a
/// compare-exchange; the loser's call is a no-op. This is the mechanism
/// behind the invariant that a waiter resolved by grant cannot later be
/// failed by its own deadline timer, and vice versa.
pub(crate) struct Waiter {
    outcome: AtomicU8,
    notify: Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaiterOutcome {
    Granted,
    Failed,
}

impl Waiter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: AtomicU8::new(PENDING),
            notify: Notify::new(),
        })
    }

    /// Grant this waiter if it is still pending. Returns `true` if this
    /// call performed the transition.
    pub(crate) fn grant(&self) -> bool {
        self.resolve(GRANTED)
    }

    /// Fail this waiter (deadline expiry or dispose) if still pending.
    /// Returns `true` if this call performed the transition.
    pub(crate) fn fail(&self) -> bool {
        self.resolve(FAILED)
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.outcome.load(Ordering::Acquire) == PENDING
    }

    fn resolve(&self, to: u8) -> bool {
        let won = self
            .outcome
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.notify.notify_one();
        }
        won
    }

    /// Wait until this waiter is resolved and report the outcome.
    pub(crate) async fn wait(&self) -> WaiterOutcome {
        loop {
            let notified = self.notify.notified();
            match self.outcome.load(Ordering::Acquire) {
                GRANTED => return WaiterOutcome::Granted,
                FAILED => return WaiterOutcome::Failed,
                _ => {}
            }
            notified.await;
        }
    }
}
