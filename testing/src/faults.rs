//! Scripted fault injection for the in-memory stores.
//!
//! A [`FaultPlan`] holds, per [`StoreOp`], a queue of [`Fault`]s. Every store call pops
//! the next fault for its operation (if any), so a test can say "the third
//! reservation fails" or "the next release hangs for two seconds". Writes go through
//! [`FaultPlan::run`], which can also apply a write and then report it as failed.
//!
//! ```
//! use boxoffice_testing::faults::{Fault, FaultPlan, StoreOp};
//!
//! let plan = FaultPlan::new();
//! plan.script(StoreOp::TicketReserve, [Fault::Pass, Fault::Fail]);
//! plan.fail_next(StoreOp::OutboxEnqueue, 1);
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use boxoffice_core::StoreError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Store operations that faults can be attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// Ticket reads (`get`, `get_many`, `list_available`, `list_reserved_before`)
    TicketRead,
    /// Ticket writes other than compare-and-set (`create`, `create_batch`, `update_status`, `delete`)
    TicketWrite,
    /// `reserve_if_available`
    TicketReserve,
    /// `transition` (sell / release)
    TicketTransition,
    /// Booking reads (`get`, `list_by_user`, `list_pending_older_than`)
    BookingRead,
    /// Booking `create`
    BookingCreate,
    /// Booking `delete`
    BookingDelete,
    /// Booking `transition_status` and `update_status`
    BookingTransition,
    /// Outbox `enqueue`
    OutboxEnqueue,
    /// Outbox `list_unpublished`
    OutboxRead,
    /// Outbox `mark_published`
    OutboxMark,
    /// Processed-event ledger reads and writes
    Processed,
    /// [`StoreHealth::ping`](boxoffice_core::StoreHealth::ping)
    Ping,
}

/// What happens to one store call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Proceed normally
    Pass,
    /// Fail with [`StoreError::Unavailable`] without touching state
    Fail,
    /// Sleep, then proceed normally
    Delay(Duration),
    /// Apply the write, then fail with [`StoreError::Unavailable`] as if the reply
    /// never arrived. Behaves like [`Fault::Fail`] for reads.
    LoseReply,
}

/// Shared, scripted fault schedule. Cloning shares the schedule.
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    queues: Arc<Mutex<HashMap<StoreOp, VecDeque<Fault>>>>,
}

impl FaultPlan {
    /// Creates a plan with no faults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends faults to the schedule of `op`.
    pub fn script(&self, op: StoreOp, faults: impl IntoIterator<Item = Fault>) {
        self.queues
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .extend(faults);
    }

    /// The next `n` calls of `op` fail.
    pub fn fail_next(&self, op: StoreOp, n: usize) {
        self.script(op, std::iter::repeat_n(Fault::Fail, n));
    }

    /// The next call of `op` sleeps for `delay` before running.
    pub fn delay_next(&self, op: StoreOp, delay: Duration) {
        self.script(op, [Fault::Delay(delay)]);
    }

    /// Drops every pending fault.
    pub fn clear(&self) {
        self.queues.lock().unwrap().clear();
    }

    /// Number of faults still scheduled for `op`.
    #[must_use]
    pub fn pending(&self, op: StoreOp) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(&op)
            .map_or(0, VecDeque::len)
    }

    /// Applies the next scheduled fault for `op` before a read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the scheduled fault is [`Fault::Fail`]
    /// or [`Fault::LoseReply`].
    pub async fn apply(&self, op: StoreOp) -> Result<(), StoreError> {
        self.run(op, || ()).await
    }

    /// Runs the write `call` under the next scheduled fault for `op`.
    ///
    /// `call` is not run for [`Fault::Fail`]. For [`Fault::LoseReply`] it runs and its
    /// result is thrown away.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the scheduled fault is [`Fault::Fail`]
    /// or [`Fault::LoseReply`].
    pub async fn run<T>(&self, op: StoreOp, call: impl FnOnce() -> T) -> Result<T, StoreError> {
        let fault = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);

        match fault {
            None | Some(Fault::Pass) => Ok(call()),
            Some(Fault::Fail) => Err(StoreError::Unavailable(format!("injected fault: {op:?}"))),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(call())
            }
            Some(Fault::LoseReply) => {
                let _ = call();
                Err(StoreError::Unavailable(format!("reply lost: {op:?}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn faults_are_consumed_in_order() {
        let plan = FaultPlan::new();
        plan.script(StoreOp::TicketReserve, [Fault::Pass, Fault::Fail]);

        assert!(plan.apply(StoreOp::TicketReserve).await.is_ok());
        assert!(plan.apply(StoreOp::TicketReserve).await.is_err());
        assert!(plan.apply(StoreOp::TicketReserve).await.is_ok());
        assert_eq!(plan.pending(StoreOp::TicketReserve), 0);
    }

    #[tokio::test]
    async fn lost_reply_applies_the_write() {
        let plan = FaultPlan::new();
        plan.script(StoreOp::TicketReserve, [Fault::Fail, Fault::LoseReply]);
        let mut writes = 0;

        assert!(plan.run(StoreOp::TicketReserve, || writes += 1).await.is_err());
        assert_eq!(writes, 0);
        assert!(plan.run(StoreOp::TicketReserve, || writes += 1).await.is_err());
        assert_eq!(writes, 1);
    }

    #[tokio::test]
    async fn faults_are_per_operation() {
        let plan = FaultPlan::new();
        plan.fail_next(StoreOp::OutboxEnqueue, 2);

        assert!(plan.apply(StoreOp::TicketRead).await.is_ok());
        assert_eq!(plan.pending(StoreOp::OutboxEnqueue), 2);
    }
}
