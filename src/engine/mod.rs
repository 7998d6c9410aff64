//! Operation engine.
//!
//! Owns at most one [`Operation`] and drives its retransmissions:
//!
//! ```text
//! Idle ──begin──▶ AwaitingResponse ──response──▶ Idle (completed)
//!                   │        ▲
//!                   │ timer  │ retransmit pending frame
//!                   ▼        │ (retries remaining)
//!                 retry? ────┘
//!                   │ no retries left
//!                   ▼
//!                 Idle (Timeout)
//! ```
//!
//! Sending and retrying happen inside a single call, so the only phases
//! observable between calls are `Idle` and `AwaitingResponse`.

mod operation;
mod timer;

pub use operation::{AsyncOpStatus, OperationKind, Outcome, WillInfo};
pub(crate) use operation::{
    Completion, MsgIds, Operation, PublishRequest, PublishStage, ReactContext, Reaction, Request,
    WillStage,
};
pub use timer::EngineClock;

use bytes::Bytes;

use crate::error::{MqttsnError, Result};

/// Retransmission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Seconds between transmissions.
    pub period_secs: u16,
    /// Retransmissions after the initial send.
    pub count: u32,
}

impl RetryPolicy {
    pub fn new(period_secs: u16, count: u32) -> Self {
        Self { period_secs, count }
    }

    #[inline]
    pub fn period_ms(&self) -> u64 {
        u64::from(self.period_secs) * 1000
    }
}

/// Observable engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpPhase {
    Idle,
    AwaitingResponse,
}

/// Result of a retry timer expiry.
#[derive(Debug)]
pub(crate) enum TimerOutcome {
    /// Send these bytes again.
    Retransmit(Bytes),
    /// No retries left; the operation is handed back for completion.
    Exhausted(Operation),
}

/// Single-slot operation state machine.
#[derive(Debug)]
pub(crate) struct OperationEngine {
    active: Option<Operation>,
    policy: RetryPolicy,
}

impl OperationEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            active: None,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    pub fn phase(&self) -> OpPhase {
        match self.active {
            Some(_) => OpPhase::AwaitingResponse,
            None => OpPhase::Idle,
        }
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_kind(&self) -> Option<OperationKind> {
        self.active.as_ref().map(Operation::kind)
    }

    /// Install `op` and arm it for `frame`, sent at `now`.
    ///
    /// # Errors
    ///
    /// Returns `Busy` if an operation is already active; `op` is dropped
    /// without firing its completion.
    pub fn begin(&mut self, op: Operation, frame: Bytes, now: u64) -> Result<()> {
        if self.active.is_some() {
            return Err(MqttsnError::Busy);
        }
        self.active = Some(op);
        self.arm(frame, now);
        Ok(())
    }

    /// Record `frame` as the pending frame with a full retry budget.
    pub fn arm(&mut self, frame: Bytes, now: u64) {
        let policy = self.policy;
        if let Some(op) = self.active.as_mut() {
            op.pending_frame = frame;
            op.retries_remaining = policy.count;
            op.deadline_ms = now + policy.period_ms();
        }
    }

    /// Deadline of the active operation's retry timer.
    pub fn deadline(&self) -> Option<u64> {
        self.active.as_ref().map(|op| op.deadline_ms)
    }

    /// Handle timer expiry at `now`.
    ///
    /// Returns `None` if nothing is active or the deadline is still ahead.
    pub fn on_timer(&mut self, now: u64) -> Option<TimerOutcome> {
        let period = self.policy.period_ms();
        let op = self.active.as_mut()?;
        if op.deadline_ms > now {
            return None;
        }

        if op.retries_remaining > 0 {
            op.retries_remaining -= 1;
            op.deadline_ms = now + period;
            return Some(TimerOutcome::Retransmit(op.pending_frame.clone()));
        }

        self.active.take().map(TimerOutcome::Exhausted)
    }

    pub fn active_mut(&mut self) -> Option<&mut Operation> {
        self.active.as_mut()
    }

    /// Remove the active operation without completing it.
    pub fn take(&mut self) -> Option<Operation> {
        self.active.take()
    }
}
