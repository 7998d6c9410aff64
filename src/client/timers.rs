//! Timer handling: retries, gateway expiry, keep-alive and gateway search
//! all share the single platform timer.

use bytes::Bytes;

use super::{Client, ConnectionState, PendingPing};
use crate::engine::{AsyncOpStatus, TimerOutcome};
use crate::gateway::GwStatus;
use crate::protocol::Message;

impl Client {
    /// Notify the client that the programmed timer expired.
    ///
    /// A tick while no timer is programmed is ignored.
    pub fn tick(&mut self) {
        if !self.clock.fire() {
            tracing::trace!("Ignoring stale tick");
            return;
        }
        let now = self.clock.now();

        self.run_retry_timer(now);
        self.run_gateway_expiry(now);
        self.run_keep_alive(now);
        self.run_search(now);
        self.reschedule();
    }

    /// Cancel the programmed timer and advance the clock by the time that
    /// passed.
    pub(super) fn sync_clock(&mut self) {
        if self.clock.is_armed() {
            let elapsed = self.callbacks.cancel_timer();
            self.clock.cancel(elapsed);
        }
    }

    /// Program the timer for the earliest pending deadline.
    pub(super) fn reschedule(&mut self) {
        if !self.started {
            return;
        }
        self.refresh_search();

        let next = [
            self.engine.deadline(),
            self.gateways.next_expiry(),
            self.keep_alive_deadline(),
            self.search_deadline,
        ]
        .into_iter()
        .flatten()
        .min();

        if let Some(at) = next {
            let ms = at
                .saturating_sub(self.clock.now())
                .min(u64::from(u32::MAX)) as u32;
            self.clock.arm(ms);
            self.callbacks.program_timer(ms);
        }
    }

    fn run_retry_timer(&mut self, now: u64) {
        match self.engine.on_timer(now) {
            Some(TimerOutcome::Retransmit(frame)) => {
                tracing::debug!(kind = ?self.engine.active_kind(), "Retransmitting");
                self.transmit(&frame, false);
            }
            Some(TimerOutcome::Exhausted(op)) => {
                tracing::debug!(kind = ?op.kind(), "Operation timed out");
                self.finish(op, AsyncOpStatus::Timeout.into());
            }
            None => {}
        }
    }

    fn run_gateway_expiry(&mut self, now: u64) {
        for id in self.gateways.expire_check(now) {
            tracing::debug!(gw_id = id, "Gateway advertisement expired");
            self.callbacks.report_gw_status(id, GwStatus::Discarded);
        }
    }

    fn keep_alive_deadline(&self) -> Option<u64> {
        if self.state != ConnectionState::Connected {
            return None;
        }
        let secs = self.session.as_ref()?.keep_alive_secs;
        if secs == 0 {
            return None;
        }
        match &self.keep_alive.ping {
            Some(ping) => Some(ping.deadline_ms),
            None => Some(self.keep_alive.last_send_ms + u64::from(secs) * 1000),
        }
    }

    fn run_keep_alive(&mut self, now: u64) {
        match self.keep_alive_deadline() {
            Some(deadline) if deadline <= now => {}
            _ => return,
        }
        let policy = self.engine.policy();

        match self.keep_alive.ping.as_mut() {
            None => {
                let ping = Message::Pingreq { client_id: None };
                let frame = match ping.encode() {
                    Ok(frame) => Bytes::from(frame),
                    Err(e) => {
                        tracing::warn!("Failed to encode PINGREQ: {}", e);
                        return;
                    }
                };
                tracing::trace!("Sending keep-alive PINGREQ");
                self.transmit(&frame, false);
                self.keep_alive.ping = Some(PendingPing {
                    frame,
                    retries_remaining: policy.count,
                    deadline_ms: now + policy.period_ms(),
                });
            }
            Some(ping) if ping.retries_remaining > 0 => {
                ping.retries_remaining -= 1;
                ping.deadline_ms = now + policy.period_ms();
                let frame = ping.frame.clone();
                self.transmit(&frame, false);
            }
            Some(_) => self.gateway_lost(),
        }
    }

    fn search_wanted(&self) -> bool {
        self.started
            && self.config.search_gw_enabled
            && self.state == ConnectionState::Disconnected
            && self.gateways.is_empty()
            && !self.engine.is_busy()
    }

    fn refresh_search(&mut self) {
        if !self.search_wanted() {
            self.search_deadline = None;
        } else if self.search_deadline.is_none() {
            self.search_deadline = Some(self.clock.now() + self.engine.policy().period_ms());
        }
    }

    fn run_search(&mut self, now: u64) {
        match self.search_deadline {
            Some(deadline) if deadline <= now && self.search_wanted() => self.send_search(),
            _ => {}
        }
    }
}
