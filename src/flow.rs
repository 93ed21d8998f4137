//! Flow controller (C3): outbound credit window and inbound ack
//! accumulation.
//!
//! Two independent counters track each direction. Neither is aware of
//! individual streams — `WINDOW_UPDATE` always applies to the aggregate,
//! per the spec's ordering guarantees.

use std::time::{Duration, Instant};

use crate::constants::WINDOW_UPDATE_THRESHOLD;

/// Outcome of a send attempt against the outbound window.
#[derive(Debug, PartialEq, Eq)]
pub enum SendGate {
    /// The send may proceed; `bytes_in_flight` has already been updated.
    Go,
    /// There isn't enough window right now; the caller must wait for a
    /// `WINDOW_UPDATE` (or service `PING`/`GOODBYE`) before retrying.
    Blocked,
}

/// Tracks `bytes_in_flight`/`send_window` (outbound) and `bytes_to_ack`
/// (inbound).
#[derive(Debug)]
pub struct FlowController {
    send_window: u32,
    bytes_in_flight: u32,
    bytes_to_ack: u32,
    block_started_at: Option<Instant>,
}

impl FlowController {
    pub fn new(initial_send_window: u32) -> Self {
        Self {
            send_window: initial_send_window,
            bytes_in_flight: 0,
            bytes_to_ack: 0,
            block_started_at: None,
        }
    }

    pub fn send_window(&self) -> u32 {
        self.send_window
    }

    pub fn bytes_in_flight(&self) -> u32 {
        self.bytes_in_flight
    }

    pub fn bytes_to_ack(&self) -> u32 {
        self.bytes_to_ack
    }

    /// Attempt to reserve `payload_len` bytes of outbound credit.
    ///
    /// On [`SendGate::Go`], the caller must actually send the data — the
    /// counter is already incremented optimistically, matching the
    /// spec's "must not begin unless ... <= send_window" gate.
    pub fn try_send(&mut self, payload_len: u32) -> SendGate {
        if self.bytes_in_flight.saturating_add(payload_len) <= self.send_window {
            self.bytes_in_flight += payload_len;
            self.block_started_at = None;
            SendGate::Go
        } else {
            self.block_started_at.get_or_insert_with(Instant::now);
            SendGate::Blocked
        }
    }

    /// Apply a received `WINDOW_UPDATE(increment)`. Saturates at zero on
    /// stale/over-large increments rather than underflowing.
    pub fn apply_window_update(&mut self, increment: u32) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(increment);
    }

    /// Has the outbound side been blocked longer than the window-block
    /// deadline? Callers check this each time they retry a blocked send.
    pub fn outbound_block_expired(&self, timeout: Duration) -> bool {
        match self.block_started_at {
            Some(started) => started.elapsed() >= timeout,
            None => false,
        }
    }

    /// Record `len` inbound bytes (from `STREAM_DATA` or `TERM_OUTPUT`).
    /// Returns `Some(increment)` when the threshold is crossed and a
    /// `WINDOW_UPDATE` must be emitted; the internal counter is reset to 0
    /// in that case.
    pub fn ack_inbound(&mut self, len: u32) -> Option<u32> {
        self.bytes_to_ack += len;
        if self.bytes_to_ack >= WINDOW_UPDATE_THRESHOLD {
            let increment = self.bytes_to_ack;
            self.bytes_to_ack = 0;
            Some(increment)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_within_window_succeeds() {
        let mut fc = FlowController::new(100);
        assert_eq!(fc.try_send(40), SendGate::Go);
        assert_eq!(fc.bytes_in_flight(), 40);
    }

    #[test]
    fn send_exceeding_window_blocks() {
        let mut fc = FlowController::new(100);
        fc.try_send(80);
        assert_eq!(fc.try_send(40), SendGate::Blocked);
        assert_eq!(fc.bytes_in_flight(), 80);
    }

    #[test]
    fn window_update_unblocks_send_scenario_s5() {
        // S5 from the spec: send_window=100, bytes_in_flight=80, blocked
        // 40-byte send; WINDOW_UPDATE(+50) then succeeds, in_flight=70.
        let mut fc = FlowController::new(100);
        fc.try_send(80);
        assert_eq!(fc.try_send(40), SendGate::Blocked);
        fc.apply_window_update(50);
        assert_eq!(fc.try_send(40), SendGate::Go);
        assert_eq!(fc.bytes_in_flight(), 70);
    }

    #[test]
    fn stale_window_update_saturates_at_zero() {
        let mut fc = FlowController::new(100);
        fc.try_send(10);
        fc.apply_window_update(1000);
        assert_eq!(fc.bytes_in_flight(), 0);
    }

    #[test]
    fn inbound_ack_crosses_threshold_once() {
        let mut fc = FlowController::new(100);
        assert_eq!(fc.ack_inbound(4000), None);
        assert_eq!(fc.ack_inbound(4000), None);
        let inc = fc.ack_inbound(500).unwrap();
        assert_eq!(inc, 8500);
        assert_eq!(fc.bytes_to_ack(), 0);
    }

    #[test]
    fn block_expires_after_timeout() {
        let mut fc = FlowController::new(10);
        fc.try_send(10);
        assert_eq!(fc.try_send(5), SendGate::Blocked);
        assert!(!fc.outbound_block_expired(Duration::from_secs(30)));
        assert!(fc.outbound_block_expired(Duration::from_millis(0)));
    }

    #[test]
    fn successful_send_clears_block_timer() {
        let mut fc = FlowController::new(10);
        fc.try_send(10);
        assert_eq!(fc.try_send(5), SendGate::Blocked);
        fc.apply_window_update(5);
        assert_eq!(fc.try_send(5), SendGate::Go);
        assert!(!fc.outbound_block_expired(Duration::from_millis(0)));
    }
}
