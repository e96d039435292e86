// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Session timers.
//!
//! Two independent one-shot timers guard a DFU session: one waits for a peer
//! to connect, the other bounds the whole transfer. They are polled by the
//! update task, and an expiry is posted to the message queue like any other
//! event.

use bee_dfu_common::DfuConfig;

/// Identifies a session timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    WaitForConnection,
    TotalTransfer,
}

#[derive(Debug, Clone, Copy, Default)]
struct OneShot {
    deadline: Option<u64>,
}

impl OneShot {
    fn arm(&mut self, deadline: u64) {
        self.deadline = Some(deadline);
    }

    fn stop(&mut self) {
        self.deadline = None;
    }

    /// Disarm and report when the deadline has passed.
    fn fire(&mut self, now: u64) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// The pair of DFU session timers.
#[derive(Debug, Clone)]
pub struct Supervisor {
    wait_for_connection: OneShot,
    total: OneShot,
    started_at: u64,
    wait_ms: u32,
    total_ms: u32,
    unit: u32,
}

impl Supervisor {
    pub fn new(config: &DfuConfig) -> Self {
        Self {
            wait_for_connection: OneShot::default(),
            total: OneShot::default(),
            started_at: 0,
            wait_ms: config.wait_for_connection_ms,
            total_ms: config.total_transfer_ms,
            unit: config.total_timeout_unit.max(1),
        }
    }

    /// Arm both timers when DFU mode is entered.
    pub fn start(&mut self, now: u64) {
        self.started_at = now;
        self.wait_for_connection.arm(now + u64::from(self.wait_ms));
        self.total.arm(now + u64::from(self.total_ms));
        trace!("Supervisor: armed at {} ms", now);
    }

    /// A peer connected: the wait-for-connection timer is no longer needed.
    pub fn connected(&mut self) {
        self.wait_for_connection.stop();
    }

    /// Stretch the total budget to cover an announced image of `image_len` bytes.
    ///
    /// The budget is one base period per started unit, counted from DFU start.
    pub fn scale_total(&mut self, image_len: u32) {
        if self.total.deadline.is_none() {
            return;
        }
        let units = image_len.div_ceil(self.unit).max(1);
        let deadline = self.started_at + u64::from(self.total_ms) * u64::from(units);
        if self.total.deadline.is_some_and(|d| deadline > d) {
            self.total.arm(deadline);
            debug!("Supervisor: total budget {} x {} ms", units, self.total_ms);
        }
    }

    pub fn stop_all(&mut self) {
        self.wait_for_connection.stop();
        self.total.stop();
    }

    /// Report one expired timer, if any. Each timer fires at most once.
    pub fn poll(&mut self, now: u64) -> Option<TimerId> {
        if self.wait_for_connection.fire(now) {
            return Some(TimerId::WaitForConnection);
        }
        if self.total.fire(now) {
            return Some(TimerId::TotalTransfer);
        }
        None
    }

    pub fn total_deadline(&self) -> Option<u64> {
        self.total.deadline
    }

    pub fn is_waiting_for_connection(&self) -> bool {
        self.wait_for_connection.deadline.is_some()
    }
}
