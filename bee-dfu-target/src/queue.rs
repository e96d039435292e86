// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Message queue feeding the update task.
//!
//! Transport callbacks and timer polls post here instead of calling into the
//! engine, so all session work happens in one place, one message at a time.

use crate::supervisor::TimerId;
use bee_dfu_common::protocol::{MAX_CONTROL_POINT_LEN, MAX_PACKET_LEN};
use core::cell::RefCell;
use heapless::{Deque, Vec};

/// Default queue depth.
pub const QUEUE_DEPTH: usize = 16;

/// Input to the update task.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuMessage {
    Connected,
    Disconnected,
    /// Write to the control-point characteristic.
    ControlPoint(Vec<u8, MAX_CONTROL_POINT_LEN>),
    /// Write to the packet characteristic.
    Packet(Vec<u8, MAX_PACKET_LEN>),
    TimerExpired(TimerId),
    /// Answer to a connection parameter request.
    ConnParamsUpdated { accepted: bool },
    MtuChanged(u16),
}

/// Bounded FIFO of [`DfuMessage`]s.
pub struct MessageQueue<const N: usize = QUEUE_DEPTH> {
    messages: RefCell<Deque<DfuMessage, N>>,
}

impl<const N: usize> MessageQueue<N> {
    pub const fn new() -> Self {
        Self {
            messages: RefCell::new(Deque::new()),
        }
    }

    /// Queue a message. Returns `false` and drops it when the queue is full.
    pub fn post(&self, message: DfuMessage) -> bool {
        match self.messages.borrow_mut().push_back(message) {
            Ok(()) => true,
            Err(message) => {
                warn!("Message queue full, dropping {:?}", message);
                false
            }
        }
    }

    /// Queue a control-point write. Oversized writes are dropped.
    pub fn post_control_point(&self, bytes: &[u8]) -> bool {
        match Vec::from_slice(bytes) {
            Ok(bytes) => self.post(DfuMessage::ControlPoint(bytes)),
            Err(()) => {
                warn!("Control point write of {} bytes dropped", bytes.len());
                false
            }
        }
    }

    /// Queue a packet write. Oversized writes are dropped.
    pub fn post_packet(&self, bytes: &[u8]) -> bool {
        match Vec::from_slice(bytes) {
            Ok(bytes) => self.post(DfuMessage::Packet(bytes)),
            Err(()) => {
                warn!("Packet write of {} bytes dropped", bytes.len());
                false
            }
        }
    }

    pub fn pop(&self) -> Option<DfuMessage> {
        self.messages.borrow_mut().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }
}

impl<const N: usize> Default for MessageQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
