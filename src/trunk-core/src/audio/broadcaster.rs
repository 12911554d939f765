// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Fan-out of audio segments to multiple consumers.

use std::sync::Arc;

use crate::events::{ListenerId, ListenerSet};

use super::segment::SegmentLease;

/// Consumer of audio segments. The receiver owns the lease it is handed and
/// releases it by dropping it, possibly from inside `receive`.
pub trait AudioSegmentReceiver: Send + Sync {
    fn receive(&self, lease: SegmentLease);
}

pub struct AudioSegmentBroadcaster {
    receivers: ListenerSet<dyn AudioSegmentReceiver>,
}

impl Default for AudioSegmentBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSegmentBroadcaster {
    pub fn new() -> Self {
        Self {
            receivers: ListenerSet::new(),
        }
    }

    pub fn add_receiver(&self, receiver: Arc<dyn AudioSegmentReceiver>) -> ListenerId {
        self.receivers.register(receiver)
    }

    pub fn remove_receiver(&self, id: ListenerId) {
        self.receivers.unregister(id);
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    /// Hand a lease to every receiver.
    ///
    /// One lease per receiver is reserved before any receiver runs, so a
    /// receiver that releases synchronously cannot dispose the segment
    /// under the receivers that follow it. The broadcaster's own lease is
    /// released last.
    pub fn broadcast(&self, lease: SegmentLease) {
        let receivers = self.receivers.snapshot();
        let leases: Vec<SegmentLease> = receivers.iter().map(|_| lease.clone()).collect();
        for (receiver, reserved) in receivers.iter().zip(leases) {
            receiver.receive(reserved);
        }
        drop(lease);
    }
}
