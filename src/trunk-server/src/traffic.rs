// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Traffic channel model backed by ingest clients.
//!
//! Every enabled traffic channel gets a [`ChannelState`] named after the
//! granted channel. Decoder events for that channel arrive over the ingest
//! listener; when the channel falls back to IDLE its state reports the call
//! end to the [`TrafficChannelManager`](trunk_core::channel::TrafficChannelManager).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use trunk_core::channel::{
    CallEvent, ChannelEventListener, ChannelModel, ChannelState, ChannelTimeouts, State,
    TrafficChannel, TrafficChannelStatusListener,
};
use trunk_core::schedule::Scheduler;

pub struct TunerChannelModel {
    capacity: usize,
    timeouts: ChannelTimeouts,
    scheduler: Scheduler,
    listeners: Vec<Arc<dyn ChannelEventListener>>,
    /// Enabled channel states keyed by traffic channel id.
    channels: Mutex<HashMap<u64, Arc<ChannelState>>>,
}

impl TunerChannelModel {
    pub fn new(capacity: usize, call_timeout: Duration, scheduler: Scheduler) -> Self {
        Self {
            capacity,
            timeouts: ChannelTimeouts::traffic(call_timeout),
            scheduler,
            listeners: Vec::new(),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Attach `listener` to every channel state created from now on.
    pub fn with_listener(mut self, listener: Arc<dyn ChannelEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn active_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Look up an enabled channel by the granted channel name.
    pub fn channel_state(&self, name: &str) -> Option<Arc<ChannelState>> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|c| c.name() == name)
            .cloned()
    }
}

impl ChannelModel for TunerChannelModel {
    fn enable(
        &self,
        channel: &TrafficChannel,
        event: &CallEvent,
        end_listener: Weak<dyn TrafficChannelStatusListener>,
    ) -> bool {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if channels.len() >= self.capacity && !channels.contains_key(&channel.id()) {
            warn!(
                "No tuner channel left for {} ({} in use)",
                event.channel_key(),
                channels.len()
            );
            return false;
        }

        let state = ChannelState::traffic(event.channel_key(), self.timeouts, self.scheduler.clone());
        for listener in &self.listeners {
            state.add_listener(Arc::clone(listener));
        }
        state.configure_as_traffic_channel(end_listener, event.clone());
        state.set_state(State::Call);
        if let Some(previous) = channels.insert(channel.id(), state) {
            previous.dispose();
        }
        info!(
            "Traffic channel {} following {} at {} Hz",
            channel.id(),
            event.channel_key(),
            event.frequency
        );
        true
    }

    fn disable(&self, channel: &TrafficChannel) {
        let removed = self
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&channel.id());
        if let Some(state) = removed {
            debug!("Traffic channel {} ({}) disabled", channel.id(), state.name());
            state.dispose();
        }
    }
}

/// Logs channel activity.
pub struct ChannelActivityLogger;

impl ChannelEventListener for ChannelActivityLogger {
    fn on_state_change(&self, channel: &str, old: State, new: State) {
        debug!("Channel {}: {} -> {}", channel, old, new);
    }

    fn on_call_event(&self, event: &CallEvent) {
        let to = event
            .to
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default();
        match event.event_end {
            Some(_) => info!(
                "Call event ended on {}: {:?} {}",
                event.channel_key(),
                event.event_type,
                to
            ),
            None => info!(
                "Call event on {}: {:?} {} {}",
                event.channel_key(),
                event.event_type,
                to,
                event.details.as_deref().unwrap_or("")
            ),
        }
    }
}
