// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Traffic channel allocation.
//!
//! A [`TrafficChannelManager`] follows channel grants announced on a control
//! channel. Each grant is either bound to a pooled [`TrafficChannel`] that
//! the [`ChannelModel`] starts, or downgraded to a detect-only call event
//! with the reason it could not be followed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};

use crate::alias::AliasList;
use crate::events::{ListenerId, ListenerSet};

use super::call_event::CallEvent;
use super::events::{ChannelEventListener, TrafficChannelStatusListener};

pub const CHANNEL_START_REJECTED: &str = "CHANNEL START REJECTED";
pub const NO_TUNER_AVAILABLE: &str = "NO TUNER AVAILABLE";
pub const UNKNOWN_FREQUENCY: &str = "UNKNOWN FREQUENCY";
pub const DO_NOT_MONITOR: &str = "DO NOT MONITOR";

/// Starts and stops the receivers behind traffic channels.
pub trait ChannelModel: Send + Sync {
    /// Start processing `event` on `channel`. The model must report the
    /// call end to `end_listener` once the channel returns to idle.
    fn enable(
        &self,
        channel: &TrafficChannel,
        event: &CallEvent,
        end_listener: Weak<dyn TrafficChannelStatusListener>,
    ) -> bool;

    fn disable(&self, channel: &TrafficChannel);
}

/// Reusable traffic channel slot.
#[derive(Debug)]
pub struct TrafficChannel {
    id: u64,
    assignment: Mutex<Option<CallEvent>>,
    processing: AtomicBool,
}

impl TrafficChannel {
    fn new(id: u64) -> Self {
        Self {
            id,
            assignment: Mutex::new(None),
            processing: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Call event the channel was last started for.
    pub fn assignment(&self) -> Option<CallEvent> {
        self.assignment
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn assign(&self, event: Option<CallEvent>) {
        *self.assignment.lock().unwrap_or_else(|e| e.into_inner()) = event;
    }
}

#[derive(Default)]
struct AllocationState {
    pool: Vec<Arc<TrafficChannel>>,
    in_use: HashMap<String, Arc<TrafficChannel>>,
    last_do_not_monitor: Option<CallEvent>,
}

pub struct TrafficChannelManager {
    me: Weak<TrafficChannelManager>,
    model: Arc<dyn ChannelModel>,
    alias_list: Arc<AliasList>,
    max_channels: usize,
    do_not_monitor_priority: i32,
    next_channel_id: AtomicU64,
    state: Mutex<AllocationState>,
    listeners: ListenerSet<dyn ChannelEventListener>,
}

impl TrafficChannelManager {
    pub fn new(
        model: Arc<dyn ChannelModel>,
        alias_list: Arc<AliasList>,
        max_channels: usize,
        do_not_monitor_priority: i32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            model,
            alias_list,
            max_channels,
            do_not_monitor_priority,
            next_channel_id: AtomicU64::new(1),
            state: Mutex::new(AllocationState::default()),
            listeners: ListenerSet::new(),
        })
    }

    /// Register a listener for emitted call events.
    pub fn add_listener(&self, listener: Arc<dyn ChannelEventListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.unregister(id);
    }

    pub fn pool_size(&self) -> usize {
        self.lock_state().pool.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.lock_state().in_use.len()
    }

    pub fn is_in_use(&self, channel: &str) -> bool {
        self.lock_state().in_use.contains_key(channel)
    }

    /// Process a channel grant.
    ///
    /// Returns the emitted call event, or `None` when the grant was ignored
    /// (channel already allocated or a repeated do-not-monitor grant).
    pub fn process_channel_grant(&self, mut event: CallEvent) -> Option<CallEvent> {
        let key = event.channel_key();
        {
            let mut state = self.lock_state();

            if state.in_use.contains_key(&key) {
                return None;
            }

            if self.is_do_not_monitor(&event) {
                event.downgrade_to_detect(DO_NOT_MONITOR);
                if state
                    .last_do_not_monitor
                    .as_ref()
                    .is_some_and(|last| last.is_same_call_event(&event))
                {
                    return None;
                }
                state.last_do_not_monitor = Some(event.clone());
            } else if event.frequency == 0 {
                event.downgrade_to_detect(UNKNOWN_FREQUENCY);
            } else if let Some(channel) = self.next_channel(&mut state) {
                let end_listener: Weak<dyn TrafficChannelStatusListener> = self.me.clone();
                channel.assign(Some(event.clone()));
                let enabled = self.model.enable(&channel, &event, end_listener);
                channel.processing.store(enabled, Ordering::Release);
                if enabled {
                    debug!("Traffic channel {} allocated to {}", channel.id, key);
                    state.in_use.insert(key, channel);
                } else {
                    channel.assign(None);
                    event.downgrade_to_detect(CHANNEL_START_REJECTED);
                }
            } else {
                event.downgrade_to_detect(NO_TUNER_AVAILABLE);
            }
        }

        self.listeners.notify(|l| l.on_call_event(&event));
        Some(event)
    }

    /// End every in-use channel.
    pub fn stop(&self) {
        let channels: Vec<Arc<TrafficChannel>> = {
            let mut state = self.lock_state();
            state.in_use.drain().map(|(_, c)| c).collect()
        };
        if !channels.is_empty() {
            info!("Stopping {} traffic channel(s)", channels.len());
        }
        for channel in channels {
            self.release(&channel);
        }
    }

    /// Stop and disable the whole pool.
    pub fn dispose(&self) {
        self.stop();
        let pool = std::mem::take(&mut self.lock_state().pool);
        for channel in pool {
            self.model.disable(&channel);
            channel.processing.store(false, Ordering::Release);
        }
        self.listeners.clear();
    }

    fn is_do_not_monitor(&self, event: &CallEvent) -> bool {
        [event.to.as_ref(), event.from.as_ref()]
            .into_iter()
            .flatten()
            .any(|id| {
                self.alias_list
                    .is_do_not_monitor(id, self.do_not_monitor_priority)
            })
    }

    fn next_channel(&self, state: &mut AllocationState) -> Option<Arc<TrafficChannel>> {
        if let Some(channel) = state.pool.iter().find(|c| !c.is_processing()) {
            return Some(Arc::clone(channel));
        }
        if state.pool.len() < self.max_channels {
            let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
            let channel = Arc::new(TrafficChannel::new(id));
            state.pool.push(Arc::clone(&channel));
            return Some(channel);
        }
        warn!(
            "All {} traffic channels are busy, grant not followed",
            self.max_channels
        );
        None
    }

    fn release(&self, channel: &TrafficChannel) {
        self.model.disable(channel);
        channel.processing.store(false, Ordering::Release);
        channel.assign(None);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AllocationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TrafficChannelStatusListener for TrafficChannelManager {
    fn call_end(&self, channel: &str) {
        let removed = self.lock_state().in_use.remove(channel);
        if let Some(traffic_channel) = removed {
            debug!(
                "Traffic channel {} released from {}",
                traffic_channel.id, channel
            );
            self.release(&traffic_channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{Alias, AliasId};
    use crate::channel::call_event::CallEventType;
    use crate::identifier::{Identifier, Role};

    #[derive(Default)]
    struct MockModel {
        reject: AtomicBool,
        enabled: Mutex<Vec<u64>>,
        disabled: Mutex<Vec<u64>>,
        end_listeners: Mutex<Vec<Weak<dyn TrafficChannelStatusListener>>>,
    }

    impl ChannelModel for MockModel {
        fn enable(
            &self,
            channel: &TrafficChannel,
            _event: &CallEvent,
            end_listener: Weak<dyn TrafficChannelStatusListener>,
        ) -> bool {
            if self.reject.load(Ordering::SeqCst) {
                return false;
            }
            self.enabled.lock().unwrap().push(channel.id());
            self.end_listeners.lock().unwrap().push(end_listener);
            true
        }

        fn disable(&self, channel: &TrafficChannel) {
            self.disabled.lock().unwrap().push(channel.id());
        }
    }

    #[derive(Default)]
    struct EventRecorder(Mutex<Vec<CallEvent>>);

    impl ChannelEventListener for EventRecorder {
        fn on_call_event(&self, event: &CallEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn aliases() -> Arc<AliasList> {
        let mut blocked = Alias::new("Blocked", vec![AliasId::Talkgroup { value: 666 }]);
        blocked.playback_priority = crate::alias::DO_NOT_MONITOR;
        Arc::new(AliasList::new("test", vec![blocked]))
    }

    fn grant(channel: &str, talkgroup: u32) -> CallEvent {
        let mut event = CallEvent::new(CallEventType::GroupCall, channel, 851_012_500);
        event.to = Some(Identifier::talkgroup(talkgroup, Role::To));
        event
    }

    fn manager(max: usize) -> (Arc<TrafficChannelManager>, Arc<MockModel>, Arc<EventRecorder>) {
        let model = Arc::new(MockModel::default());
        let manager = TrafficChannelManager::new(model.clone(), aliases(), max, -1);
        let recorder = Arc::new(EventRecorder::default());
        manager.add_listener(recorder.clone());
        (manager, model, recorder)
    }

    #[test]
    fn test_grant_allocates_channel() {
        let (manager, model, recorder) = manager(2);
        let event = manager.process_channel_grant(grant("1", 100)).unwrap();
        assert_eq!(event.event_type, CallEventType::GroupCall);
        assert!(manager.is_in_use("1"));
        assert_eq!(*model.enabled.lock().unwrap(), vec![1]);
        assert_eq!(recorder.0.lock().unwrap().len(), 1);

        // A repeated grant for an allocated channel is ignored.
        assert!(manager.process_channel_grant(grant("1", 100)).is_none());
        assert_eq!(manager.pool_size(), 1);
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_frequency_is_detect_only() {
        let (manager, model, _) = manager(2);
        let mut event = grant("2", 100);
        event.frequency = 0;
        let event = manager.process_channel_grant(event).unwrap();
        assert_eq!(event.event_type, CallEventType::CallDetect);
        assert_eq!(event.details.as_deref(), Some(UNKNOWN_FREQUENCY));
        assert!(model.enabled.lock().unwrap().is_empty());
        assert_eq!(manager.in_use_count(), 0);
    }

    #[test]
    fn test_pool_exhaustion() {
        let (manager, _, _) = manager(1);
        manager.process_channel_grant(grant("1", 100));
        let mut second = grant("2", 200);
        second.details = Some("Emergency".to_string());
        let event = manager.process_channel_grant(second).unwrap();
        assert_eq!(event.event_type, CallEventType::CallDetect);
        assert_eq!(
            event.details.as_deref(),
            Some("NO TUNER AVAILABLE : Emergency")
        );
    }

    #[test]
    fn test_rejected_start_leaves_channel_reusable() {
        let (manager, model, _) = manager(1);
        model.reject.store(true, Ordering::SeqCst);
        let event = manager.process_channel_grant(grant("1", 100)).unwrap();
        assert_eq!(event.details.as_deref(), Some(CHANNEL_START_REJECTED));
        assert_eq!(manager.in_use_count(), 0);

        model.reject.store(false, Ordering::SeqCst);
        let event = manager.process_channel_grant(grant("1", 100)).unwrap();
        assert_eq!(event.event_type, CallEventType::GroupCall);
        assert_eq!(manager.pool_size(), 1);
    }

    #[test]
    fn test_do_not_monitor_downgrade_and_suppression() {
        let (manager, model, recorder) = manager(2);
        let event = manager.process_channel_grant(grant("3", 666)).unwrap();
        assert_eq!(event.event_type, CallEventType::CallDetect);
        assert_eq!(event.details.as_deref(), Some(DO_NOT_MONITOR));
        assert!(model.enabled.lock().unwrap().is_empty());

        assert!(manager.process_channel_grant(grant("3", 666)).is_none());
        assert_eq!(recorder.0.lock().unwrap().len(), 1);

        // A different channel is a new event.
        assert!(manager.process_channel_grant(grant("4", 666)).is_some());
    }

    #[test]
    fn test_call_end_releases_channel_once() {
        let (manager, model, _) = manager(1);
        manager.process_channel_grant(grant("1", 100));
        let end_listener = model.end_listeners.lock().unwrap()[0].upgrade().unwrap();
        end_listener.call_end("1");
        end_listener.call_end("1");
        assert_eq!(*model.disabled.lock().unwrap(), vec![1]);
        assert_eq!(manager.in_use_count(), 0);

        // The released channel is reused.
        manager.process_channel_grant(grant("2", 200));
        assert_eq!(*model.enabled.lock().unwrap(), vec![1, 1]);
        assert_eq!(manager.pool_size(), 1);
    }

    #[test]
    fn test_stop_and_dispose() {
        let (manager, model, _) = manager(3);
        manager.process_channel_grant(grant("1", 100));
        manager.process_channel_grant(grant("2", 200));
        manager.stop();
        assert_eq!(manager.in_use_count(), 0);
        assert_eq!(model.disabled.lock().unwrap().len(), 2);

        manager.dispose();
        assert_eq!(manager.pool_size(), 0);
        assert_eq!(model.disabled.lock().unwrap().len(), 4);
    }
}
