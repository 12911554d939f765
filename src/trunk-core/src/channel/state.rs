// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Live channel state: a [`ChannelStateMachine`] driven by decoder events
//! and a 20 ms monitor that runs only while the channel is not idle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::audio::now_millis;
use crate::events::{ListenerId, ListenerSet};
use crate::schedule::{ScheduledTask, Scheduler};

use super::call_event::CallEvent;
use super::events::{ChannelEventListener, TrafficChannelStatusListener};
use super::machine::{
    ChannelAction, ChannelStateMachine, ChannelTimeouts, ChannelType, DecoderEvent,
    DecoderStateEvent, State,
};

/// State monitor period.
pub const MONITOR_PERIOD: Duration = Duration::from_millis(20);

struct TrafficAssignment {
    end_listener: Weak<dyn TrafficChannelStatusListener>,
    call_event: CallEvent,
}

pub struct ChannelState {
    name: String,
    me: Weak<ChannelState>,
    machine: Mutex<ChannelStateMachine>,
    traffic: Mutex<Option<TrafficAssignment>>,
    listeners: ListenerSet<dyn ChannelEventListener>,
    scheduler: Scheduler,
    monitor: Mutex<Option<ScheduledTask>>,
    disposed: AtomicBool,
}

impl ChannelState {
    pub fn standard(
        name: impl Into<String>,
        timeouts: ChannelTimeouts,
        scheduler: Scheduler,
    ) -> Arc<Self> {
        Self::new(name.into(), ChannelType::Standard, timeouts, scheduler)
    }

    pub fn traffic(
        name: impl Into<String>,
        timeouts: ChannelTimeouts,
        scheduler: Scheduler,
    ) -> Arc<Self> {
        Self::new(name.into(), ChannelType::Traffic, timeouts, scheduler)
    }

    fn new(
        name: String,
        channel_type: ChannelType,
        timeouts: ChannelTimeouts,
        scheduler: Scheduler,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name,
            me: me.clone(),
            machine: Mutex::new(ChannelStateMachine::new(channel_type, timeouts)),
            traffic: Mutex::new(None),
            listeners: ListenerSet::new(),
            scheduler,
            monitor: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        self.machine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .state()
    }

    pub fn transition_count(&self) -> u64 {
        self.machine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .transition_count()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn add_listener(&self, listener: Arc<dyn ChannelEventListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.unregister(id);
    }

    pub fn set_state(&self, state: State) {
        let actions = {
            let Ok(mut machine) = self.machine.lock() else {
                warn!("Channel {} state lock poisoned", self.name);
                return;
            };
            machine.set_state(state, Instant::now())
        };
        self.execute(actions);
    }

    pub fn receive_decoder_state_event(&self, event: &DecoderStateEvent) {
        let actions = {
            let Ok(mut machine) = self.machine.lock() else {
                warn!("Channel {} state lock poisoned", self.name);
                return;
            };
            machine.process_decoder_event(event, Instant::now())
        };
        if matches!(event.event, DecoderEvent::ChangeCallTimeout { .. }) {
            debug!("Channel {} call timeout changed", self.name);
        }
        self.execute(actions);
    }

    /// Bind this channel to a traffic channel allocation. The channel calls
    /// `end_listener` when it returns to idle.
    pub fn configure_as_traffic_channel(
        &self,
        end_listener: Weak<dyn TrafficChannelStatusListener>,
        call_event: CallEvent,
    ) {
        self.listeners.notify(|l| l.on_call_event(&call_event));
        let mut traffic = self.traffic.lock().unwrap_or_else(|e| e.into_inner());
        *traffic = Some(TrafficAssignment {
            end_listener,
            call_event,
        });
    }

    pub fn call_event(&self) -> Option<CallEvent> {
        self.traffic
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|t| t.call_event.clone())
    }

    /// One monitor tick.
    pub fn check_timeouts(&self) {
        let actions = {
            let Ok(mut machine) = self.machine.lock() else {
                warn!("Channel {} state lock poisoned", self.name);
                return;
            };
            machine.check_timeouts(Instant::now())
        };
        self.execute(actions);
    }

    /// Stop monitoring and finalize any traffic call event.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_monitor();
        let assignment = self
            .traffic
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut assignment) = assignment {
            assignment.call_event.end(now_millis());
            self.listeners
                .notify(|l| l.on_call_event(&assignment.call_event));
        }
        self.listeners.clear();
    }

    fn execute(&self, actions: Vec<ChannelAction>) {
        for action in actions {
            match action {
                ChannelAction::Squelch(squelch) => {
                    self.listeners.notify(|l| l.on_squelch(&self.name, squelch));
                }
                ChannelAction::StartMonitor => self.start_monitor(),
                ChannelAction::StopMonitor => self.stop_monitor_if_idle(),
                ChannelAction::DecoderReset => {
                    let reset = DecoderStateEvent::new(DecoderEvent::Reset, State::Idle);
                    self.listeners
                        .notify(|l| l.on_decoder_state_event(&self.name, &reset));
                }
                ChannelAction::MetadataReset => {
                    self.listeners.notify(|l| l.on_metadata_reset(&self.name));
                }
                ChannelAction::CallEnd => self.end_traffic_call(),
                ChannelAction::StateChanged { old, new } => {
                    debug!("Channel {} {} -> {}", self.name, old, new);
                    self.listeners
                        .notify(|l| l.on_state_change(&self.name, old, new));
                }
            }
        }
    }

    fn end_traffic_call(&self) {
        let assignment = self
            .traffic
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut assignment) = assignment else {
            return;
        };
        assignment.call_event.end(now_millis());
        self.listeners
            .notify(|l| l.on_call_event(&assignment.call_event));
        if let Some(listener) = assignment.end_listener.upgrade() {
            listener.call_end(&assignment.call_event.channel_key());
        }
    }

    fn start_monitor(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let mut monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        if monitor.is_some() {
            return;
        }
        let me = self.me.clone();
        *monitor = Some(self.scheduler.schedule_at_fixed_rate(
            "channel state monitor",
            Duration::ZERO,
            MONITOR_PERIOD,
            move || {
                if let Some(channel) = me.upgrade() {
                    channel.check_timeouts();
                }
            },
        ));
    }

    /// Another thread may have left IDLE since the action was computed; its
    /// StartMonitor found the old monitor still present and did nothing.
    fn stop_monitor_if_idle(&self) {
        let task = {
            let machine = self.machine.lock().unwrap_or_else(|e| e.into_inner());
            if machine.state() != State::Idle {
                return;
            }
            self.monitor
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
        };
        if let Some(task) = task {
            task.cancel();
        }
    }

    fn stop_monitor(&self) {
        let task = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.cancel();
        }
    }
}
