// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Duplicate call detection.
//!
//! Sites of one trunked system often carry the same call at once. Segments
//! are grouped by system name and compared every 25 ms while any segment of
//! that system is in flight. The later of two matching segments is flagged
//! duplicate and dropped from tracking; the earlier one keeps every TO
//! identifier of both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use trunk_core::audio::{AudioSegment, AudioSegmentReceiver, SegmentLease};
use trunk_core::identifier::{Identifier, IdentifierValue, Role};
use trunk_core::schedule::{ScheduledTask, Scheduler};

use crate::config::DuplicateConfig;

/// Comparison period while segments are tracked.
pub const MONITOR_PERIOD: Duration = Duration::from_millis(25);

/// Notified for every segment flagged as a duplicate.
pub trait DuplicateCallListener: Send + Sync {
    fn duplicate_detected(&self, segment: &AudioSegment);
}

/// Which identifiers make two concurrent segments the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicatePolicy {
    pub by_talkgroup: bool,
    pub by_radio: bool,
}

impl From<&DuplicateConfig> for DuplicatePolicy {
    fn from(config: &DuplicateConfig) -> Self {
        Self {
            by_talkgroup: config.by_talkgroup,
            by_radio: config.by_radio,
        }
    }
}

/// Talkgroup behind a TO identifier. A patch group counts as its patch
/// talkgroup.
fn talkgroup_value(identifier: &Identifier) -> Option<u32> {
    match &identifier.value {
        IdentifierValue::Talkgroup { value } => Some(*value),
        IdentifierValue::PatchGroup { talkgroup, .. } => Some(*talkgroup),
        _ => None,
    }
}

fn radio_value(identifier: &Identifier) -> Option<u32> {
    match &identifier.value {
        IdentifierValue::Radio { value } => Some(*value),
        _ => None,
    }
}

fn any_match(a: &[Identifier], b: &[Identifier], key: fn(&Identifier) -> Option<u32>) -> bool {
    a.iter()
        .filter_map(key)
        .any(|x| b.iter().filter_map(key).any(|y| x == y))
}

impl DuplicatePolicy {
    pub fn is_duplicate(&self, a: &AudioSegment, b: &AudioSegment) -> bool {
        if self.by_talkgroup
            && any_match(
                &a.identifiers_by_role(Role::To),
                &b.identifiers_by_role(Role::To),
                talkgroup_value,
            )
        {
            return true;
        }
        self.by_radio
            && any_match(
                &a.identifiers_by_role(Role::From),
                &b.identifiers_by_role(Role::From),
                radio_value,
            )
    }
}

enum ControlRequest {
    Stop,
}

/// Duplicate detection for the segments of one system.
pub struct SystemDuplicateCallDetector {
    system: String,
    me: Weak<SystemDuplicateCallDetector>,
    policy: DuplicatePolicy,
    listener: Option<Arc<dyn DuplicateCallListener>>,
    scheduler: Scheduler,
    queue: Mutex<Vec<SegmentLease>>,
    /// Lock order is `queue` then `tracked`.
    tracked: Mutex<Vec<SegmentLease>>,
    monitoring: AtomicBool,
    monitor: Mutex<Option<ScheduledTask>>,
    control_tx: mpsc::UnboundedSender<ControlRequest>,
}

impl SystemDuplicateCallDetector {
    pub fn new(
        system: impl Into<String>,
        policy: DuplicatePolicy,
        listener: Option<Arc<dyn DuplicateCallListener>>,
        scheduler: Scheduler,
    ) -> Arc<Self> {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let detector = Arc::new_cyclic(|me| Self {
            system: system.into(),
            me: me.clone(),
            policy,
            listener,
            scheduler: scheduler.clone(),
            queue: Mutex::new(Vec::new()),
            tracked: Mutex::new(Vec::new()),
            monitoring: AtomicBool::new(false),
            monitor: Mutex::new(None),
            control_tx,
        });

        // Stopping happens here rather than inside a tick, which would cancel
        // the task it is running on.
        let weak = Arc::downgrade(&detector);
        scheduler.spawn(async move {
            while let Some(request) = control_rx.recv().await {
                let Some(detector) = weak.upgrade() else {
                    break;
                };
                match request {
                    ControlRequest::Stop => detector.stop_if_idle(),
                }
            }
        });
        detector
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Acquire)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Queue a segment and make sure the monitor is running.
    pub fn add(&self, lease: SegmentLease) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push(lease);
        if self
            .monitoring
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("Duplicate monitor started for {}", self.system);
            let me = self.me.clone();
            let task = self.scheduler.schedule_at_fixed_rate(
                "duplicate call detector",
                Duration::ZERO,
                MONITOR_PERIOD,
                move || {
                    if let Some(detector) = me.upgrade() {
                        detector.process();
                    }
                },
            );
            *self.monitor.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        }
    }

    /// One comparison pass.
    pub fn process(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
        tracked.extend(queue.drain(..));
        drop(queue);
        tracked.retain(|lease| !lease.is_complete() && !lease.is_encrypted());

        for i in 0..tracked.len() {
            if tracked[i].is_duplicate() || !tracked[i].has_audio() {
                continue;
            }
            for j in (i + 1)..tracked.len() {
                if tracked[j].is_duplicate() || !self.policy.is_duplicate(&tracked[i], &tracked[j])
                {
                    continue;
                }
                for to in tracked[j].identifiers_by_role(Role::To) {
                    if !tracked[i].has_identifier(&to) {
                        tracked[i].merge_identifier(to);
                    }
                }
                tracked[j].set_duplicate(true);
            }
        }

        let (duplicates, kept): (Vec<SegmentLease>, Vec<SegmentLease>) =
            tracked.drain(..).partition(|lease| lease.is_duplicate());
        *tracked = kept;
        let idle = tracked.is_empty();
        drop(tracked);

        for duplicate in duplicates {
            debug!(
                "Segment {} flagged duplicate on {}",
                duplicate.id(),
                self.system
            );
            if let Some(listener) = &self.listener {
                listener.duplicate_detected(&duplicate);
            }
        }

        if idle && self.queue.lock().unwrap_or_else(|e| e.into_inner()).is_empty() {
            let _ = self.control_tx.send(ControlRequest::Stop);
        }
    }

    /// Cancel the monitor and release every segment.
    pub fn shutdown(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        self.cancel_monitor();
        queue.clear();
        drop(queue);
        self.tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Runs on the control task. A Stop sent by an idle tick may arrive after
    /// later segments were queued or already moved into `tracked`.
    fn stop_if_idle(&self) {
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
        if queue.is_empty() && tracked.is_empty() {
            self.cancel_monitor();
            debug!("Duplicate monitor stopped for {}", self.system);
        }
    }

    /// Callers hold the queue lock.
    fn cancel_monitor(&self) {
        if let Some(task) = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.cancel();
        }
        self.monitoring.store(false, Ordering::Release);
    }
}

/// Routes segments to a [`SystemDuplicateCallDetector`] per system.
pub struct DuplicateCallDetector {
    enabled: bool,
    policy: DuplicatePolicy,
    listener: Option<Arc<dyn DuplicateCallListener>>,
    scheduler: Scheduler,
    detectors: Mutex<HashMap<String, Arc<SystemDuplicateCallDetector>>>,
}

impl DuplicateCallDetector {
    pub fn new(config: &DuplicateConfig, scheduler: Scheduler) -> Self {
        if config.enabled {
            info!(
                "Duplicate call detection enabled (talkgroup: {}, radio: {})",
                config.by_talkgroup, config.by_radio
            );
        }
        Self {
            enabled: config.enabled,
            policy: DuplicatePolicy::from(config),
            listener: None,
            scheduler,
            detectors: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn DuplicateCallListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn system_detector(&self, system: &str) -> Option<Arc<SystemDuplicateCallDetector>> {
        self.detectors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(system)
            .cloned()
    }

    /// Shut down every system detector.
    pub fn stop(&self) {
        let detectors: Vec<_> = self
            .detectors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, d)| d)
            .collect();
        for detector in detectors {
            detector.shutdown();
        }
    }
}

impl AudioSegmentReceiver for DuplicateCallDetector {
    fn receive(&self, lease: SegmentLease) {
        if !self.enabled {
            return;
        }
        let Some(system) = lease.system_name() else {
            return;
        };
        let detector = {
            let mut detectors = self.detectors.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(detectors.entry(system.clone()).or_insert_with(|| {
                SystemDuplicateCallDetector::new(
                    system,
                    self.policy,
                    self.listener.clone(),
                    self.scheduler.clone(),
                )
            }))
        };
        detector.add(lease);
    }
}
