// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Audio segment intake, call tracking and retention.
//!
//! [`AudioManager`] receives every segment a decoder produces. Each segment
//! is handed to the duplicate detector and to the
//! [`ActiveAudioSegmentProcessor`], which turns it into a call record,
//! records its audio and completes the call once the producer is done.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use tracing::{error, info};

use trunk_app::LoggingSuppressor;
use trunk_core::audio::{AudioSegmentBroadcaster, AudioSegmentReceiver, SegmentLease};
use trunk_core::call::{Call, CallEventEmitter, CallEventListener, CallRepository};
use trunk_core::events::ListenerId;
use trunk_core::schedule::{ScheduledTask, Scheduler};

use crate::active_segment::ActiveAudioSegment;
use crate::config::{CallsConfig, ServerConfig};
use crate::duplicate::{DuplicateCallDetector, DuplicateCallListener};
use crate::recording::recording_path;
use crate::retention::CallAgeOffProcessor;

pub const PROCESSOR_INITIAL_DELAY: Duration = Duration::from_millis(100);
pub const PROCESSOR_PERIOD: Duration = Duration::from_millis(500);
pub const RETENTION_INITIAL_DELAY: Duration = Duration::from_secs(30);
pub const RETENTION_PERIOD: Duration = Duration::from_secs(30);

const LOG_MAX_PER_KEY: usize = 5;

/// Claim on a busy flag, released on drop.
pub(crate) struct SingleFlight<'a>(&'a AtomicBool);

impl<'a> SingleFlight<'a> {
    /// `None` when another pass holds the flag.
    pub(crate) fn enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SingleFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Tracks in-flight segments and maintains their call records.
pub struct ActiveAudioSegmentProcessor {
    repository: Arc<dyn CallRepository>,
    emitter: Arc<CallEventEmitter>,
    calls: CallsConfig,
    queue: Mutex<Vec<SegmentLease>>,
    /// Keyed by segment id, so iteration follows arrival order.
    active: Mutex<BTreeMap<u64, ActiveAudioSegment>>,
    processing: AtomicBool,
    call_number: AtomicU64,
    suppressor: Arc<LoggingSuppressor>,
}

impl ActiveAudioSegmentProcessor {
    pub fn new(
        repository: Arc<dyn CallRepository>,
        emitter: Arc<CallEventEmitter>,
        calls: CallsConfig,
    ) -> Self {
        Self {
            repository,
            emitter,
            calls,
            queue: Mutex::new(Vec::new()),
            active: Mutex::new(BTreeMap::new()),
            processing: AtomicBool::new(false),
            call_number: AtomicU64::new(1),
            suppressor: Arc::new(LoggingSuppressor::new(LOG_MAX_PER_KEY)),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// One processing pass. Overlapping calls return immediately.
    pub fn process(&self) {
        let Some(_processing) = SingleFlight::enter(&self.processing) else {
            return;
        };

        if let Err(e) = catch_unwind(AssertUnwindSafe(|| self.process_active())) {
            error!("Error processing active audio segments: {:?}", e);
        }
        if let Err(e) = catch_unwind(AssertUnwindSafe(|| self.process_queued())) {
            error!("Error processing queued audio segments: {:?}", e);
        }
    }

    /// Complete every tracked call and release every lease.
    pub fn shutdown(&self) {
        let active = std::mem::take(&mut *self.active.lock().unwrap_or_else(|e| e.into_inner()));
        for (_, mut segment) in active {
            segment.dispose();
            self.save(segment.call_mut());
        }
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn process_active(&self) {
        let mut updated: Vec<Call> = Vec::new();
        let mut completed: Vec<ActiveAudioSegment> = Vec::new();
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            let ids: Vec<u64> = active.keys().copied().collect();
            for id in ids {
                let Some(segment) = active.get_mut(&id) else {
                    continue;
                };
                if segment.update() {
                    updated.push(segment.call().clone());
                }
                if segment.is_complete() {
                    if let Some(segment) = active.remove(&id) {
                        completed.push(segment);
                    }
                }
            }
        }

        for call in &updated {
            self.emitter.notify_updated(call);
        }

        for mut segment in completed {
            segment.close_audio();
            segment.call_mut().complete = true;
            self.save(segment.call_mut());
            let (call, lease) = segment.into_parts();
            self.emitter.notify_completed(&call, &lease);
        }
    }

    fn process_queued(&self) {
        let queued = std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()));
        for lease in queued {
            let tracked = self
                .active
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get_mut(&lease.id())
                .map(|segment| segment.update().then(|| segment.call().clone()));
            if let Some(changed) = tracked {
                // Already tracked; the extra lease is dropped here.
                if let Some(call) = changed {
                    self.emitter.notify_updated(&call);
                }
                continue;
            }

            let mut segment =
                ActiveAudioSegment::new(lease, self.next_recording_path(), self.suppressor.clone());
            self.save(segment.call_mut());
            let call = segment.call().clone();
            self.active
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(segment.segment_id(), segment);
            self.emitter.notify_added(&call);
        }
    }

    fn next_recording_path(&self) -> Option<PathBuf> {
        if !self.calls.record {
            return None;
        }
        let number = self.call_number.fetch_add(1, Ordering::Relaxed);
        let path = recording_path(&self.calls.directory, Local::now(), number);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                self.suppressor.error(
                    "Call Directory",
                    &format!("Failed to create {}: {}", parent.display(), e),
                );
                return None;
            }
        }
        Some(path)
    }

    fn save(&self, call: &mut Call) {
        if let Err(e) = self.repository.save(call) {
            self.suppressor
                .error("Call Save", &format!("Failed to save call: {}", e));
        }
    }
}

impl AudioSegmentReceiver for ActiveAudioSegmentProcessor {
    fn receive(&self, lease: SegmentLease) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(lease);
    }
}

/// Entry point for decoded audio segments.
pub struct AudioManager {
    broadcaster: AudioSegmentBroadcaster,
    processor: Arc<ActiveAudioSegmentProcessor>,
    duplicate_detector: Arc<DuplicateCallDetector>,
    age_off: Arc<CallAgeOffProcessor>,
    emitter: Arc<CallEventEmitter>,
    scheduler: Scheduler,
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl AudioManager {
    pub fn new(
        config: &ServerConfig,
        repository: Arc<dyn CallRepository>,
        scheduler: Scheduler,
        duplicate_listener: Option<Arc<dyn DuplicateCallListener>>,
    ) -> Self {
        let emitter = Arc::new(CallEventEmitter::new());
        let processor = Arc::new(ActiveAudioSegmentProcessor::new(
            repository.clone(),
            emitter.clone(),
            config.calls.clone(),
        ));
        let mut duplicate_detector = DuplicateCallDetector::new(&config.duplicate, scheduler.clone());
        if let Some(listener) = duplicate_listener {
            duplicate_detector = duplicate_detector.with_listener(listener);
        }
        let age_off = Arc::new(CallAgeOffProcessor::new(
            repository,
            emitter.clone(),
            config.calls.directory.clone(),
            config.retention.clone(),
        ));
        let duplicate_detector = Arc::new(duplicate_detector);

        // The duplicate detector sees each segment first so duplicates are
        // flagged before the first processor pass.
        let broadcaster = AudioSegmentBroadcaster::new();
        broadcaster.add_receiver(duplicate_detector.clone());
        broadcaster.add_receiver(processor.clone());

        Self {
            broadcaster,
            processor,
            duplicate_detector,
            age_off,
            emitter,
            scheduler,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn add_call_event_listener(&self, listener: Arc<dyn CallEventListener>) -> ListenerId {
        self.emitter.register(listener)
    }

    pub fn processor(&self) -> &Arc<ActiveAudioSegmentProcessor> {
        &self.processor
    }

    /// Schedule segment processing and the retention sweep.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            return;
        }
        let processor = Arc::clone(&self.processor);
        tasks.push(self.scheduler.schedule_at_fixed_rate(
            "active audio segment processor",
            PROCESSOR_INITIAL_DELAY,
            PROCESSOR_PERIOD,
            move || processor.process(),
        ));
        let age_off = Arc::clone(&self.age_off);
        tasks.push(self.scheduler.schedule_at_fixed_rate(
            "call age off",
            RETENTION_INITIAL_DELAY,
            RETENTION_PERIOD,
            move || age_off.process(),
        ));
        info!("Audio manager started");
    }

    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in &tasks {
            task.cancel();
        }
        self.processor.shutdown();
        self.duplicate_detector.stop();
        info!("Audio manager stopped");
    }
}

impl AudioSegmentReceiver for AudioManager {
    fn receive(&self, lease: SegmentLease) {
        self.broadcaster.broadcast(lease);
    }
}
