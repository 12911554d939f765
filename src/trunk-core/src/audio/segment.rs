// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Reference-counted audio segments.
//!
//! An [`AudioSegment`] carries the audio and identifiers of one call while
//! the producer is still appending to it. Every consumer holds a
//! [`SegmentLease`]; when the last lease is released the segment disposes
//! its buffers exactly once.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::alias::{AliasList, DEFAULT_PRIORITY, DO_NOT_MONITOR};
use crate::events::{ListenerId, ListenerSet};
use crate::identifier::{
    Identifier, IdentifierCollection, IdentifierUpdateNotification, IdentifierValue, Role,
};

/// Samples per millisecond of segment audio (8 kHz).
pub const SAMPLES_PER_MS: u64 = 8;

/// Skew subtracted from the start timestamp when the first buffer arrives.
const START_TIMESTAMP_SKEW_MS: u64 = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("audio segment {0} is being disposed")]
    Disposed(u64),
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Observer of segment property changes.
///
/// All methods have default no-op implementations. Notifications fire only
/// when the value actually changes.
pub trait AudioSegmentListener: Send + Sync {
    fn on_complete(&self, _segment_id: u64) {}

    fn on_duplicate_change(&self, _segment_id: u64, _duplicate: bool) {}

    fn on_encrypted_change(&self, _segment_id: u64, _encrypted: bool) {}

    fn on_record_audio_change(&self, _segment_id: u64, _record: bool) {}

    fn on_monitor_priority_change(&self, _segment_id: u64, _old: i32, _new: i32) {}

    fn on_broadcast_channels_change(&self, _segment_id: u64, _channels: &BTreeSet<String>) {}

    /// Re-broadcast of an identifier update accepted by this segment.
    fn on_identifier_update(&self, _segment_id: u64, _notification: &IdentifierUpdateNotification) {
    }
}

/// Creates segments with ids from its own counter.
pub struct AudioSegmentFactory {
    next_id: AtomicU64,
    alias_list: Arc<AliasList>,
}

impl AudioSegmentFactory {
    pub fn new(alias_list: Arc<AliasList>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            alias_list,
        }
    }

    pub fn alias_list(&self) -> &Arc<AliasList> {
        &self.alias_list
    }

    /// Create a segment for the timeslot. The consumer count starts at zero;
    /// the producer takes its own lease with [`SegmentLease::acquire`].
    pub fn create(&self, timeslot: u8) -> Arc<AudioSegment> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Arc::new(AudioSegment::new(id, timeslot, Arc::clone(&self.alias_list)))
    }
}

pub struct AudioSegment {
    id: u64,
    timeslot: u8,
    alias_list: Arc<AliasList>,
    complete: AtomicBool,
    duplicate: AtomicBool,
    encrypted: AtomicBool,
    record_audio: AtomicBool,
    monitor_priority: AtomicI32,
    disposing: AtomicBool,
    consumer_count: AtomicI32,
    start_timestamp: AtomicU64,
    sample_count: AtomicU64,
    broadcast_channels: RwLock<BTreeSet<String>>,
    buffers: RwLock<Vec<Arc<[f32]>>>,
    identifiers: RwLock<IdentifierCollection>,
    linked: RwLock<Option<Arc<AudioSegment>>>,
    listeners: ListenerSet<dyn AudioSegmentListener>,
}

impl fmt::Debug for AudioSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSegment")
            .field("id", &self.id)
            .field("timeslot", &self.timeslot)
            .field("complete", &self.is_complete())
            .field("duplicate", &self.is_duplicate())
            .field("encrypted", &self.is_encrypted())
            .field("consumers", &self.consumer_count())
            .field("samples", &self.sample_count())
            .finish()
    }
}

impl AudioSegment {
    fn new(id: u64, timeslot: u8, alias_list: Arc<AliasList>) -> Self {
        Self {
            id,
            timeslot,
            alias_list,
            complete: AtomicBool::new(false),
            duplicate: AtomicBool::new(false),
            encrypted: AtomicBool::new(false),
            record_audio: AtomicBool::new(false),
            monitor_priority: AtomicI32::new(DEFAULT_PRIORITY),
            disposing: AtomicBool::new(false),
            consumer_count: AtomicI32::new(0),
            start_timestamp: AtomicU64::new(now_millis()),
            sample_count: AtomicU64::new(0),
            broadcast_channels: RwLock::new(BTreeSet::new()),
            buffers: RwLock::new(Vec::new()),
            identifiers: RwLock::new(IdentifierCollection::new()),
            linked: RwLock::new(None),
            listeners: ListenerSet::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn timeslot(&self) -> u8 {
        self.timeslot
    }

    pub fn alias_list(&self) -> &AliasList {
        &self.alias_list
    }

    pub fn add_listener(&self, listener: Arc<dyn AudioSegmentListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.unregister(id);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Mark the segment complete. The producer appends nothing afterwards.
    pub fn set_complete(&self) {
        if !self.complete.swap(true, Ordering::AcqRel) {
            self.listeners.notify(|l| l.on_complete(self.id));
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate.load(Ordering::Acquire)
    }

    pub fn set_duplicate(&self, duplicate: bool) {
        if self.duplicate.swap(duplicate, Ordering::AcqRel) != duplicate {
            self.listeners
                .notify(|l| l.on_duplicate_change(self.id, duplicate));
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted.load(Ordering::Acquire)
    }

    fn set_encrypted(&self, encrypted: bool) {
        if self.encrypted.swap(encrypted, Ordering::AcqRel) != encrypted {
            self.listeners
                .notify(|l| l.on_encrypted_change(self.id, encrypted));
        }
    }

    pub fn record_audio(&self) -> bool {
        self.record_audio.load(Ordering::Acquire)
    }

    pub fn monitor_priority(&self) -> i32 {
        self.monitor_priority.load(Ordering::Acquire)
    }

    pub fn is_do_not_monitor(&self) -> bool {
        self.monitor_priority() <= DO_NOT_MONITOR
    }

    pub fn broadcast_channels(&self) -> BTreeSet<String> {
        self.broadcast_channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn has_broadcast_channels(&self) -> bool {
        !self
            .broadcast_channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    pub fn is_disposing(&self) -> bool {
        self.disposing.load(Ordering::Acquire)
    }

    pub fn consumer_count(&self) -> i32 {
        self.consumer_count.load(Ordering::Acquire)
    }

    /// Start timestamp in milliseconds since the epoch.
    pub fn start_timestamp(&self) -> u64 {
        self.start_timestamp.load(Ordering::Acquire)
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count.load(Ordering::Acquire)
    }

    pub fn duration_ms(&self) -> u64 {
        self.sample_count() / SAMPLES_PER_MS
    }

    /// Append one buffer of 8 kHz samples.
    pub fn add_audio(&self, buffer: impl Into<Arc<[f32]>>) -> Result<(), SegmentError> {
        let buffer = buffer.into();
        let mut buffers = self.buffers.write().unwrap_or_else(|e| e.into_inner());
        if self.is_disposing() {
            return Err(SegmentError::Disposed(self.id));
        }
        if buffers.is_empty() {
            self.start_timestamp.store(
                now_millis().saturating_sub(START_TIMESTAMP_SKEW_MS),
                Ordering::Release,
            );
        }
        self.sample_count
            .fetch_add(buffer.len() as u64, Ordering::AcqRel);
        buffers.push(buffer);
        Ok(())
    }

    pub fn has_audio(&self) -> bool {
        self.audio_buffer_count() > 0
    }

    pub fn audio_buffer_count(&self) -> usize {
        self.buffers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Snapshot of buffers starting at `index`, for incremental readers.
    pub fn audio_buffers_from(&self, index: usize) -> Vec<Arc<[f32]>> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        buffers.iter().skip(index).cloned().collect()
    }

    pub fn audio_buffers(&self) -> Vec<Arc<[f32]>> {
        self.audio_buffers_from(0)
    }

    /// Snapshot of the identifier collection.
    pub fn identifiers(&self) -> IdentifierCollection {
        self.identifiers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn identifiers_by_role(&self, role: Role) -> Vec<Identifier> {
        self.identifiers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .identifiers_by_role(role)
    }

    pub fn has_identifier(&self, identifier: &Identifier) -> bool {
        self.identifiers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(identifier)
    }

    pub fn system_name(&self) -> Option<String> {
        self.identifiers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .system_name()
            .map(str::to_string)
    }

    /// Merge an identifier, replacing one with the same class, form and role,
    /// and apply the flags of its aliases.
    pub fn add_identifier(&self, identifier: Identifier) {
        {
            let mut ids = self.identifiers.write().unwrap_or_else(|e| e.into_inner());
            ids.update(identifier.clone());
        }
        self.apply_identifier(&identifier);
    }

    /// Append an identifier alongside existing ones of the same form.
    ///
    /// Used when a duplicate call hands its talkgroup to the call that is kept
    /// so recording and streaming follow both aliases.
    pub fn merge_identifier(&self, identifier: Identifier) {
        let added = {
            let mut ids = self.identifiers.write().unwrap_or_else(|e| e.into_inner());
            ids.add(identifier.clone())
        };
        if added {
            self.apply_identifier(&identifier);
        }
    }

    fn apply_identifier(&self, identifier: &Identifier) {
        if let IdentifierValue::EncryptionKey { encrypted, .. } = identifier.value {
            self.set_encrypted(encrypted);
        }

        for alias in self.alias_list.aliases_for(identifier) {
            if alias.recordable && !self.record_audio.swap(true, Ordering::AcqRel) {
                self.listeners
                    .notify(|l| l.on_record_audio_change(self.id, true));
            }

            if !alias.broadcast_channels.is_empty() {
                let changed = {
                    let mut channels = self
                        .broadcast_channels
                        .write()
                        .unwrap_or_else(|e| e.into_inner());
                    let before = channels.len();
                    channels.extend(alias.broadcast_channels.iter().cloned());
                    (channels.len() != before).then(|| channels.clone())
                };
                if let Some(channels) = changed {
                    self.listeners
                        .notify(|l| l.on_broadcast_channels_change(self.id, &channels));
                }
            }

            let priority = alias.playback_priority;
            let old = self.monitor_priority.fetch_min(priority, Ordering::AcqRel);
            if priority < old {
                self.listeners
                    .notify(|l| l.on_monitor_priority_change(self.id, old, priority));
            }
        }
    }

    /// Apply a decoder identifier update addressed to this segment's timeslot.
    pub fn receive_identifier_update(&self, notification: &IdentifierUpdateNotification) {
        if notification.timeslot != self.timeslot {
            return;
        }
        if notification.operation.is_add() {
            self.add_identifier(notification.identifier.clone());
        }
        self.listeners
            .notify(|l| l.on_identifier_update(self.id, notification));
    }

    /// Chain this segment after `previous` in a continuous stream.
    pub fn link_to(&self, previous: Arc<AudioSegment>) {
        let mut linked = self.linked.write().unwrap_or_else(|e| e.into_inner());
        *linked = Some(previous);
    }

    pub fn is_linked(&self) -> bool {
        self.linked
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn is_linked_to(&self, other: &AudioSegment) -> bool {
        self.linked
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|previous| std::ptr::eq(previous.as_ref(), other))
    }

    pub fn increment_consumer_count(&self) {
        self.consumer_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one consumer. Disposes once the count reaches zero.
    pub fn decrement_consumer_count(&self) {
        let count = self.consumer_count.fetch_sub(1, Ordering::AcqRel) - 1;
        if count <= 0 {
            self.dispose();
        }
    }

    fn dispose(&self) {
        if self.disposing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.buffers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.identifiers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.listeners.clear();
        self.linked
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

/// A counted claim on an [`AudioSegment`].
///
/// Acquiring or cloning a lease increments the consumer count; dropping it
/// decrements the count.
pub struct SegmentLease {
    segment: Arc<AudioSegment>,
}

impl SegmentLease {
    pub fn acquire(segment: &Arc<AudioSegment>) -> Self {
        segment.increment_consumer_count();
        Self {
            segment: Arc::clone(segment),
        }
    }

    pub fn segment(&self) -> &Arc<AudioSegment> {
        &self.segment
    }
}

impl Clone for SegmentLease {
    fn clone(&self) -> Self {
        Self::acquire(&self.segment)
    }
}

impl Drop for SegmentLease {
    fn drop(&mut self) {
        self.segment.decrement_consumer_count();
    }
}

impl Deref for SegmentLease {
    type Target = AudioSegment;

    fn deref(&self) -> &AudioSegment {
        &self.segment
    }
}

impl fmt::Debug for SegmentLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SegmentLease").field(&self.segment.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{Alias, AliasId};
    use crate::identifier::Operation;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn factory() -> AudioSegmentFactory {
        AudioSegmentFactory::new(Arc::new(AliasList::new(
            "test",
            vec![
                Alias {
                    recordable: true,
                    broadcast_channels: vec!["icecast".to_string()],
                    playback_priority: 20,
                    ..Alias::new("Dispatch", vec![AliasId::Talkgroup { value: 100 }])
                },
                Alias {
                    broadcast_channels: vec!["icecast".to_string(), "rdio".to_string()],
                    playback_priority: 50,
                    ..Alias::new("Unit", vec![AliasId::Radio { value: 42 }])
                },
                Alias {
                    playback_priority: DO_NOT_MONITOR,
                    ..Alias::new("Quiet", vec![AliasId::Talkgroup { value: 666 }])
                },
            ],
        )))
    }

    #[derive(Default)]
    struct Recorder {
        completes: AtomicUsize,
        priorities: Mutex<Vec<(i32, i32)>>,
        updates: AtomicUsize,
    }

    impl AudioSegmentListener for Recorder {
        fn on_complete(&self, _segment_id: u64) {
            self.completes.fetch_add(1, Ordering::Relaxed);
        }

        fn on_monitor_priority_change(&self, _segment_id: u64, old: i32, new: i32) {
            self.priorities.lock().unwrap().push((old, new));
        }

        fn on_identifier_update(&self, _id: u64, _n: &IdentifierUpdateNotification) {
            self.updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_dispose_only_when_count_returns_to_zero() {
        let segment = factory().create(0);
        segment.add_audio(vec![0.0; 160]).unwrap();

        // +1 +1 -1 +1 -1 -1
        segment.increment_consumer_count();
        segment.increment_consumer_count();
        segment.decrement_consumer_count();
        assert!(segment.has_audio());
        segment.increment_consumer_count();
        segment.decrement_consumer_count();
        assert!(segment.has_audio());
        assert!(!segment.is_disposing());
        segment.decrement_consumer_count();
        assert!(segment.is_disposing());
        assert!(!segment.has_audio());
        assert!(segment.identifiers().is_empty());
    }

    #[test]
    fn test_lease_raii() {
        let segment = factory().create(0);
        segment.add_audio(vec![0.0; 8]).unwrap();
        let lease = SegmentLease::acquire(&segment);
        let second = lease.clone();
        assert_eq!(segment.consumer_count(), 2);
        drop(lease);
        assert!(!segment.is_disposing());
        drop(second);
        assert_eq!(segment.consumer_count(), 0);
        assert!(segment.is_disposing());
    }

    #[test]
    fn test_add_audio_after_dispose_fails() {
        let segment = factory().create(0);
        drop(SegmentLease::acquire(&segment));
        assert_eq!(
            segment.add_audio(vec![0.0; 8]),
            Err(SegmentError::Disposed(segment.id()))
        );
    }

    #[test]
    fn test_duration_is_samples_over_eight() {
        let segment = factory().create(0);
        assert_eq!(segment.duration_ms(), 0);
        for len in [1usize, 7, 160, 333] {
            segment.add_audio(vec![0.0; len]).unwrap();
        }
        assert_eq!(segment.sample_count(), 501);
        assert_eq!(segment.duration_ms(), 501 / 8);
    }

    #[test]
    fn test_first_buffer_sets_skewed_start() {
        let segment = factory().create(0);
        let before = now_millis();
        segment.add_audio(vec![0.0; 8]).unwrap();
        let start = segment.start_timestamp();
        assert!(start + START_TIMESTAMP_SKEW_MS >= before);
        assert!(start <= now_millis() - START_TIMESTAMP_SKEW_MS + 1);
    }

    #[test]
    fn test_alias_flags_merge() {
        let segment = factory().create(0);
        let recorder = Arc::new(Recorder::default());
        segment.add_listener(recorder.clone());

        segment.add_identifier(Identifier::radio(42, Role::From));
        assert!(!segment.record_audio());
        assert_eq!(segment.monitor_priority(), 50);

        segment.add_identifier(Identifier::talkgroup(100, Role::To));
        assert!(segment.record_audio());
        assert_eq!(segment.monitor_priority(), 20);
        assert_eq!(
            segment.broadcast_channels().into_iter().collect::<Vec<_>>(),
            vec!["icecast".to_string(), "rdio".to_string()]
        );

        // A later, less important alias never raises the priority back.
        segment.add_identifier(Identifier::radio(42, Role::From));
        assert_eq!(segment.monitor_priority(), 20);
        assert_eq!(
            *recorder.priorities.lock().unwrap(),
            vec![(DEFAULT_PRIORITY, 50), (50, 20)]
        );
    }

    #[test]
    fn test_do_not_monitor() {
        let segment = factory().create(0);
        segment.add_identifier(Identifier::talkgroup(666, Role::To));
        assert!(segment.is_do_not_monitor());
    }

    #[test]
    fn test_encryption_key_sets_encrypted() {
        let segment = factory().create(0);
        segment.add_identifier(Identifier::encryption_key(5, false));
        assert!(!segment.is_encrypted());
        segment.add_identifier(Identifier::encryption_key(5, true));
        assert!(segment.is_encrypted());
    }

    #[test]
    fn test_identifier_update_respects_timeslot() {
        let segment = factory().create(1);
        let recorder = Arc::new(Recorder::default());
        segment.add_listener(recorder.clone());

        let wrong_slot = IdentifierUpdateNotification::new(
            Identifier::talkgroup(100, Role::To),
            Operation::Add,
            0,
        );
        segment.receive_identifier_update(&wrong_slot);
        assert!(segment.identifiers().is_empty());
        assert_eq!(recorder.updates.load(Ordering::Relaxed), 0);

        let silent = IdentifierUpdateNotification::new(
            Identifier::talkgroup(100, Role::To),
            Operation::SilentAdd,
            1,
        );
        segment.receive_identifier_update(&silent);
        assert_eq!(segment.identifiers().len(), 1);

        let removal = IdentifierUpdateNotification::new(
            Identifier::radio(42, Role::From),
            Operation::Remove,
            1,
        );
        segment.receive_identifier_update(&removal);
        assert_eq!(segment.identifiers().len(), 1);
        assert_eq!(recorder.updates.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_complete_notifies_once() {
        let segment = factory().create(0);
        let recorder = Arc::new(Recorder::default());
        segment.add_listener(recorder.clone());
        segment.set_complete();
        segment.set_complete();
        assert!(segment.is_complete());
        assert_eq!(recorder.completes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_link_cleared_on_dispose() {
        let factory = factory();
        let first = factory.create(0);
        let second = factory.create(0);
        second.link_to(Arc::clone(&first));
        assert!(second.is_linked());
        assert!(second.is_linked_to(&first));
        assert!(!first.is_linked_to(&second));

        drop(SegmentLease::acquire(&second));
        assert!(!second.is_linked());
    }

    #[test]
    fn test_factory_ids_increase() {
        let factory = factory();
        let a = factory.create(0);
        let b = factory.create(0);
        assert!(b.id() > a.id());
    }
}
