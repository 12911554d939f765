// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Durable call records derived from audio segments.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alias::{AliasList, DEFAULT_PRIORITY};
use crate::audio::{AudioSegment, SegmentLease};
use crate::events::{ListenerId, ListenerSet};
use crate::identifier::{Form, Identifier};

/// Persistent view of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Call {
    /// Repository-assigned id, 0 until first saved.
    pub id: u64,
    /// Call start in milliseconds since the epoch.
    pub event_time: u64,
    /// Path of the call recording.
    pub file: Option<String>,
    pub complete: bool,
    pub call_type: Option<String>,
    pub system: Option<String>,
    pub site: Option<String>,
    pub channel: Option<String>,
    /// Channel frequency in MHz.
    pub frequency: f64,
    pub protocol: Option<String>,
    pub to_id: Option<String>,
    pub to_alias: Option<String>,
    pub from_id: Option<String>,
    pub from_alias: Option<String>,
    /// Duration in seconds.
    pub duration: f64,
    pub duplicate: bool,
    pub record: bool,
    pub stream: bool,
    pub monitor: i32,
}

impl Default for Call {
    fn default() -> Self {
        Self {
            id: 0,
            event_time: 0,
            file: None,
            complete: false,
            call_type: None,
            system: None,
            site: None,
            channel: None,
            frequency: 0.0,
            protocol: None,
            to_id: None,
            to_alias: None,
            from_id: None,
            from_alias: None,
            duration: 0.0,
            duplicate: false,
            record: false,
            stream: false,
            monitor: DEFAULT_PRIORITY,
        }
    }
}

impl Call {
    /// Build the initial call record for a segment.
    pub fn from_segment(segment: &AudioSegment) -> Self {
        let ids = segment.identifiers();
        let mut call = Call {
            event_time: segment.start_timestamp(),
            protocol: ids.protocol().map(str::to_string),
            system: ids.system_name().map(str::to_string),
            site: ids.site_name().map(str::to_string),
            channel: ids.channel_name().map(str::to_string),
            frequency: ids.frequency_hz().map(|hz| hz as f64 / 1e6).unwrap_or(0.0),
            ..Call::default()
        };
        call.update_from(ids.from_identifier(), segment.alias_list());
        call.update_to(ids.to_identifier(), segment.alias_list());
        call.update_duration(segment.duration_ms());
        call.update_flags(segment);
        call
    }

    /// Refresh all segment-derived fields. Returns true when anything changed.
    pub fn update(&mut self, segment: &AudioSegment) -> bool {
        let ids = segment.identifiers();
        let mut updated = false;
        updated |= self.update_to(ids.to_identifier(), segment.alias_list());
        updated |= self.update_from(ids.from_identifier(), segment.alias_list());
        updated |= self.update_duration(segment.duration_ms());
        updated |= self.update_flags(segment);
        updated
    }

    fn update_to(&mut self, to: Option<&Identifier>, aliases: &AliasList) -> bool {
        let Some(to) = to else {
            return false;
        };
        let to_id = Some(to.to_string());
        let to_alias = aliases.alias_names(to);
        let call_type = Some(call_type_name(to.form()));
        if self.to_id == to_id && self.to_alias == to_alias && self.call_type == call_type {
            return false;
        }
        self.to_id = to_id;
        self.to_alias = to_alias;
        self.call_type = call_type;
        true
    }

    fn update_from(&mut self, from: Option<&Identifier>, aliases: &AliasList) -> bool {
        let Some(from) = from else {
            return false;
        };
        let from_id = Some(from.to_string());
        let from_alias = aliases.alias_names(from);
        if self.from_id == from_id && self.from_alias == from_alias {
            return false;
        }
        self.from_id = from_id;
        self.from_alias = from_alias;
        true
    }

    fn update_duration(&mut self, duration_ms: u64) -> bool {
        let seconds = duration_ms as f64 / 1000.0;
        if self.duration == seconds {
            return false;
        }
        self.duration = seconds;
        true
    }

    fn update_flags(&mut self, segment: &AudioSegment) -> bool {
        let mut updated = false;
        if self.duplicate != segment.is_duplicate() {
            self.duplicate = segment.is_duplicate();
            updated = true;
        }
        if self.record != segment.record_audio() {
            self.record = segment.record_audio();
            updated = true;
        }
        if self.stream != segment.has_broadcast_channels() {
            self.stream = segment.has_broadcast_channels();
            updated = true;
        }
        if self.monitor != segment.monitor_priority() {
            self.monitor = segment.monitor_priority();
            updated = true;
        }
        updated
    }
}

/// Display name of the call type implied by the TO identifier form.
pub fn call_type_name(form: Form) -> String {
    match form {
        Form::Talkgroup => "Talk Group".to_string(),
        Form::Radio => "Private".to_string(),
        Form::PatchGroup => "Patch Group".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("call storage error: {0}")]
    Storage(String),
    #[error("call {0} not found")]
    NotFound(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn of(page: usize, size: usize) -> Self {
        Self { page, size }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub content: Vec<T>,
    /// Number of matching records across all pages.
    pub total_elements: usize,
}

impl<T> Page<T> {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Storage of call records.
pub trait CallRepository: Send + Sync {
    /// Insert or update the call, assigning an id on first save.
    fn save(&self, call: &mut Call) -> Result<(), RepositoryError>;

    fn delete(&self, call: &Call) -> Result<(), RepositoryError>;

    /// Calls with `start <= event_time <= end`, oldest first.
    fn find_calls_by_event_time_between_order_by_event_time(
        &self,
        start: u64,
        end: u64,
        page: PageRequest,
    ) -> Result<Page<Call>, RepositoryError>;
}

/// Trait for components that want to receive call lifecycle events.
///
/// All methods have default no-op implementations.
pub trait CallEventListener: Send + Sync {
    fn call_added(&self, _call: &Call) {}

    fn call_updated(&self, _call: &Call) {}

    /// The listener owns `lease` and may keep the segment audio alive with it.
    fn call_completed(&self, _call: &Call, _lease: SegmentLease) {}

    fn call_deleted(&self, _call: &Call) {}
}

/// Manages registered call event listeners and dispatches events.
#[derive(Default)]
pub struct CallEventEmitter {
    listeners: ListenerSet<dyn CallEventListener>,
}

impl CallEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn CallEventListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn unregister(&self, id: ListenerId) {
        self.listeners.unregister(id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn notify_added(&self, call: &Call) {
        self.listeners.notify(|l| l.call_added(call));
    }

    pub fn notify_updated(&self, call: &Call) {
        self.listeners.notify(|l| l.call_updated(call));
    }

    /// Every listener receives its own lease; `lease` is released afterwards.
    pub fn notify_completed(&self, call: &Call, lease: &SegmentLease) {
        self.listeners
            .notify(|l| l.call_completed(call, lease.clone()));
    }

    pub fn notify_deleted(&self, call: &Call) {
        self.listeners.notify(|l| l.call_deleted(call));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{Alias, AliasId};
    use crate::audio::AudioSegmentFactory;
    use crate::identifier::Role;
    use std::sync::Mutex;

    fn factory() -> AudioSegmentFactory {
        AudioSegmentFactory::new(Arc::new(AliasList::new(
            "test",
            vec![
                Alias {
                    recordable: true,
                    broadcast_channels: vec!["stream".to_string()],
                    playback_priority: 5,
                    ..Alias::new("Dispatch", vec![AliasId::Talkgroup { value: 100 }])
                },
                Alias::new("Dispatch Alt", vec![AliasId::TalkgroupRange { min: 100, max: 101 }]),
                Alias::new("Medic 1", vec![AliasId::Radio { value: 42 }]),
            ],
        )))
    }

    #[test]
    fn test_from_segment_maps_identifiers() {
        let segment = factory().create(0);
        segment.add_identifier(Identifier::system("Metro"));
        segment.add_identifier(Identifier::site("North"));
        segment.add_identifier(Identifier::channel("TG-100"));
        segment.add_identifier(Identifier::frequency(851_012_500));
        segment.add_identifier(Identifier::decoder_type("P25 Phase 1"));
        segment.add_identifier(Identifier::talkgroup(100, Role::To));
        segment.add_identifier(Identifier::radio(42, Role::From));
        segment.add_audio(vec![0.0; 8000]).unwrap();

        let call = Call::from_segment(&segment);
        assert_eq!(call.system.as_deref(), Some("Metro"));
        assert_eq!(call.site.as_deref(), Some("North"));
        assert_eq!(call.channel.as_deref(), Some("TG-100"));
        assert!((call.frequency - 851.0125).abs() < 1e-9);
        assert_eq!(call.protocol.as_deref(), Some("P25 Phase 1"));
        assert_eq!(call.call_type.as_deref(), Some("Talk Group"));
        assert_eq!(call.to_id.as_deref(), Some("100"));
        assert_eq!(call.to_alias.as_deref(), Some("Dispatch;Dispatch Alt"));
        assert_eq!(call.from_id.as_deref(), Some("42"));
        assert_eq!(call.from_alias.as_deref(), Some("Medic 1"));
        assert_eq!(call.duration, 1.0);
        assert!(call.record);
        assert!(call.stream);
        assert_eq!(call.monitor, 5);
        assert_eq!(call.event_time, segment.start_timestamp());
    }

    #[test]
    fn test_update_reports_changes_only() {
        let segment = factory().create(0);
        segment.add_identifier(Identifier::radio(7, Role::To));
        let mut call = Call::from_segment(&segment);
        assert_eq!(call.call_type.as_deref(), Some("Private"));
        assert!(!call.update(&segment));

        segment.add_audio(vec![0.0; 80]).unwrap();
        assert!(call.update(&segment));
        assert_eq!(call.duration, 0.01);

        segment.set_duplicate(true);
        assert!(call.update(&segment));
        assert!(call.duplicate);
        assert!(!call.update(&segment));
    }

    #[test]
    fn test_call_type_names() {
        assert_eq!(call_type_name(Form::PatchGroup), "Patch Group");
        assert_eq!(call_type_name(Form::Talkgroup), "Talk Group");
        assert_eq!(call_type_name(Form::Radio), "Private");
    }

    struct Holder(Mutex<Vec<SegmentLease>>);

    impl CallEventListener for Holder {
        fn call_completed(&self, _call: &Call, lease: SegmentLease) {
            self.0.lock().unwrap().push(lease);
        }
    }

    #[test]
    fn test_completed_gives_each_listener_a_lease() {
        let segment = factory().create(0);
        let emitter = CallEventEmitter::new();
        let a = Arc::new(Holder(Mutex::new(Vec::new())));
        let b = Arc::new(Holder(Mutex::new(Vec::new())));
        emitter.register(a.clone());
        emitter.register(b.clone());

        let lease = SegmentLease::acquire(&segment);
        emitter.notify_completed(&Call::default(), &lease);
        drop(lease);
        assert_eq!(segment.consumer_count(), 2);
        a.0.lock().unwrap().clear();
        b.0.lock().unwrap().clear();
        assert!(segment.is_disposing());
    }

    #[test]
    fn test_call_json_round_trip_defaults() {
        let call: Call = serde_json::from_str(r#"{"id":3,"event_time":10}"#).unwrap();
        assert_eq!(call.id, 3);
        assert_eq!(call.monitor, DEFAULT_PRIORITY);
        assert!(!call.complete);
    }
}
