// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! An in-flight segment tracked by the segment processor: its lease, the
//! call record derived from it, and its recording.

use std::path::PathBuf;
use std::sync::Arc;

use trunk_app::LoggingSuppressor;
use trunk_core::audio::{AudioSegment, SegmentLease};
use trunk_core::call::Call;

use crate::recording::CallRecording;

const RECORDING_WRITE_KEY: &str = "Call Recording Write";

pub struct ActiveAudioSegment {
    lease: SegmentLease,
    call: Call,
    recording: Option<CallRecording>,
    /// Index of the next segment buffer to record.
    buffer_index: usize,
    suppressor: Arc<LoggingSuppressor>,
}

impl ActiveAudioSegment {
    pub fn new(
        lease: SegmentLease,
        recording_path: Option<PathBuf>,
        suppressor: Arc<LoggingSuppressor>,
    ) -> Self {
        let mut call = Call::from_segment(&lease);
        call.file = recording_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        Self {
            lease,
            call,
            recording: recording_path.map(CallRecording::new),
            buffer_index: 0,
            suppressor,
        }
    }

    pub fn segment(&self) -> &Arc<AudioSegment> {
        self.lease.segment()
    }

    pub fn segment_id(&self) -> u64 {
        self.lease.id()
    }

    pub fn lease(&self) -> &SegmentLease {
        &self.lease
    }

    pub fn call(&self) -> &Call {
        &self.call
    }

    pub fn call_mut(&mut self) -> &mut Call {
        &mut self.call
    }

    pub fn is_complete(&self) -> bool {
        self.lease.is_complete()
    }

    /// Refresh the call from the segment and record any new audio.
    /// Returns true when the call record changed.
    pub fn update(&mut self) -> bool {
        let updated = self.call.update(&self.lease);
        self.process_audio();
        updated
    }

    /// Record trailing audio and finalize the recording.
    pub fn close_audio(&mut self) {
        self.process_audio();
        if let Some(recording) = self.recording.as_mut() {
            if let Err(e) = recording.close() {
                self.suppressor.error(
                    RECORDING_WRITE_KEY,
                    &format!(
                        "Failed to finalize recording {}: {}",
                        recording.path().display(),
                        e
                    ),
                );
            }
        }
    }

    /// Close the recording and mark the call complete.
    pub fn dispose(&mut self) {
        self.close_audio();
        self.call.complete = true;
    }

    /// Hand the segment lease back, e.g. to pass it to listeners.
    pub fn into_parts(self) -> (Call, SegmentLease) {
        (self.call, self.lease)
    }

    fn process_audio(&mut self) {
        let Some(recording) = self.recording.as_mut() else {
            return;
        };
        let buffers = self.lease.audio_buffers_from(self.buffer_index);
        if buffers.is_empty() {
            return;
        }
        self.buffer_index += buffers.len();
        if let Err(e) = recording.write(&buffers) {
            self.suppressor.error(
                RECORDING_WRITE_KEY,
                &format!(
                    "Failed to write recording {}: {}",
                    recording.path().display(),
                    e
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trunk_core::alias::AliasList;
    use trunk_core::audio::AudioSegmentFactory;
    use trunk_core::identifier::{Identifier, Role};

    fn segment() -> Arc<AudioSegment> {
        let factory = AudioSegmentFactory::new(Arc::new(AliasList::default()));
        let segment = factory.create(0);
        segment.add_identifier(Identifier::talkgroup(100, Role::To));
        segment
    }

    #[test]
    fn test_update_records_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("call.wav");
        let segment = segment();
        let mut active = ActiveAudioSegment::new(
            SegmentLease::acquire(&segment),
            Some(path.clone()),
            Arc::new(LoggingSuppressor::new(5)),
        );
        assert_eq!(active.call().file.as_deref(), path.to_str());
        assert_eq!(segment.consumer_count(), 1);

        segment.add_audio(vec![0.25f32; 160]).unwrap();
        assert!(active.update());
        assert_eq!(active.call().duration, 0.02);
        assert!(!active.update());

        segment.add_audio(vec![0.25f32; 80]).unwrap();
        segment.set_complete();
        active.update();
        assert!(active.is_complete());
        active.dispose();
        assert!(active.call().complete);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 240);

        drop(active);
        assert!(segment.is_disposing());
    }

    #[test]
    fn test_without_recording() {
        let segment = segment();
        segment.add_audio(vec![0.0f32; 8]).unwrap();
        let mut active = ActiveAudioSegment::new(
            SegmentLease::acquire(&segment),
            None,
            Arc::new(LoggingSuppressor::new(5)),
        );
        assert!(active.call().file.is_none());
        active.dispose();
        let (call, lease) = active.into_parts();
        assert!(call.complete);
        assert_eq!(lease.id(), segment.id());
    }

    #[test]
    fn test_write_error_is_logged_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // Parent directory does not exist.
        let path = dir.path().join("missing").join("call.wav");
        let segment = segment();
        let suppressor = Arc::new(LoggingSuppressor::new(5));
        let mut active =
            ActiveAudioSegment::new(SegmentLease::acquire(&segment), Some(path), suppressor.clone());
        segment.add_audio(vec![0.1f32; 8]).unwrap();
        active.update();
        assert_eq!(suppressor.count(RECORDING_WRITE_KEY), 1);
    }
}
