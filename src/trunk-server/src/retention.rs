// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Retention sweep over call records and their recordings.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, error, info};

use trunk_app::LoggingSuppressor;
use trunk_core::audio::now_millis;
use trunk_core::call::{Call, CallEventEmitter, CallRepository, PageRequest, RepositoryError};

use crate::audio_manager::SingleFlight;
use crate::config::RetentionConfig;

const PAGE_SIZE: usize = 100;
const DELETE_LOG_KEY: &str = "Call Event Delete";
const DELETE_LOG_MAX: usize = 5;

/// Total size in bytes of the regular files below `dir`.
pub fn directory_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() => directory_size(&entry.path()),
            Ok(t) if t.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        })
        .sum()
}

pub struct CallAgeOffProcessor {
    repository: Arc<dyn CallRepository>,
    emitter: Arc<CallEventEmitter>,
    calls_dir: PathBuf,
    retention: RetentionConfig,
    suppressor: LoggingSuppressor,
    running: AtomicBool,
}

impl CallAgeOffProcessor {
    pub fn new(
        repository: Arc<dyn CallRepository>,
        emitter: Arc<CallEventEmitter>,
        calls_dir: PathBuf,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            repository,
            emitter,
            calls_dir,
            retention,
            suppressor: LoggingSuppressor::new(DELETE_LOG_MAX),
            running: AtomicBool::new(false),
        }
    }

    /// Scheduled entry point.
    pub fn process(&self) {
        self.process_at(now_millis());
    }

    pub fn process_at(&self, now: u64) {
        let Some(_running) = SingleFlight::enter(&self.running) else {
            return;
        };

        let policy = self.retention.policy;
        if policy.uses_age() {
            if let Err(e) = self.process_age(now) {
                error!("Call age-off sweep failed: {}", e);
            }
        }
        if policy.uses_size() {
            if let Err(e) = self.process_size(now) {
                error!("Call size sweep failed: {}", e);
            }
        }
    }

    /// Delete complete calls older than the configured age.
    fn process_age(&self, now: u64) -> Result<(), RepositoryError> {
        let age_ms = self.retention.age().as_millis() as u64;
        let threshold = now.saturating_sub(age_ms);
        let mut start = 0;
        let mut deleted = 0usize;

        loop {
            let page = self
                .repository
                .find_calls_by_event_time_between_order_by_event_time(
                    start,
                    threshold,
                    PageRequest::of(0, PAGE_SIZE),
                )?;
            if page.is_empty() {
                break;
            }
            for call in &page.content {
                // Calls sharing this event time on the next page wait for the
                // next sweep.
                start = call.event_time.saturating_add(1);
                if call.complete && self.delete_call(call) {
                    deleted += 1;
                }
            }
        }

        if deleted > 0 {
            info!("Aged off {} call(s)", deleted);
        }
        Ok(())
    }

    /// Delete the oldest complete calls until the calls directory is under
    /// the objective size.
    fn process_size(&self, now: u64) -> Result<(), RepositoryError> {
        let objective = self.retention.objective_size_bytes();
        let mut size = directory_size(&self.calls_dir);
        if size < objective {
            return Ok(());
        }
        debug!(
            "Calls directory is {} bytes, objective {} bytes",
            size, objective
        );

        let mut start = 0;
        let mut deleted = 0usize;
        'pages: loop {
            let page = self
                .repository
                .find_calls_by_event_time_between_order_by_event_time(
                    start,
                    now,
                    PageRequest::of(0, PAGE_SIZE),
                )?;
            if page.is_empty() {
                break;
            }
            for call in &page.content {
                start = call.event_time.saturating_add(1);
                if !call.complete {
                    continue;
                }
                let file_size = call
                    .file
                    .as_deref()
                    .and_then(|f| std::fs::metadata(f).ok())
                    .map(|m| m.len())
                    .unwrap_or(0);
                if self.delete_call(call) {
                    deleted += 1;
                    size = size.saturating_sub(file_size);
                }
                if size < objective {
                    break 'pages;
                }
            }
        }

        if deleted > 0 {
            info!("Deleted {} call(s) to meet the size objective", deleted);
        }
        Ok(())
    }

    /// Remove the recording and then the record. A recording that cannot be
    /// removed keeps its record for the next sweep.
    fn delete_call(&self, call: &Call) -> bool {
        if let Some(file) = call.file.as_deref() {
            let path = Path::new(file);
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    self.suppressor.error(
                        DELETE_LOG_KEY,
                        &format!("Failed to delete recording {}: {}", path.display(), e),
                    );
                    return false;
                }
                if let Some(parent) = path.parent() {
                    remove_dir_if_empty(parent);
                }
            }
        }

        match self.repository.delete(call) {
            Ok(()) => {
                self.emitter.notify_deleted(call);
                true
            }
            Err(e) => {
                self.suppressor.error(
                    DELETE_LOG_KEY,
                    &format!("Failed to delete call {}: {}", call.id, e),
                );
                false
            }
        }
    }
}

fn remove_dir_if_empty(dir: &Path) {
    let is_empty = std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if is_empty {
        if let Err(e) = std::fs::remove_dir(dir) {
            debug!("Could not remove {}: {}", dir.display(), e);
        }
    }
}
