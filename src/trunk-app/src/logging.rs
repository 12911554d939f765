// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

/// Initialize logging with optional level from config.
/// Falls back to INFO if level is None or invalid.
pub fn init_logging(log_level: Option<&str>) {
    let level = log_level
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_target(false)
        .with_max_level(level)
        .init();
}

/// Caps how often the same failure is logged.
///
/// Each key may log `max_per_key` times; the last allowed entry says that
/// further messages are suppressed.
pub struct LoggingSuppressor {
    max_per_key: usize,
    counts: Mutex<HashMap<String, usize>>,
}

impl LoggingSuppressor {
    pub fn new(max_per_key: usize) -> Self {
        Self {
            max_per_key,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Log `message` at error level unless `key` is exhausted.
    pub fn error(&self, key: &str, message: &str) {
        let count = self.next_count(key);
        if count < self.max_per_key {
            error!("{}", message);
        } else if count == self.max_per_key {
            error!("{} (suppressing further '{}' messages)", message, key);
        }
    }

    pub fn count(&self, key: &str) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn next_count(&self, key: &str) -> usize {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_counts_past_limit() {
        let suppressor = LoggingSuppressor::new(1);
        suppressor.error("Call Event Delete", "first");
        suppressor.error("Call Event Delete", "second");
        suppressor.error("Call Save", "third");
        assert_eq!(suppressor.count("Call Event Delete"), 2);
        assert_eq!(suppressor.count("Call Save"), 1);
        assert_eq!(suppressor.count("Recording Write"), 0);
    }
}
