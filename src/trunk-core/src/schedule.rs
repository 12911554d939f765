// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Fixed-rate periodic tasks on the tokio runtime.
//!
//! Each tick runs on the blocking pool and ticks never overlap: a tick
//! that overruns its period causes the missed ticks to be skipped. A
//! panicking tick is logged and the schedule keeps running.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Clone)]
pub struct Scheduler {
    handle: Handle,
}

impl Scheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler bound to the runtime of the calling task.
    pub fn try_current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }

    /// Spawn a plain async task on the scheduler's runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run `task` after `initial_delay` and then every `period`.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        name: &'static str,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) -> ScheduledTask
    where
        F: Fn() + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        let period = period.max(MIN_PERIOD);
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let tick = Arc::clone(&task);
                match tokio::task::spawn_blocking(move || tick()).await {
                    Ok(()) => {}
                    Err(e) if e.is_panic() => {
                        error!("Scheduled task '{}' panicked: {:?}", name, e);
                    }
                    Err(_) => {
                        debug!("Scheduled task '{}' cancelled", name);
                        break;
                    }
                }
            }
        });
        ScheduledTask { name, handle }
    }
}

/// Handle to a periodic task. Dropping the handle cancels the task.
pub struct ScheduledTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop future ticks. A tick already running finishes on its own.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
