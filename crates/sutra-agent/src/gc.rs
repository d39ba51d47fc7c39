// Copyright [2026] [The Sutra Mesh Authors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 The Sutra Mesh Authors and Sutra Contributors
// SPDX-License-Identifier: Apache-2.0

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use sutra_core::engine::Engine;

const DEFAULT_INTERVAL_SECONDS: i64 = 300;

/// GarbageCollector periodically purges expired kpaks from the engine.
/// At most one pass runs at a time; start and stop are idempotent and stop
/// waits for an in-flight pass to finish.
pub struct GarbageCollector {
    engine: Arc<Engine>,
    interval: Duration,
    enabled: bool,
    task: Mutex<Option<GcTask>>,
}

struct GcTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl GarbageCollector {
    pub fn new(engine: Arc<Engine>, interval_seconds: i64, enabled: bool) -> Self {
        let interval_seconds = if interval_seconds <= 0 {
            DEFAULT_INTERVAL_SECONDS
        } else {
            interval_seconds
        };

        GarbageCollector {
            engine,
            interval: Duration::from_secs(interval_seconds as u64),
            enabled,
            task: Mutex::new(None),
        }
    }

    pub fn interval_seconds(&self) -> u64 {
        self.interval.as_secs()
    }

    /// Launches the periodic purge task. A no-op when disabled or already
    /// running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if !self.enabled || task.is_some() {
            return;
        }

        let engine = self.engine.clone();
        let interval = self.interval;
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first interval tick completes immediately; consume it so
            // the first pass happens one full interval after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = ticker.tick() => {
                        let start = Instant::now();
                        let removed = engine.remove_expired();
                        if removed > 0 {
                            tracing::info!(
                                removed,
                                elapsed_ms = start.elapsed().as_millis() as u64,
                                "garbage collection removed expired kpaks"
                            );
                        }
                    }
                }
            }
        });

        *task = Some(GcTask { shutdown, handle });
        tracing::info!(interval_seconds = interval.as_secs(), "garbage collector started");
    }

    /// Stops the purge task and waits for any in-flight pass. A no-op when
    /// not running.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };

        let _ = task.shutdown.send(true);
        if let Err(err) = task.handle.await {
            tracing::warn!(error = %err, "garbage collector task ended abnormally");
        }
        tracing::info!("garbage collector stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}
