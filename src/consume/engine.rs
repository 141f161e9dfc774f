// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Engine assembly and lifecycle.
//!
//! `start` wires the injected capabilities together and spawns one poll
//! loop per assigned topic partition plus the offset committer and the
//! connection reaper. `shutdown` stops new dispatches, waits for every
//! task to drain, flushes offsets once and leaves connection teardown to
//! the reaper's final sweep.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::broker::{BrokerDirectory, TopicPartition};
use crate::client::{ConnectionCache, Connector};
use crate::fetch::FetchExecutor;
use crate::offset::{OffsetCommitter, OffsetStore, OffsetTracker};
use crate::service::{ConsumerConfig, Shutdown, ShutdownNotifier};
use crate::{AppError, AppResult};

use super::{ConsumptionOrchestrator, MessageSink};

pub struct ConsumerEngine {
    config: ConsumerConfig,
    directory: Arc<dyn BrokerDirectory>,
    connector: Arc<dyn Connector>,
    offset_store: Option<Arc<dyn OffsetStore>>,
    sink: Arc<dyn MessageSink>,
}

impl ConsumerEngine {
    pub fn new(
        config: ConsumerConfig,
        directory: Arc<dyn BrokerDirectory>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        ConsumerEngine {
            config,
            directory,
            connector,
            offset_store: None,
            sink,
        }
    }

    /// Without a store, offsets start from defaults and are never
    /// persisted.
    pub fn with_offset_store(mut self, store: Arc<dyn OffsetStore>) -> Self {
        self.offset_store = Some(store);
        self
    }

    /// Validates the configuration, restores offsets and spawns all
    /// consumption tasks. Configuration problems fail here, nothing is
    /// retried.
    pub async fn start(self) -> AppResult<EngineHandle> {
        if self.config.assignments.is_empty() {
            return Err(AppError::IllegalState(
                "no topic partitions assigned for consumption".to_string(),
            ));
        }
        let mut assignments = Vec::with_capacity(self.config.assignments.len());
        for name in &self.config.assignments {
            assignments.push(TopicPartition::from_string(Cow::Borrowed(name.as_str()))?);
        }

        let notifier = ShutdownNotifier::default();
        let cache = Arc::new(ConnectionCache::new(
            self.connector.clone(),
            self.config.connection.idle_timeout(),
            self.config.fetch.max_bytes,
        ));
        let executor = Arc::new(FetchExecutor::new(self.config.fetch.fetch_permits()));

        let mut trackers = Vec::with_capacity(assignments.len());
        for topic_partition in assignments {
            let tracker = Arc::new(OffsetTracker::new(
                topic_partition.clone(),
                self.config.fetch.auto_offset_reset,
            ));
            if let Some(store) = &self.offset_store {
                let restored = store.load(&topic_partition).await?;
                if !restored.is_empty() {
                    info!(
                        "restored {} broker offset(s) for {}",
                        restored.len(),
                        topic_partition
                    );
                    tracker.seed(restored);
                }
            }
            trackers.push(tracker);
        }

        for tracker in &trackers {
            let orchestrator = ConsumptionOrchestrator::new(
                tracker.topic_partition().clone(),
                self.directory.clone(),
                cache.clone(),
                executor.clone(),
                tracker.clone(),
                self.config.fetch.max_bytes,
            );
            let sink = self.sink.clone();
            let poll_interval = self.config.poll_interval();
            let shutdown = notifier.subscribe();
            tokio::spawn(poll_loop(orchestrator, sink, poll_interval, shutdown));
        }

        let committer = Arc::new(OffsetCommitter::new(
            self.offset_store.clone(),
            trackers.clone(),
        ));
        tokio::spawn(
            committer
                .clone()
                .commit_task(self.config.commit_interval(), notifier.subscribe()),
        );
        tokio::spawn(
            cache
                .clone()
                .reap_task(self.config.connection.reap_interval(), notifier.subscribe()),
        );

        Ok(EngineHandle {
            notifier,
            committer,
        })
    }
}

/// Repeatedly runs fetch cycles for one topic partition, backing off by
/// one poll interval after an empty cycle. Shutdown is only observed
/// between cycles, so an in-flight fetch is never cancelled midway.
async fn poll_loop(
    orchestrator: ConsumptionOrchestrator,
    sink: Arc<dyn MessageSink>,
    poll_interval: Duration,
    mut shutdown: Shutdown,
) {
    info!("starting consumption of {}", orchestrator.topic_partition());
    loop {
        if shutdown.is_shutdown() {
            break;
        }
        let yielded = orchestrator.poll_cycle(sink.as_ref()).await;
        let idle = if yielded == 0 {
            poll_interval
        } else {
            Duration::ZERO
        };
        tokio::select! {
            _ = tokio::time::sleep(idle) => {}
            _ = shutdown.recv() => break,
        }
    }
    info!("stopped consumption of {}", orchestrator.topic_partition());
}

/// Running engine. Dropping it without calling [`EngineHandle::shutdown`]
/// leaves the background tasks running detached.
pub struct EngineHandle {
    notifier: ShutdownNotifier,
    committer: Arc<OffsetCommitter>,
}

impl EngineHandle {
    /// Stops all consumption tasks, then flushes tracked offsets exactly
    /// once.
    pub async fn shutdown(self) -> AppResult<()> {
        info!("consumer engine shutting down");
        self.notifier.shutdown().await;
        self.committer.commit().await?;
        info!("consumer engine shutdown complete");
        Ok(())
    }
}
