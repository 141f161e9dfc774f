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

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::broker::BrokerNode;
use crate::service::Shutdown;
use crate::AppResult;

use super::connection::{BrokerApi, Connector};

struct Slot {
    connection: tokio::sync::Mutex<Option<Arc<dyn BrokerApi>>>,
    last_access: parking_lot::Mutex<Instant>,
}

impl Slot {
    fn new() -> Self {
        Slot {
            connection: tokio::sync::Mutex::new(None),
            last_access: parking_lot::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_access.lock())
    }

    /// Takes the connection out so it can only ever be closed once.
    async fn close(&self) {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.take() {
            connection.close().await;
        }
    }
}

/// Holds at most one live connection per broker.
///
/// Creation is serialized per broker through the slot lock while lookups
/// and creations for different brokers proceed independently. Connections
/// idle past the timeout are evicted by [`ConnectionCache::reap_task`] and
/// closed exactly once.
pub struct ConnectionCache {
    connector: Arc<dyn Connector>,
    idle_timeout: Duration,
    fetch_size_hint: i32,
    slots: DashMap<BrokerNode, Arc<Slot>>,
}

impl ConnectionCache {
    pub fn new(connector: Arc<dyn Connector>, idle_timeout: Duration, fetch_size_hint: i32) -> Self {
        ConnectionCache {
            connector,
            idle_timeout,
            fetch_size_hint,
            slots: DashMap::new(),
        }
    }

    /// Returns the cached connection for the broker, creating one if absent.
    pub async fn connection_for(&self, node: &BrokerNode) -> AppResult<Arc<dyn BrokerApi>> {
        let slot = {
            let entry = self
                .slots
                .entry(node.clone())
                .or_insert_with(|| Arc::new(Slot::new()));
            entry.value().clone()
        };
        slot.touch();

        let mut guard = slot.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }
        trace!("opening connection to broker {}", node);
        let connection = self.connector.connect(node, self.fetch_size_hint).await?;
        *guard = Some(connection.clone());
        Ok(connection)
    }

    /// Evicts and closes the broker's connection immediately. Used by the
    /// recovery policy when a connection is suspected bad; the next fetch
    /// reconnects.
    pub async fn invalidate(&self, node: &BrokerNode) {
        if let Some((_, slot)) = self.slots.remove(node) {
            debug!("invalidating connection to broker {}", node);
            slot.close().await;
        }
    }

    pub async fn evict_idle(&self) {
        let now = Instant::now();
        let expired: Vec<BrokerNode> = self
            .slots
            .iter()
            .filter(|entry| entry.value().idle_for(now) >= self.idle_timeout)
            .map(|entry| entry.key().clone())
            .collect();
        for node in expired {
            // re-check under removal, the slot may have been touched since
            let removed = self
                .slots
                .remove_if(&node, |_, slot| slot.idle_for(now) >= self.idle_timeout);
            if let Some((_, slot)) = removed {
                debug!("evicting idle connection to broker {}", node);
                slot.close().await;
            }
        }
    }

    pub async fn close_all(&self) {
        let nodes: Vec<BrokerNode> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        for node in nodes {
            self.invalidate(&node).await;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Background eviction loop; closes every remaining connection on
    /// shutdown.
    pub async fn reap_task(self: Arc<Self>, interval: Duration, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => {
                    debug!("connection reaper receiving shutdown signal");
                    break;
                }
            }
            self.evict_idle().await;
        }
        self.close_all().await;
    }
}
