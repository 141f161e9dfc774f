use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::service::Shutdown;
use crate::{AppResult, RouteConfig};

use super::{BrokerNode, TopicPartition};

/// Resolves the brokers currently serving a topic partition.
///
/// Lookups must be cheap and must never fail: an unknown topology is an
/// empty set, which the orchestrator treats as "nothing to fetch this
/// cycle".
pub trait BrokerDirectory: Send + Sync {
    fn brokers(&self, topic: &str, partition: i32) -> Vec<BrokerNode>;
}

/// Upstream topology provider, typically backed by a coordination service.
/// Bounded by its own timeout/retry policy; a failed resolve keeps the
/// previous snapshot in [`CachedDirectory`].
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn resolve(&self, topic: &str, partition: i32) -> AppResult<Vec<BrokerNode>>;
}

/// Fixed topology taken from configuration.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    routes: HashMap<TopicPartition, Vec<BrokerNode>>,
}

impl StaticDirectory {
    pub fn new(routes: HashMap<TopicPartition, Vec<BrokerNode>>) -> Self {
        Self { routes }
    }

    pub fn from_routes(routes: &[RouteConfig]) -> AppResult<Self> {
        let mut table = HashMap::new();
        for route in routes {
            let tp = TopicPartition::new(route.topic.clone(), route.partition);
            let mut nodes = Vec::with_capacity(route.brokers.len());
            for broker in &route.brokers {
                nodes.push(BrokerNode::from_string(broker.as_str().into())?);
            }
            table.insert(tp, nodes);
        }
        Ok(Self::new(table))
    }
}

impl BrokerDirectory for StaticDirectory {
    fn brokers(&self, topic: &str, partition: i32) -> Vec<BrokerNode> {
        self.routes
            .get(&TopicPartition::new(topic, partition))
            .cloned()
            .unwrap_or_default()
    }
}

/// Caches topology lookups from a [`TopologySource`] and refreshes them on
/// a schedule. Serving stale brokers between refreshes is acceptable; a
/// bad broker in the set fails its fetch and is retried next cycle.
pub struct CachedDirectory {
    source: Arc<dyn TopologySource>,
    subscriptions: Vec<TopicPartition>,
    snapshot: DashMap<TopicPartition, Vec<BrokerNode>>,
}

impl CachedDirectory {
    pub fn new(source: Arc<dyn TopologySource>, subscriptions: Vec<TopicPartition>) -> Self {
        Self {
            source,
            subscriptions,
            snapshot: DashMap::new(),
        }
    }

    pub async fn refresh(&self) {
        for tp in &self.subscriptions {
            match self.source.resolve(&tp.topic, tp.partition).await {
                Ok(nodes) => {
                    trace!("topology for {}: {} broker(s)", tp, nodes.len());
                    self.snapshot.insert(tp.clone(), nodes);
                }
                Err(e) => {
                    // keep the previous snapshot, churn is handled per cycle
                    warn!("topology resolve failed for {}: {}", tp, e);
                }
            }
        }
    }

    /// Runs the background refresh loop until shutdown.
    pub async fn refresh_task(self: Arc<Self>, interval: Duration, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => {
                    debug!("directory refresh task receiving shutdown signal");
                    break;
                }
            }
            self.refresh().await;
        }
    }
}

impl BrokerDirectory for CachedDirectory {
    fn brokers(&self, topic: &str, partition: i32) -> Vec<BrokerNode> {
        self.snapshot
            .get(&TopicPartition::new(topic, partition))
            .map(|nodes| nodes.value().clone())
            .unwrap_or_default()
    }
}
