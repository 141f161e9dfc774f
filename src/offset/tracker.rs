use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::broker::{BrokerNode, TopicPartition};
use crate::client::BrokerApi;
use crate::fetch::FetchError;

/// Sentinel time asking a broker for its earliest available offset.
pub const EARLIEST_OFFSET: i64 = -2;
/// Sentinel time asking a broker for its latest available offset.
pub const LATEST_OFFSET: i64 = -1;

/// The full read position of one topic partition: one offset per broker.
/// There is no single leader in this protocol generation, each broker's log
/// position is independent.
pub type OffsetMap = HashMap<String, i64>;

/// Where to start when a broker has no tracked offset yet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoOffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl AutoOffsetReset {
    pub fn sentinel(&self) -> i64 {
        match self {
            AutoOffsetReset::Earliest => EARLIEST_OFFSET,
            AutoOffsetReset::Latest => LATEST_OFFSET,
        }
    }
}

/// Tracks per-broker offsets for one topic partition.
///
/// Only the orchestrator writes here, and only between fetch dispatches;
/// worker tasks never touch the map, so a small read-write lock is all the
/// synchronization the cycle needs.
#[derive(Debug)]
pub struct OffsetTracker {
    topic_partition: TopicPartition,
    reset: AutoOffsetReset,
    offsets: parking_lot::RwLock<OffsetMap>,
}

impl OffsetTracker {
    pub fn new(topic_partition: TopicPartition, reset: AutoOffsetReset) -> Self {
        OffsetTracker {
            topic_partition,
            reset,
            offsets: parking_lot::RwLock::new(OffsetMap::new()),
        }
    }

    pub fn topic_partition(&self) -> &TopicPartition {
        &self.topic_partition
    }

    /// Seeds tracked state from the durable store at startup.
    pub fn seed(&self, offsets: OffsetMap) {
        *self.offsets.write() = offsets;
    }

    pub fn snapshot(&self) -> OffsetMap {
        self.offsets.read().clone()
    }

    pub fn get(&self, broker_id: &str) -> Option<i64> {
        self.offsets.read().get(broker_id).copied()
    }

    /// Records the offset of a message just yielded, so the tracked state
    /// always reflects the last yielded position, not the last fetched one.
    pub fn advance(&self, broker_id: &str, offset: i64) {
        self.offsets.write().insert(broker_id.to_string(), offset);
    }

    /// Overwrites a broker's offset after sentinel resolution or
    /// out-of-range correction.
    pub fn record_resolved(&self, broker_id: &str, offset: i64) {
        self.offsets.write().insert(broker_id.to_string(), offset);
    }

    /// Returns the offset to start fetching from for the broker.
    ///
    /// An already tracked broker returns its entry unchanged and issues no
    /// metadata query. Otherwise the reset policy's sentinel is translated
    /// into a concrete offset through the broker, stored, and returned;
    /// this happens once per broker unless invalidation forces it again.
    pub async fn offset_for(
        &self,
        broker: &BrokerNode,
        connection: &dyn BrokerApi,
    ) -> Result<i64, FetchError> {
        if let Some(offset) = self.get(&broker.id) {
            return Ok(offset);
        }

        let mut offset = self.reset.sentinel();
        if offset < 0 {
            // special offset value, ask the broker for the real one
            let resolved = connection
                .offsets_before(&self.topic_partition, offset, 1)
                .await?;
            offset = resolved.first().copied().unwrap_or(0);
        }
        debug!(
            "resolved starting offset {} for broker {} on {}",
            offset, broker, self.topic_partition
        );
        self.record_resolved(&broker.id, offset);
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WireMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MetadataApi {
        offsets: Vec<i64>,
        queries: AtomicUsize,
    }

    impl MetadataApi {
        fn new(offsets: Vec<i64>) -> Self {
            MetadataApi {
                offsets,
                queries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BrokerApi for MetadataApi {
        async fn fetch(
            &self,
            _tp: &TopicPartition,
            _offset: i64,
            _max_bytes: i32,
        ) -> Result<Vec<WireMessage>, FetchError> {
            Ok(vec![])
        }

        async fn offsets_before(
            &self,
            _tp: &TopicPartition,
            _time: i64,
            _max_count: i32,
        ) -> Result<Vec<i64>, FetchError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.offsets.clone())
        }

        async fn close(&self) {}
    }

    fn tracker(reset: AutoOffsetReset) -> OffsetTracker {
        OffsetTracker::new(TopicPartition::new("events", 0), reset)
    }

    #[tokio::test]
    async fn test_existing_offset_issues_no_query() {
        let tracker = tracker(AutoOffsetReset::Earliest);
        tracker.seed(OffsetMap::from([("b1".to_string(), 42)]));
        let api = MetadataApi::new(vec![999]);
        let broker = BrokerNode::new("b1", "127.0.0.1", 9092);

        let offset = tracker.offset_for(&broker, &api).await.unwrap();
        assert_eq!(offset, 42);
        assert_eq!(api.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sentinel_resolution_is_stored() {
        let tracker = tracker(AutoOffsetReset::Earliest);
        let api = MetadataApi::new(vec![500]);
        let broker = BrokerNode::new("b1", "127.0.0.1", 9092);

        let offset = tracker.offset_for(&broker, &api).await.unwrap();
        assert_eq!(offset, 500);
        assert_eq!(tracker.get("b1"), Some(500));

        // second resolution returns the stored value without a query
        let offset = tracker.offset_for(&broker, &api).await.unwrap();
        assert_eq!(offset, 500);
        assert_eq!(api.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_metadata_response_falls_back_to_zero() {
        let tracker = tracker(AutoOffsetReset::Latest);
        let api = MetadataApi::new(vec![]);
        let broker = BrokerNode::new("b1", "127.0.0.1", 9092);

        let offset = tracker.offset_for(&broker, &api).await.unwrap();
        assert_eq!(offset, 0);
    }
}
