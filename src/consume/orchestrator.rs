//! Fetch-and-merge driver for one topic partition.
//!
//! Every cycle asks the directory for the brokers currently serving the
//! partition, fetches from each of them (inline for one broker, one task
//! per broker otherwise), merges the batches in dispatch order and applies
//! the recovery policy per failed result. Each broker's log is an
//! independent sequence, so no ordering is promised across brokers.

use std::sync::Arc;

use tracing::{error, info, trace, warn};

use crate::broker::{BrokerDirectory, BrokerNode, TopicPartition};
use crate::client::{BrokerApi, ConnectionCache};
use crate::fetch::{FetchExecutor, FetchResult};
use crate::offset::{OffsetTracker, EARLIEST_OFFSET, LATEST_OFFSET};

use super::{ConsumedMessage, MessageSink};

pub struct ConsumptionOrchestrator {
    topic_partition: TopicPartition,
    directory: Arc<dyn BrokerDirectory>,
    cache: Arc<ConnectionCache>,
    executor: Arc<FetchExecutor>,
    tracker: Arc<OffsetTracker>,
    max_fetch_bytes: i32,
}

impl ConsumptionOrchestrator {
    pub fn new(
        topic_partition: TopicPartition,
        directory: Arc<dyn BrokerDirectory>,
        cache: Arc<ConnectionCache>,
        executor: Arc<FetchExecutor>,
        tracker: Arc<OffsetTracker>,
        max_fetch_bytes: i32,
    ) -> Self {
        ConsumptionOrchestrator {
            topic_partition,
            directory,
            cache,
            executor,
            tracker,
            max_fetch_bytes,
        }
    }

    pub fn topic_partition(&self) -> &TopicPartition {
        &self.topic_partition
    }

    /// Runs one fetch cycle and returns how many messages were yielded.
    ///
    /// Failures never escape a cycle; they degrade it to fewer (or no)
    /// messages and leave correction to the next cycle. All offset
    /// mutations are visible in the tracker when this returns.
    pub async fn poll_cycle(&self, sink: &dyn MessageSink) -> usize {
        let brokers = self
            .directory
            .brokers(&self.topic_partition.topic, self.topic_partition.partition);
        if brokers.is_empty() {
            trace!("no brokers known for {}, nothing to fetch", self.topic_partition);
            return 0;
        }

        let results = if brokers.len() == 1 {
            self.dispatch_single(&brokers[0]).await.into_iter().collect()
        } else {
            self.dispatch_concurrent(&brokers).await
        };

        let mut yielded = 0;
        for result in results {
            yielded += self.handle_result(result, sink).await;
        }
        yielded
    }

    /// Resolves the connection and starting offset for one broker. A
    /// failure here only costs this broker this cycle.
    async fn prepare(&self, broker: &BrokerNode) -> Option<(Arc<dyn BrokerApi>, i64)> {
        let connection = match self.cache.connection_for(broker).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("cannot connect to broker {}: {}", broker, e);
                return None;
            }
        };
        match self.tracker.offset_for(broker, connection.as_ref()).await {
            Ok(offset) => Some((connection, offset)),
            Err(e) => {
                warn!("offset resolution failed for broker {}: {}", broker, e);
                self.cache.invalidate(broker).await;
                None
            }
        }
    }

    async fn dispatch_single(&self, broker: &BrokerNode) -> Option<FetchResult> {
        let (connection, offset) = self.prepare(broker).await?;
        Some(
            self.executor
                .fetch(
                    broker.clone(),
                    connection,
                    &self.topic_partition,
                    offset,
                    self.max_fetch_bytes,
                )
                .await,
        )
    }

    /// One task per broker, joined in dispatch order. All fetches complete
    /// before any result is handled; a failed join degrades the whole
    /// cycle to no messages.
    async fn dispatch_concurrent(&self, brokers: &[BrokerNode]) -> Vec<FetchResult> {
        let mut handles = Vec::with_capacity(brokers.len());
        for broker in brokers {
            if let Some((connection, offset)) = self.prepare(broker).await {
                let executor = self.executor.clone();
                let topic_partition = self.topic_partition.clone();
                let broker = broker.clone();
                let max_fetch_bytes = self.max_fetch_bytes;
                handles.push(tokio::spawn(async move {
                    executor
                        .fetch(broker, connection, &topic_partition, offset, max_fetch_bytes)
                        .await
                }));
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("fetch dispatch failed for {}: {}", self.topic_partition, e);
                    return Vec::new();
                }
            }
        }
        results
    }

    /// Applies one broker's fetch outcome: yield its batch, or run the
    /// recovery policy.
    async fn handle_result(&self, result: FetchResult, sink: &dyn MessageSink) -> usize {
        let FetchResult {
            broker,
            begin_offset,
            outcome,
        } = result;

        match outcome {
            Ok(messages) => {
                let mut yielded = 0;
                for message in messages {
                    // the fetch window can open before the requested start
                    if message.offset < begin_offset {
                        continue;
                    }
                    self.tracker.advance(&broker.id, message.offset);
                    let consumed = ConsumedMessage {
                        topic_partition: self.topic_partition.clone(),
                        offsets: self.tracker.snapshot(),
                        key: None,
                        payload: message.payload,
                    };
                    if let Err(e) = sink.process(consumed).await {
                        warn!("message sink failed for {}: {}", self.topic_partition, e);
                    }
                    yielded += 1;
                }
                yielded
            }
            Err(cause) if cause.is_offset_out_of_range() => {
                self.recover_out_of_range(&broker, begin_offset).await;
                0
            }
            Err(cause) => {
                warn!(
                    "fetch from broker {} failed ({}), invalidating its connection",
                    broker, cause
                );
                self.cache.invalidate(&broker).await;
                0
            }
        }
    }

    /// Re-derives a concrete offset after an out-of-range failure.
    ///
    /// Earliest is tried first. When earliest is still below the requested
    /// begin offset the request was not behind the log but past its end,
    /// so latest is adopted instead. No messages are yielded this cycle;
    /// the next cycle fetches from the corrected offset.
    async fn recover_out_of_range(&self, broker: &BrokerNode, begin_offset: i64) {
        // the connection is normally still cached from the failed fetch
        let connection = match self.cache.connection_for(broker).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("offset recovery cannot reach broker {}: {}", broker, e);
                return;
            }
        };

        let earliest = match connection
            .offsets_before(&self.topic_partition, EARLIEST_OFFSET, 1)
            .await
        {
            Ok(offsets) => offsets.first().copied().unwrap_or(0),
            Err(e) => {
                warn!("offset recovery failed for broker {}: {}", broker, e);
                self.cache.invalidate(broker).await;
                return;
            }
        };

        let mut new_offset = earliest;
        if new_offset < begin_offset {
            new_offset = match connection
                .offsets_before(&self.topic_partition, LATEST_OFFSET, 1)
                .await
            {
                Ok(offsets) => offsets.first().copied().unwrap_or(0),
                Err(e) => {
                    warn!("offset recovery failed for broker {}: {}", broker, e);
                    self.cache.invalidate(broker).await;
                    return;
                }
            };
        }

        info!(
            "corrected out-of-range offset for broker {} on {}: {} -> {}",
            broker, self.topic_partition, begin_offset, new_offset
        );
        self.tracker.record_resolved(&broker.id, new_offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::StaticDirectory;
    use crate::client::Connector;
    use crate::consume::testkit::{message, node, FetchScript, ScriptedBroker, ScriptedConnector, VecSink};
    use crate::offset::{AutoOffsetReset, OffsetMap};
    use rstest::rstest;
    use std::collections::HashMap;
    use std::time::Duration;

    fn orchestrator_with(
        brokers: Vec<(&str, Arc<ScriptedBroker>)>,
        directory_nodes: Vec<&str>,
        seed: OffsetMap,
    ) -> (ConsumptionOrchestrator, Arc<ScriptedConnector>) {
        let tp = TopicPartition::new("events", 0);
        let connector = ScriptedConnector::with(brokers);
        let routes = HashMap::from([(
            tp.clone(),
            directory_nodes.iter().map(|id| node(id)).collect::<Vec<_>>(),
        )]);
        let directory = Arc::new(StaticDirectory::new(routes));
        let cache = Arc::new(ConnectionCache::new(
            connector.clone() as Arc<dyn Connector>,
            Duration::from_secs(60),
            0,
        ));
        let tracker = Arc::new(OffsetTracker::new(tp.clone(), AutoOffsetReset::Earliest));
        tracker.seed(seed);
        let orchestrator = ConsumptionOrchestrator::new(
            tp,
            directory,
            cache,
            Arc::new(FetchExecutor::new(4)),
            tracker,
            1024 * 1024,
        );
        (orchestrator, connector)
    }

    #[tokio::test]
    async fn test_empty_broker_set_yields_nothing() {
        let (orchestrator, _) = orchestrator_with(vec![], vec![], OffsetMap::new());
        let sink = VecSink::default();
        assert_eq!(orchestrator.poll_cycle(&sink).await, 0);
    }

    #[tokio::test]
    async fn test_two_brokers_merge_in_dispatch_order() {
        let broker_a = ScriptedBroker::new(
            FetchScript::Log(vec![
                message(10, b"a-10"),
                message(11, b"a-11"),
                message(12, b"a-12"),
            ]),
            0,
            12,
        );
        let broker_b = ScriptedBroker::new(FetchScript::Log(vec![message(5, b"b-5")]), 0, 5);
        let seed = OffsetMap::from([("a".to_string(), 9), ("b".to_string(), 4)]);
        let (orchestrator, _) = orchestrator_with(
            vec![("a", broker_a), ("b", broker_b)],
            vec!["a", "b"],
            seed,
        );
        let sink = VecSink::default();

        let yielded = orchestrator.poll_cycle(&sink).await;
        assert_eq!(yielded, 4);
        assert_eq!(sink.payloads(), vec!["a-10", "a-11", "a-12", "b-5"]);

        let final_offsets = orchestrator.tracker.snapshot();
        assert_eq!(
            final_offsets,
            OffsetMap::from([("a".to_string(), 12), ("b".to_string(), 5)])
        );

        // every message's snapshot includes its own advance
        let messages = sink.messages.lock();
        assert_eq!(messages[0].offsets.get("a"), Some(&10));
        assert_eq!(messages[2].offsets.get("a"), Some(&12));
        assert_eq!(messages[3].offsets.get("b"), Some(&5));
        assert!(messages.iter().all(|m| m.key.is_none()));
    }

    #[tokio::test]
    async fn test_single_and_concurrent_paths_agree() {
        let script = || {
            ScriptedBroker::new(
                FetchScript::Log(vec![message(21, b"m-21"), message(22, b"m-22")]),
                0,
                22,
            )
        };
        let seed = OffsetMap::from([("a".to_string(), 20)]);

        let (single, _) = orchestrator_with(vec![("a", script())], vec!["a"], seed.clone());
        let single_sink = VecSink::default();
        let single_count = single.poll_cycle(&single_sink).await;

        let (concurrent, _) = orchestrator_with(vec![("a", script())], vec!["a"], seed);
        let concurrent_sink = VecSink::default();
        let results = concurrent.dispatch_concurrent(&[node("a")]).await;
        let mut concurrent_count = 0;
        for result in results {
            concurrent_count += concurrent.handle_result(result, &concurrent_sink).await;
        }

        assert_eq!(single_count, concurrent_count);
        assert_eq!(single_sink.payloads(), concurrent_sink.payloads());
        assert_eq!(single.tracker.snapshot(), concurrent.tracker.snapshot());
    }

    #[tokio::test]
    async fn test_messages_before_begin_offset_are_filtered() {
        // a raw batch that starts before the requested offset
        let broker = ScriptedBroker::new(
            FetchScript::Raw(vec![
                message(95, b"old"),
                message(99, b"older"),
                message(101, b"new"),
            ]),
            0,
            101,
        );
        let seed = OffsetMap::from([("a".to_string(), 100)]);
        let (orchestrator, _) = orchestrator_with(vec![("a", broker)], vec!["a"], seed);
        let sink = VecSink::default();

        let yielded = orchestrator.poll_cycle(&sink).await;
        assert_eq!(yielded, 1);
        assert_eq!(sink.payloads(), vec!["new"]);
        assert_eq!(orchestrator.tracker.get("a"), Some(101));
    }

    #[rstest]
    // earliest is behind the request: data expired, resume at earliest
    #[case(1000, 1500, 9000, 1500)]
    // earliest is still below the request: the request was past the end,
    // resume at latest
    #[case(1000, 500, 9000, 9000)]
    #[tokio::test]
    async fn test_out_of_range_recovery(
        #[case] requested: i64,
        #[case] earliest: i64,
        #[case] latest: i64,
        #[case] expected: i64,
    ) {
        let broker = ScriptedBroker::new(FetchScript::OutOfRange, earliest, latest);
        let seed = OffsetMap::from([("a".to_string(), requested)]);
        let (orchestrator, _) = orchestrator_with(vec![("a", broker)], vec!["a"], seed);
        let sink = VecSink::default();

        let yielded = orchestrator.poll_cycle(&sink).await;
        assert_eq!(yielded, 0);
        assert_eq!(orchestrator.tracker.get("a"), Some(expected));
    }

    #[tokio::test]
    async fn test_broken_broker_does_not_block_the_healthy_one() {
        let broker_a = ScriptedBroker::new(FetchScript::Broken, 0, 0);
        let broker_b = ScriptedBroker::new(FetchScript::Log(vec![message(8, b"b-8")]), 0, 8);
        let seed = OffsetMap::from([("a".to_string(), 1), ("b".to_string(), 7)]);
        let (orchestrator, connector) = orchestrator_with(
            vec![("a", broker_a.clone()), ("b", broker_b)],
            vec!["a", "b"],
            seed,
        );
        let sink = VecSink::default();

        let yielded = orchestrator.poll_cycle(&sink).await;
        assert_eq!(yielded, 1);
        assert_eq!(sink.payloads(), vec!["b-8"]);
        // a's connection was invalidated and closed
        assert_eq!(broker_a.closes.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(orchestrator.cache.len(), 1);

        // the next cycle reconnects to a
        let connects_before = connector.connects.load(std::sync::atomic::Ordering::SeqCst);
        orchestrator.poll_cycle(&sink).await;
        assert_eq!(
            connector.connects.load(std::sync::atomic::Ordering::SeqCst),
            connects_before + 1
        );
    }

    #[tokio::test]
    async fn test_resolution_uses_earliest_sentinel_for_new_broker() {
        let broker = ScriptedBroker::new(
            FetchScript::Log(vec![message(310, b"m-310")]),
            300,
            310,
        );
        let (orchestrator, _) =
            orchestrator_with(vec![("a", broker.clone())], vec!["a"], OffsetMap::new());
        let sink = VecSink::default();

        let yielded = orchestrator.poll_cycle(&sink).await;
        assert_eq!(yielded, 1);
        assert_eq!(
            broker
                .metadata_queries
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert_eq!(orchestrator.tracker.get("a"), Some(310));
    }
}
