//! Scripted brokers, connectors and sinks shared by the consumption tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::broker::{BrokerNode, TopicPartition};
use crate::client::{BrokerApi, Connector, WireMessage};
use crate::fetch::FetchError;
use crate::{AppError, AppResult};

use super::{ConsumedMessage, MessageSink};

pub fn message(offset: i64, payload: &'static [u8]) -> WireMessage {
    WireMessage {
        offset,
        payload: Bytes::from_static(payload),
    }
}

/// What a scripted broker answers to fetches.
pub enum FetchScript {
    /// Acts like a log: returns the scripted messages past the requested
    /// offset.
    Log(Vec<WireMessage>),
    /// Returns the scripted messages verbatim, whatever was requested.
    Raw(Vec<WireMessage>),
    /// Every fetch reports an out-of-range offset.
    OutOfRange,
    /// Every fetch fails at the transport.
    Broken,
}

pub struct ScriptedBroker {
    pub script: FetchScript,
    pub earliest: i64,
    pub latest: i64,
    pub fetches: AtomicUsize,
    pub metadata_queries: AtomicUsize,
    pub closes: AtomicUsize,
}

impl ScriptedBroker {
    pub fn new(script: FetchScript, earliest: i64, latest: i64) -> Arc<Self> {
        Arc::new(ScriptedBroker {
            script,
            earliest,
            latest,
            fetches: AtomicUsize::new(0),
            metadata_queries: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl BrokerApi for ScriptedBroker {
    async fn fetch(
        &self,
        _tp: &TopicPartition,
        offset: i64,
        _max_bytes: i32,
    ) -> Result<Vec<WireMessage>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            FetchScript::Log(messages) => Ok(messages
                .iter()
                .filter(|m| m.offset > offset)
                .cloned()
                .collect()),
            FetchScript::Raw(messages) => Ok(messages.clone()),
            FetchScript::OutOfRange => Err(FetchError::OffsetOutOfRange),
            FetchScript::Broken => Err(FetchError::Transport("connection reset".to_string())),
        }
    }

    async fn offsets_before(
        &self,
        _tp: &TopicPartition,
        time: i64,
        _max_count: i32,
    ) -> Result<Vec<i64>, FetchError> {
        self.metadata_queries.fetch_add(1, Ordering::SeqCst);
        match time {
            crate::offset::EARLIEST_OFFSET => Ok(vec![self.earliest]),
            crate::offset::LATEST_OFFSET => Ok(vec![self.latest]),
            other => Err(FetchError::Transport(format!(
                "unexpected sentinel {}",
                other
            ))),
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector handing out pre-scripted brokers by node id.
#[derive(Default)]
pub struct ScriptedConnector {
    pub brokers: Mutex<HashMap<String, Arc<ScriptedBroker>>>,
    pub connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn with(brokers: Vec<(&str, Arc<ScriptedBroker>)>) -> Arc<Self> {
        let connector = ScriptedConnector::default();
        {
            let mut table = connector.brokers.lock();
            for (id, broker) in brokers {
                table.insert(id.to_string(), broker);
            }
        }
        Arc::new(connector)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        node: &BrokerNode,
        _fetch_size_hint: i32,
    ) -> AppResult<Arc<dyn BrokerApi>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.brokers
            .lock()
            .get(&node.id)
            .map(|broker| broker.clone() as Arc<dyn BrokerApi>)
            .ok_or_else(|| AppError::IllegalState(format!("no scripted broker {}", node.id)))
    }
}

/// Collects every processed message in yield order.
#[derive(Default)]
pub struct VecSink {
    pub messages: Mutex<Vec<ConsumedMessage>>,
}

impl VecSink {
    pub fn payloads(&self) -> Vec<Bytes> {
        self.messages.lock().iter().map(|m| m.payload.clone()).collect()
    }
}

#[async_trait]
impl MessageSink for VecSink {
    async fn process(&self, message: ConsumedMessage) -> AppResult<()> {
        self.messages.lock().push(message);
        Ok(())
    }
}

pub fn node(id: &str) -> BrokerNode {
    BrokerNode::new(id, "127.0.0.1", 9092)
}
