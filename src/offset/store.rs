use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use rocksdb::{IteratorMode, DB};
use tracing::trace;

use crate::broker::TopicPartition;
use crate::{AppError, AppResult};

use super::OffsetMap;

/// Durable per-broker offsets for a topic partition.
///
/// Entries are addressed by the composite (topic, partition, broker id)
/// key and store the offset as 8 big-endian bytes. Running without a store
/// is legal: offsets then start from defaults and are never persisted.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    async fn load(&self, topic_partition: &TopicPartition) -> AppResult<OffsetMap>;
    async fn save(&self, topic_partition: &TopicPartition, offsets: &OffsetMap) -> AppResult<()>;
}

/// Offset store backed by a local rocksdb database.
pub struct RocksOffsetStore {
    db: DB,
}

impl RocksOffsetStore {
    const OFFSET_PREFIX: &'static str = "offset";

    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<RocksOffsetStore> {
        let db = DB::open_default(path)?;
        Ok(RocksOffsetStore { db })
    }

    fn key_prefix(topic_partition: &TopicPartition) -> String {
        format!("{}:{}:", Self::OFFSET_PREFIX, topic_partition.id())
    }

    fn store_key(topic_partition: &TopicPartition, broker_id: &str) -> String {
        format!("{}{}", Self::key_prefix(topic_partition), broker_id)
    }
}

#[async_trait]
impl OffsetStore for RocksOffsetStore {
    async fn load(&self, topic_partition: &TopicPartition) -> AppResult<OffsetMap> {
        let prefix = Self::key_prefix(topic_partition);
        let mode = IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward);

        let mut offsets = OffsetMap::new();
        for entry in self.db.iterator(mode) {
            let (key, value) = entry?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let broker_id = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
            let bytes: [u8; 8] = value.as_ref().try_into().map_err(|_| {
                AppError::InvalidValue(format!(
                    "stored offset for broker {} is {} bytes, expected 8",
                    broker_id,
                    value.len()
                ))
            })?;
            offsets.insert(broker_id, i64::from_be_bytes(bytes));
        }
        trace!(
            "loaded {} broker offset(s) for {}",
            offsets.len(),
            topic_partition
        );
        Ok(offsets)
    }

    async fn save(&self, topic_partition: &TopicPartition, offsets: &OffsetMap) -> AppResult<()> {
        for (broker_id, offset) in offsets {
            let key = Self::store_key(topic_partition, broker_id);
            self.db.put(key.as_bytes(), offset.to_be_bytes())?;
        }
        Ok(())
    }
}

/// In-process offset store, mainly for tests and embedded setups.
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    entries: parking_lot::Mutex<HashMap<String, i64>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn load(&self, topic_partition: &TopicPartition) -> AppResult<OffsetMap> {
        let prefix = RocksOffsetStore::key_prefix(topic_partition);
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, offset)| (key[prefix.len()..].to_string(), *offset))
            .collect())
    }

    async fn save(&self, topic_partition: &TopicPartition, offsets: &OffsetMap) -> AppResult<()> {
        let mut entries = self.entries.lock();
        for (broker_id, offset) in offsets {
            entries.insert(
                RocksOffsetStore::store_key(topic_partition, broker_id),
                *offset,
            );
        }
        Ok(())
    }
}
