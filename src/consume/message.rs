use async_trait::async_trait;
use bytes::Bytes;

use crate::broker::TopicPartition;
use crate::offset::OffsetMap;
use crate::AppResult;

/// One delivered message.
///
/// `offsets` is the partition's offset map snapshot taken after advancing
/// past this message, so persisting it acknowledges everything up to and
/// including this message. The key is always absent in this protocol
/// generation.
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub topic_partition: TopicPartition,
    pub offsets: OffsetMap,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// Caller-supplied per-message processing, invoked once per yielded
/// message in yield order. A sink failure is logged and consumption moves
/// on; retries and dead-lettering are the caller's policy, not the
/// engine's.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn process(&self, message: ConsumedMessage) -> AppResult<()>;
}
