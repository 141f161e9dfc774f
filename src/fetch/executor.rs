use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::error;

use crate::broker::{BrokerNode, TopicPartition};
use crate::client::BrokerApi;

use super::{FetchError, FetchResult};

/// Performs single-broker fetches under a bounded permit pool.
///
/// Every failure is captured into the returned [`FetchResult`], never
/// raised to the caller; the orchestrator decides recovery per result.
#[derive(Debug)]
pub struct FetchExecutor {
    permits: Arc<Semaphore>,
}

impl FetchExecutor {
    pub fn new(max_concurrent_fetches: usize) -> Self {
        FetchExecutor {
            permits: Arc::new(Semaphore::new(max_concurrent_fetches.max(1))),
        }
    }

    /// One network round trip against one broker.
    pub async fn fetch(
        &self,
        broker: BrokerNode,
        connection: Arc<dyn BrokerApi>,
        topic_partition: &TopicPartition,
        offset: i64,
        max_bytes: i32,
    ) -> FetchResult {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return FetchResult::failed(
                    broker,
                    offset,
                    FetchError::Transport("fetch executor closed".to_string()),
                )
            }
        };

        match connection.fetch(topic_partition, offset, max_bytes).await {
            Ok(messages) => FetchResult::success(broker, offset, messages),
            Err(cause) => {
                error!(
                    "failed to fetch from broker {} for {} at offset {}: {}",
                    broker, topic_partition, offset, cause
                );
                FetchResult::failed(broker, offset, cause)
            }
        }
    }
}
