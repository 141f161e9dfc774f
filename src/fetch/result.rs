use crate::broker::BrokerNode;
use crate::client::WireMessage;

/// Failure of one broker operation. Never propagated past the fetch
/// boundary; carried inside [`FetchResult`] for the recovery policy.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("offset out of range")]
    OffsetOutOfRange,

    #[error("broker error code {0}")]
    Broker(i16),

    #[error("corrupt message: {0}")]
    CorruptMessage(String),

    #[error("transport: {0}")]
    Transport(String),
}

impl FetchError {
    pub fn is_offset_out_of_range(&self) -> bool {
        matches!(self, FetchError::OffsetOutOfRange)
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Transport(e.to_string())
    }
}

/// Outcome of one fetch against one broker, always carrying the broker and
/// the offset the fetch started at so the recovery policy has its context.
#[derive(Debug)]
pub struct FetchResult {
    pub broker: BrokerNode,
    pub begin_offset: i64,
    pub outcome: Result<Vec<WireMessage>, FetchError>,
}

impl FetchResult {
    pub fn success(broker: BrokerNode, begin_offset: i64, messages: Vec<WireMessage>) -> Self {
        FetchResult {
            broker,
            begin_offset,
            outcome: Ok(messages),
        }
    }

    pub fn failed(broker: BrokerNode, begin_offset: i64, cause: FetchError) -> Self {
        FetchResult {
            broker,
            begin_offset,
            outcome: Err(cause),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}
