use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::broker::{BrokerNode, TopicPartition};
use crate::fetch::FetchError;
use crate::service::ConnectionConfig;
use crate::{AppError, AppResult};

use super::codec::{self, error_code, ResponseFrame, WireMessage};

/// Broker-facing operations of one connection. The seam for swapping the
/// TCP transport out in tests.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// One fetch round trip, starting at `offset`, at most `max_bytes` of
    /// message-set bytes.
    async fn fetch(
        &self,
        topic_partition: &TopicPartition,
        offset: i64,
        max_bytes: i32,
    ) -> Result<Vec<WireMessage>, FetchError>;

    /// Metadata query translating a sentinel time (earliest/latest) into
    /// concrete offsets, newest first.
    async fn offsets_before(
        &self,
        topic_partition: &TopicPartition,
        time: i64,
        max_count: i32,
    ) -> Result<Vec<i64>, FetchError>;

    /// Closes the transport. Failures are logged, never propagated.
    async fn close(&self);
}

/// Creates connections for the cache. Implementations must hand back a
/// ready-to-use handle; the cache guarantees at most one per broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        node: &BrokerNode,
        fetch_size_hint: i32,
    ) -> AppResult<Arc<dyn BrokerApi>>;
}

#[derive(Debug)]
struct ConnState {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

/// A live TCP connection to one broker.
///
/// Requests are strictly serialized: the protocol has no correlation ids,
/// so one round trip owns the stream at a time.
#[derive(Debug)]
pub struct BrokerConnection {
    node: BrokerNode,
    so_timeout: Duration,
    max_frame_size: usize,
    state: tokio::sync::Mutex<ConnState>,
}

impl BrokerConnection {
    pub async fn connect(
        node: BrokerNode,
        config: &ConnectionConfig,
        fetch_size_hint: i32,
    ) -> AppResult<BrokerConnection> {
        let stream = tokio::time::timeout(config.so_timeout(), TcpStream::connect(node.addr()))
            .await
            .map_err(|_| {
                AppError::DetailedIoError(format!("timed out connecting to broker {}", node))
            })??;
        debug!("connected to broker {}", node);
        let buffer_capacity = (fetch_size_hint.max(0) as usize).max(4 * 1024);
        Ok(BrokerConnection {
            node,
            so_timeout: config.so_timeout(),
            max_frame_size: config.max_frame_size,
            state: tokio::sync::Mutex::new(ConnState {
                stream: BufWriter::new(stream),
                buffer: BytesMut::with_capacity(buffer_capacity),
            }),
        })
    }

    async fn round_trip(&self, request: BytesMut) -> Result<ResponseFrame, FetchError> {
        let mut state = self.state.lock().await;
        let io = async {
            let ConnState { stream, buffer } = &mut *state;
            stream.write_all(&request).await?;
            stream.flush().await?;
            loop {
                match ResponseFrame::parse(buffer, self.max_frame_size) {
                    Ok(Some(frame)) => return Ok(frame),
                    Ok(None) => {}
                    Err(e) => return Err(FetchError::CorruptMessage(e.to_string())),
                }
                if 0 == stream.read_buf(buffer).await? {
                    return Err(FetchError::Transport(
                        "connection reset by peer".to_string(),
                    ));
                }
            }
        };
        match tokio::time::timeout(self.so_timeout, io).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transport(format!(
                "request to broker {} timed out",
                self.node
            ))),
        }
    }
}

fn map_error_code(code: i16) -> FetchError {
    match code {
        error_code::OFFSET_OUT_OF_RANGE => FetchError::OffsetOutOfRange,
        other => FetchError::Broker(other),
    }
}

#[async_trait]
impl BrokerApi for BrokerConnection {
    async fn fetch(
        &self,
        topic_partition: &TopicPartition,
        offset: i64,
        max_bytes: i32,
    ) -> Result<Vec<WireMessage>, FetchError> {
        let mut request = BytesMut::new();
        codec::encode_fetch_request(&mut request, topic_partition, offset, max_bytes);
        let frame = self.round_trip(request).await?;
        if frame.error_code != error_code::NONE {
            return Err(map_error_code(frame.error_code));
        }
        let mut body = frame.body;
        codec::decode_message_set(&mut body, offset)
            .map_err(|e| FetchError::CorruptMessage(e.to_string()))
    }

    async fn offsets_before(
        &self,
        topic_partition: &TopicPartition,
        time: i64,
        max_count: i32,
    ) -> Result<Vec<i64>, FetchError> {
        let mut request = BytesMut::new();
        codec::encode_offsets_request(&mut request, topic_partition, time, max_count);
        let frame = self.round_trip(request).await?;
        if frame.error_code != error_code::NONE {
            return Err(map_error_code(frame.error_code));
        }
        let mut body = frame.body;
        codec::decode_offsets(&mut body).map_err(|e| FetchError::CorruptMessage(e.to_string()))
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Err(e) = state.stream.shutdown().await {
            error!("exception when closing connection to {}: {}", self.node, e);
        }
    }
}

/// Default connector establishing [`BrokerConnection`]s.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    config: ConnectionConfig,
}

impl TcpConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        TcpConnector { config }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        node: &BrokerNode,
        fetch_size_hint: i32,
    ) -> AppResult<Arc<dyn BrokerApi>> {
        let connection =
            BrokerConnection::connect(node.clone(), &self.config, fetch_size_hint).await?;
        Ok(Arc::new(connection))
    }
}
