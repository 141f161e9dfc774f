mod broker;
mod client;
mod consume;
mod fetch;
mod offset;
mod service;

pub use broker::{BrokerDirectory, BrokerNode, CachedDirectory, StaticDirectory, TopicPartition, TopologySource};
pub use client::{BrokerApi, BrokerConnection, ConnectionCache, Connector, TcpConnector, WireMessage};
pub use consume::{ConsumedMessage, ConsumerEngine, ConsumptionOrchestrator, EngineHandle, MessageSink};
pub use fetch::{FetchError, FetchExecutor, FetchResult};
pub use offset::{
    AutoOffsetReset, MemoryOffsetStore, OffsetCommitter, OffsetMap, OffsetStore, OffsetTracker,
    RocksOffsetStore, EARLIEST_OFFSET, LATEST_OFFSET,
};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, ConnectionConfig, ConsumerConfig,
    DirectoryConfig, FetchConfig, GeneralConfig, OffsetConfig, RouteConfig, Shutdown,
    ShutdownNotifier,
};
