pub use directory::{BrokerDirectory, CachedDirectory, StaticDirectory, TopologySource};
pub use node::{BrokerNode, TopicPartition};

mod directory;
mod node;
