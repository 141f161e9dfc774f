pub use committer::OffsetCommitter;
pub use store::{MemoryOffsetStore, OffsetStore, RocksOffsetStore};
pub use tracker::{AutoOffsetReset, OffsetMap, OffsetTracker, EARLIEST_OFFSET, LATEST_OFFSET};

mod committer;
mod store;
mod tracker;
