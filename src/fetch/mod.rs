pub use executor::FetchExecutor;
pub use result::{FetchError, FetchResult};

mod executor;
mod result;
