pub use app_error::{AppError, AppResult};
pub use config::{
    ConnectionConfig, ConsumerConfig, DirectoryConfig, FetchConfig, GeneralConfig, OffsetConfig,
    RouteConfig,
};
pub use shutdown::{Shutdown, ShutdownNotifier};
pub use tracing_config::{setup_local_tracing, setup_tracing};

mod app_error;
mod config;
mod shutdown;
mod tracing_config;
