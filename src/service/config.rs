use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::offset::AutoOffsetReset;

use super::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub client_id: String,
    /// how long a poll loop sleeps after an empty cycle
    pub poll_interval_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            client_id: "hydramq".to_string(),
            poll_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub refresh_interval_ms: u64,
    /// static topology, one route per topic partition
    pub routes: Vec<RouteConfig>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig {
            refresh_interval_ms: 10_000,
            routes: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub topic: String,
    pub partition: i32,
    /// broker addresses in `id@host:port` form
    pub brokers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub so_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub reap_interval_ms: u64,
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            so_timeout_ms: 5_000,
            idle_timeout_ms: 60_000,
            reap_interval_ms: 5_000,
            max_frame_size: 8 * 1024 * 1024,
        }
    }
}

impl ConnectionConfig {
    pub fn so_timeout(&self) -> Duration {
        Duration::from_millis(self.so_timeout_ms)
    }
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_bytes: i32,
    /// 0 means one permit per cpu
    pub max_concurrent_fetches: usize,
    pub auto_offset_reset: AutoOffsetReset,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            max_bytes: 1024 * 1024,
            max_concurrent_fetches: 0,
            auto_offset_reset: AutoOffsetReset::Earliest,
        }
    }
}

impl FetchConfig {
    pub fn fetch_permits(&self) -> usize {
        if self.max_concurrent_fetches == 0 {
            num_cpus::get()
        } else {
            self.max_concurrent_fetches
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetConfig {
    /// empty path disables durable offsets
    pub store_path: String,
    pub commit_interval_ms: u64,
}

impl Default for OffsetConfig {
    fn default() -> Self {
        OffsetConfig {
            store_path: String::new(),
            commit_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub general: GeneralConfig,
    pub directory: DirectoryConfig,
    pub connection: ConnectionConfig,
    pub fetch: FetchConfig,
    pub offset: OffsetConfig,
    /// topic partitions to consume, in `topic-partition` form
    pub assignments: Vec<String>,
}

impl ConsumerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<ConsumerConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let consumer_config: ConsumerConfig = config.try_deserialize()?;

        Ok(consumer_config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.general.poll_interval_ms)
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.offset.commit_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.connection.idle_timeout_ms, 60_000);
        assert_eq!(config.fetch.max_bytes, 1024 * 1024);
        assert!(config.assignments.is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(
            file,
            r#"
            assignments = ["events-0"]

            [general]
            client_id = "collector"

            [fetch]
            max_bytes = 65536
            auto_offset_reset = "latest"

            [[directory.routes]]
            topic = "events"
            partition = 0
            brokers = ["b1@127.0.0.1:9092"]
            "#
        )
        .unwrap();

        let config = ConsumerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.general.client_id, "collector");
        assert_eq!(config.fetch.max_bytes, 65536);
        assert_eq!(config.fetch.auto_offset_reset, AutoOffsetReset::Latest);
        assert_eq!(config.directory.routes.len(), 1);
        assert_eq!(config.assignments, vec!["events-0".to_string()]);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let result = ConsumerConfig::from_file("/nonexistent/hydramq.toml");
        assert!(matches!(result, Err(AppError::ConfigFileError(_))));
    }
}
