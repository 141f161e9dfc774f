use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use crate::{AppError, AppResult};

/// One unit of consumption: a named stream plus a partition index.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl Display for TopicPartition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    pub fn id(&self) -> String {
        format!("{}-{}", self.topic, self.partition)
    }

    pub fn from_string(str_name: Cow<str>) -> AppResult<Self> {
        let (topic, partition) = str_name
            .rsplit_once('-')
            .ok_or_else(|| AppError::InvalidValue(format!("topic partition name: {}", str_name)))?;

        let partition = partition
            .parse()
            .map_err(|_| AppError::InvalidValue(format!("topic partition id: {}", partition)))?;

        Ok(Self::new(topic.to_string(), partition))
    }
}

/// Identity of one broker process. In a 0.7-era cluster every broker hosting
/// a partition answers fetches for it, so this is the key for both the
/// connection cache and the per-broker offset map.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BrokerNode {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl Display for BrokerNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

impl BrokerNode {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parses the `id@host:port` form used in route configuration.
    pub fn from_string(str_name: Cow<str>) -> AppResult<Self> {
        let invalid = || AppError::InvalidValue(format!("broker address: {}", str_name));
        let (id, addr) = str_name.split_once('@').ok_or_else(invalid)?;
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse().map_err(|_| invalid())?;
        if id.is_empty() || host.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(id.to_string(), host.to_string(), port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_partition_round_trip() {
        let tp = TopicPartition::new("user-events", 3);
        assert_eq!(tp.id(), "user-events-3");
        let parsed = TopicPartition::from_string(Cow::Owned(tp.id())).unwrap();
        assert_eq!(parsed, tp);
    }

    #[test]
    fn test_broker_node_from_string() {
        let node = BrokerNode::from_string(Cow::Borrowed("b1@10.0.0.1:9092")).unwrap();
        assert_eq!(node.id, "b1");
        assert_eq!(node.addr(), "10.0.0.1:9092");

        assert!(BrokerNode::from_string(Cow::Borrowed("10.0.0.1:9092")).is_err());
        assert!(BrokerNode::from_string(Cow::Borrowed("b1@host:notaport")).is_err());
    }
}
