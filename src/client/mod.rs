pub use cache::ConnectionCache;
pub use codec::{error_code, ResponseFrame, WireMessage};
pub use connection::{BrokerApi, BrokerConnection, Connector, TcpConnector};

pub mod codec;

mod cache;
mod connection;
