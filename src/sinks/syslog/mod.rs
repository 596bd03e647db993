//! Delivery of rendered syslog lines to the collector.

mod client;
mod pool;

pub use self::client::{
    AttemptError, ConnectionState, DeliveryClient, DeliveryError, DeliveryErrorKind,
    DeliverySettings,
};
pub use self::pool::{ConnectionPool, PoolKey, PooledConnection};
