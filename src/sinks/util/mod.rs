pub mod retries;
pub mod tcp;

pub use retries::{ExponentialBackoff, RetrySettings};
pub use tcp::{ConnectError, Connector, TcpConnector, close_stream};
