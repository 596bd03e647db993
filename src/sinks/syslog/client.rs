use std::{fmt, io, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::SinkExt;
use snafu::Snafu;
use tokio::time::timeout;
use tokio_util::{codec::FramedWrite, sync::CancellationToken};

use crate::{
    clock::Clock,
    codecs::NewlineDelimitedEncoder,
    internal_events::{
        DeliveryCancelled, DeliveryFailed, DeliveryRetrying, TcpBytesSent,
        TcpConnectionFailed, TcpConnectionShutdown, TcpConnectionTimedOut, TcpSendError,
        TcpSendTimedOut,
    },
    sinks::util::{
        ConnectError, Connector, ExponentialBackoff, RetrySettings, close_stream,
        tcp::{PeerState, peer_state},
    },
};

type Framed<S> = FramedWrite<S, NewlineDelimitedEncoder>;

/// Lifecycle of the collector session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    ConnectFailed,
    WriteFailed,
    Timeout,
}

impl DeliveryErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectFailed => "connect_failed",
            Self::WriteFailed => "write_failed",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single connect-and-write attempt ended.
#[derive(Debug, Snafu)]
pub enum AttemptError {
    #[snafu(display("{}", source))]
    Connect { source: ConnectError },

    #[snafu(display("Connecting timed out after {:?}.", timeout))]
    ConnectTimeout { timeout: Duration },

    #[snafu(display("Write failed: {}", source))]
    Write { source: io::Error },

    #[snafu(display("Write timed out after {:?}.", timeout))]
    WriteTimeout { timeout: Duration },

    #[snafu(display("Collector closed the connection."))]
    ClosedByPeer,

    #[snafu(display("Delivery was cancelled."))]
    Cancelled,
}

impl AttemptError {
    pub const fn kind(&self) -> DeliveryErrorKind {
        match self {
            Self::Connect { .. } => DeliveryErrorKind::ConnectFailed,
            Self::Write { .. } | Self::ClosedByPeer => DeliveryErrorKind::WriteFailed,
            Self::ConnectTimeout { .. } | Self::WriteTimeout { .. } | Self::Cancelled => {
                DeliveryErrorKind::Timeout
            }
        }
    }
}

/// A delivery that gave up, together with how far it got.
///
/// `sent_count` lines were written and flushed before the failure; they are
/// never written again by the same delivery.
#[derive(Debug)]
pub struct DeliveryError {
    source: AttemptError,
    sent_count: usize,
}

impl DeliveryError {
    pub const fn new(source: AttemptError, sent_count: usize) -> Self {
        Self { source, sent_count }
    }

    pub const fn kind(&self) -> DeliveryErrorKind {
        self.source.kind()
    }

    pub const fn sent_count(&self) -> usize {
        self.sent_count
    }

    pub const fn attempt_error(&self) -> &AttemptError {
        &self.source
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} line(s) delivered before the failure)",
            self.source, self.sent_count
        )
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Timeouts and retry policy of a `DeliveryClient`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Bound on resolving, connecting and the TLS handshake together.
    pub connect_timeout: Duration,
    /// Bound on writing and flushing a single line.
    pub write_timeout: Duration,
    pub retry: RetrySettings,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            retry: RetrySettings::default(),
        }
    }
}

/// Writes syslog lines to the collector, reconnecting on failure.
///
/// The client owns at most one session. Lines go out strictly in order, each
/// terminated by a newline and flushed before the next one is attempted. When
/// an attempt fails the session is dropped, and after a backoff delay a new
/// one resumes from the first line that was not confirmed.
pub struct DeliveryClient<C: Connector> {
    connector: Arc<C>,
    clock: Arc<dyn Clock>,
    settings: DeliverySettings,
    state: ConnectionState,
    connection: Option<Framed<C::Stream>>,
    backoff: ExponentialBackoff,
}

impl<C: Connector> DeliveryClient<C> {
    pub fn new(connector: Arc<C>, clock: Arc<dyn Clock>, settings: DeliverySettings) -> Self {
        Self {
            connector,
            clock,
            settings,
            state: ConnectionState::Closed,
            connection: None,
            backoff: settings.retry.backoff(),
        }
    }

    /// Starts out on an already established session, such as one taken from
    /// the connection pool.
    pub fn with_stream(mut self, stream: C::Stream) -> Self {
        self.connection = Some(FramedWrite::new(stream, NewlineDelimitedEncoder::new()));
        self.state = ConnectionState::Open;
        self
    }

    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Releases the session if it is still usable.
    pub fn into_stream(self) -> Option<C::Stream> {
        match self.state {
            ConnectionState::Open => self.connection.map(FramedWrite::into_inner),
            _ => None,
        }
    }

    /// Ends a usable session in an orderly way, bounded by the write timeout.
    pub async fn shutdown(self) {
        let write_timeout = self.settings.write_timeout;
        if let Some(mut stream) = self.into_stream() {
            close_stream(&mut stream, write_timeout).await;
        }
    }

    /// Delivers `lines` in order and returns how many were flushed.
    ///
    /// On error the returned `DeliveryError` carries the count of lines
    /// flushed before giving up. Cancelling `cancel` abandons in-flight I/O
    /// right away and reports a `Timeout` with the work completed so far.
    pub async fn send(
        &mut self,
        lines: &[Bytes],
        cancel: &CancellationToken,
    ) -> Result<usize, DeliveryError> {
        let mut sent = 0;

        let outcome = {
            let deliver = self.deliver(lines, &mut sent);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = deliver => Some(result),
            }
        };

        match outcome {
            Some(result) => result,
            None => {
                // The in-flight attempt was dropped mid I/O, its session is unusable.
                self.close(ConnectionState::Failed);
                emit!(DeliveryCancelled {
                    sent_count: sent,
                    total: lines.len(),
                });
                Err(DeliveryError::new(AttemptError::Cancelled, sent))
            }
        }
    }

    async fn deliver(&mut self, lines: &[Bytes], sent: &mut usize) -> Result<usize, DeliveryError> {
        let max_retries = self.settings.retry.max_retries;
        let mut retries = 0;
        self.backoff.reset();

        while *sent < lines.len() {
            let Err(error) = self.attempt(lines, sent).await else {
                continue;
            };

            self.close(ConnectionState::Failed);
            if retries >= max_retries {
                let error = DeliveryError::new(error, *sent);
                emit!(DeliveryFailed {
                    error: &error,
                    total: lines.len(),
                });
                return Err(error);
            }

            retries += 1;
            let delay = self.backoff.next().unwrap_or(self.settings.retry.max_backoff);
            emit!(DeliveryRetrying {
                kind: error.kind(),
                attempt: retries,
                max_retries,
                delay,
                sent_count: *sent,
            });
            self.clock.sleep(delay).await;
        }

        Ok(*sent)
    }

    /// One attempt: make sure a session is open, then write every line from
    /// `sent` onwards, advancing `sent` as each is flushed.
    async fn attempt(&mut self, lines: &[Bytes], sent: &mut usize) -> Result<(), AttemptError> {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => self.connect().await?,
        };
        self.state = ConnectionState::Open;

        let write_timeout = self.settings.write_timeout;
        for line in &lines[*sent..] {
            match peer_state(connection.get_mut()) {
                PeerState::Open => {}
                PeerState::Closed => {
                    emit!(TcpConnectionShutdown);
                    return Err(AttemptError::ClosedByPeer);
                }
                PeerState::Errored(error) => {
                    emit!(TcpSendError { error: &error });
                    return Err(AttemptError::Write { source: error });
                }
            }

            match timeout(write_timeout, connection.send(line.clone())).await {
                Ok(Ok(())) => {
                    *sent += 1;
                    emit!(TcpBytesSent {
                        byte_size: line.len() + 1,
                    });
                }
                Ok(Err(error)) => {
                    emit!(TcpSendError { error: &error });
                    return Err(AttemptError::Write { source: error });
                }
                Err(_) => {
                    emit!(TcpSendTimedOut {
                        timeout_secs: write_timeout.as_secs_f64(),
                    });
                    return Err(AttemptError::WriteTimeout {
                        timeout: write_timeout,
                    });
                }
            }
        }

        self.connection = Some(connection);
        Ok(())
    }

    async fn connect(&mut self) -> Result<Framed<C::Stream>, AttemptError> {
        self.state = ConnectionState::Connecting;
        let connect_timeout = self.settings.connect_timeout;

        match timeout(connect_timeout, self.connector.connect()).await {
            Ok(Ok(stream)) => {
                self.backoff.reset();
                Ok(FramedWrite::new(stream, NewlineDelimitedEncoder::new()))
            }
            Ok(Err(error)) => {
                emit!(TcpConnectionFailed { error: &error });
                Err(AttemptError::Connect { source: error })
            }
            Err(_) => {
                emit!(TcpConnectionTimedOut {
                    timeout_secs: connect_timeout.as_secs_f64(),
                });
                Err(AttemptError::ConnectTimeout {
                    timeout: connect_timeout,
                })
            }
        }
    }

    fn close(&mut self, state: ConnectionState) {
        self.connection = None;
        self.state = state;
    }
}
