//! The per-envelope entry point.

use std::{fmt, sync::Arc, time::Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    clock::{Clock, SystemClock},
    codecs::{DecodeError, SyslogSerializer, decode},
    config::{ConfigError, ForwarderConfig},
    event::LogBatch,
    internal_events::{
        ControlMessageSkipped, EnvelopeDecodeError, EnvelopeDecoded, InvocationCompleted,
        InvocationFailed,
    },
    sinks::{
        syslog::{
            ConnectionPool, DeliveryClient, DeliveryError, DeliveryErrorKind, DeliverySettings,
            PoolKey,
        },
        util::{Connector, TcpConnector, close_stream},
    },
};

/// Category of a failed invocation, as reported to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationErrorKind {
    Decode,
    Config,
    ConnectFailed,
    WriteFailed,
    Timeout,
}

impl InvocationErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Config => "config",
            Self::ConnectFailed => "connect_failed",
            Self::WriteFailed => "write_failed",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for InvocationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DeliveryErrorKind> for InvocationErrorKind {
    fn from(kind: DeliveryErrorKind) -> Self {
        match kind {
            DeliveryErrorKind::ConnectFailed => Self::ConnectFailed,
            DeliveryErrorKind::WriteFailed => Self::WriteFailed,
            DeliveryErrorKind::Timeout => Self::Timeout,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvocationError {
    pub kind: InvocationErrorKind,
    pub message: String,
}

impl From<&DecodeError> for InvocationError {
    fn from(error: &DecodeError) -> Self {
        Self {
            kind: InvocationErrorKind::Decode,
            message: error.to_string(),
        }
    }
}

impl From<&ConfigError> for InvocationError {
    fn from(error: &ConfigError) -> Self {
        Self {
            kind: InvocationErrorKind::Config,
            message: error.to_string(),
        }
    }
}

impl From<&DeliveryError> for InvocationError {
    fn from(error: &DeliveryError) -> Self {
        Self {
            kind: error.kind().into(),
            message: error.to_string(),
        }
    }
}

/// Outcome of one invocation.
///
/// `delivered` lines were flushed to the collector out of `total`. A present
/// `error` means the invocation failed, even if some lines made it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvocationResult {
    pub delivered: usize,
    pub total: usize,
    pub error: Option<InvocationError>,
}

impl InvocationResult {
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn completed(delivered: usize, total: usize, elapsed: std::time::Duration) -> Self {
        emit!(InvocationCompleted {
            delivered,
            total,
            elapsed,
        });
        Self {
            delivered,
            total,
            error: None,
        }
    }

    fn failed(
        error: InvocationError,
        delivered: usize,
        total: usize,
        elapsed: std::time::Duration,
    ) -> Self {
        emit!(InvocationFailed {
            error: &error,
            delivered,
            total,
            elapsed,
        });
        Self {
            delivered,
            total,
            error: Some(error),
        }
    }
}

/// Forwards envelopes to one collector.
///
/// A forwarder holds everything an invocation needs that outlives it: the
/// connector, the line serializer and, when connection reuse is enabled, the
/// pool of idle sessions. Invocations may run concurrently on a shared
/// forwarder; each one gets its own session.
pub struct Forwarder<C: Connector = TcpConnector> {
    connector: Arc<C>,
    clock: Arc<dyn Clock>,
    serializer: SyslogSerializer,
    settings: DeliverySettings,
    pool_key: PoolKey,
    pool: Option<ConnectionPool<C::Stream>>,
}

impl Forwarder<TcpConnector> {
    /// Builds a forwarder connecting over TCP, with TLS unless disabled.
    pub fn new(config: &ForwarderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let connector = TcpConnector::new(
            config.remote_host.clone(),
            config.remote_port,
            config.tls_settings()?,
        );
        Ok(Self::with_connector(config, connector, Arc::new(SystemClock)))
    }
}

impl<C: Connector> Forwarder<C> {
    pub fn with_connector(config: &ForwarderConfig, connector: C, clock: Arc<dyn Clock>) -> Self {
        Self {
            connector: Arc::new(connector),
            clock,
            serializer: config.serializer_config().build(),
            settings: config.delivery_settings(),
            pool_key: config.pool_key(),
            pool: config.reuse_connections.then(ConnectionPool::default),
        }
    }

    pub const fn pool(&self) -> Option<&ConnectionPool<C::Stream>> {
        self.pool.as_ref()
    }

    /// Closes every idle pooled session. Call once no invocation is running.
    pub async fn shutdown(&self) {
        let Some(pool) = &self.pool else {
            return;
        };
        for mut stream in pool.drain() {
            close_stream(&mut stream, self.settings.write_timeout).await;
        }
    }

    /// Forwards every event of one envelope, in order.
    ///
    /// A malformed envelope fails before any connection is made. Cancelling
    /// `cancel` aborts in-flight I/O and reports what was delivered so far.
    pub async fn handle(&self, raw: &[u8], cancel: &CancellationToken) -> InvocationResult {
        let start = Instant::now();

        let batch = match decode(raw) {
            Ok(batch) => batch,
            Err(error) => {
                emit!(EnvelopeDecodeError { error: &error });
                return InvocationResult::failed((&error).into(), 0, 0, start.elapsed());
            }
        };
        emit!(EnvelopeDecoded {
            log_group: &batch.log_group,
            log_stream: &batch.log_stream,
            message_type: batch.message_type,
            count: batch.len(),
            byte_size: raw.len(),
        });

        let span = info_span!(
            "invocation",
            log_group = %batch.log_group,
            log_stream = %batch.log_stream,
        );
        self.forward(batch, cancel, start).instrument(span).await
    }

    async fn forward(
        &self,
        batch: LogBatch,
        cancel: &CancellationToken,
        start: Instant,
    ) -> InvocationResult {
        if batch.is_control_message() {
            emit!(ControlMessageSkipped {
                owner: &batch.owner,
            });
            return InvocationResult::completed(0, 0, start.elapsed());
        }

        let lines = self.serializer.encode_batch(&batch, self.clock.as_ref());
        drop(batch);

        let total = lines.len();
        let span = info_span!(
            "connection",
            host = %self.pool_key.host,
            port = self.pool_key.port,
        );
        match self.deliver(&lines, cancel).instrument(span).await {
            Ok(delivered) => InvocationResult::completed(delivered, total, start.elapsed()),
            Err(error) => InvocationResult::failed(
                (&error).into(),
                error.sent_count(),
                total,
                start.elapsed(),
            ),
        }
    }

    async fn deliver(
        &self,
        lines: &[Bytes],
        cancel: &CancellationToken,
    ) -> Result<usize, DeliveryError> {
        let mut lease = self.pool.as_ref().map(|pool| pool.checkout(&self.pool_key));

        let mut client = DeliveryClient::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.clock),
            self.settings,
        );
        if let Some(stream) = lease.as_mut().and_then(|lease| lease.take()) {
            client = client.with_stream(stream);
        }

        // A failed or cancelled session is dropped with the client.
        let sent = client.send(lines, cancel).await?;
        match lease {
            Some(lease) => {
                let surplus = client.into_stream().and_then(|stream| lease.release(stream));
                if let Some(mut surplus) = surplus {
                    close_stream(&mut surplus, self.settings.write_timeout).await;
                }
            }
            None => client.shutdown().await,
        }
        Ok(sent)
    }
}

/// Forwards one envelope with a forwarder built for this call alone.
///
/// Nothing is shared with other calls, so no session is reused. Long running
/// callers should build a [`Forwarder`] once and call [`Forwarder::handle`].
pub async fn handle(raw: &[u8], config: &ForwarderConfig) -> InvocationResult {
    let start = Instant::now();
    match Forwarder::new(config) {
        Ok(forwarder) => {
            let result = forwarder.handle(raw, &CancellationToken::new()).await;
            forwarder.shutdown().await;
            result
        }
        Err(error) => InvocationResult::failed((&error).into(), 0, 0, start.elapsed()),
    }
}
