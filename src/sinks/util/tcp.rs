use std::{
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use futures::task::noop_waker_ref;
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::{TcpStream, lookup_host},
    time::timeout,
};

use crate::{
    internal_events::{TcpCloseFailed, TcpConnectionClosed, TcpConnectionEstablished},
    tls::{MaybeTlsSettings, MaybeTlsStream, TlsError},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConnectError {
    #[snafu(display("Unable to resolve DNS for {:?}: {}", host, source))]
    Dns { host: String, source: io::Error },

    #[snafu(display("No addresses returned for {:?}.", host))]
    NoAddresses { host: String },

    #[snafu(display("Connect error to {}: {}", addr, source))]
    Connect { addr: SocketAddr, source: io::Error },

    #[snafu(display("Connect error: {}", source))]
    Tls { source: TlsError },
}

/// Opens streams to the collector.
///
/// A connector only knows how to establish a session. Timeouts, retries and
/// line writing live in the delivery client on top of it.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self) -> Result<Self::Stream, ConnectError>;
}

/// Connects over TCP, negotiating TLS on top when enabled.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    host: String,
    port: u16,
    tls: MaybeTlsSettings,
}

impl TcpConnector {
    pub const fn new(host: String, port: u16, tls: MaybeTlsSettings) -> Self {
        Self { host, port, tls }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = MaybeTlsStream<TcpStream>;

    async fn connect(&self) -> Result<Self::Stream, ConnectError> {
        debug!(message = "Resolving DNS.", host = %self.host);
        let addr = lookup_host((self.host.as_str(), self.port))
            .await
            .context(DnsSnafu { host: &self.host })?
            .next()
            .context(NoAddressesSnafu { host: &self.host })?;

        debug!(message = "Connecting.", %addr);
        let stream = TcpStream::connect(addr)
            .await
            .context(ConnectSnafu { addr })?;
        let stream = self
            .tls
            .connect(&self.host, stream)
            .await
            .context(TlsSnafu)?;

        emit!(TcpConnectionEstablished {
            peer_addr: Some(addr),
        });
        Ok(stream)
    }
}

/// What a non-blocking read reveals about the remote end of a stream.
#[derive(Debug)]
pub(crate) enum PeerState {
    /// Nothing to read yet, the session looks usable.
    Open,
    /// The collector sent EOF.
    Closed,
    /// The read failed, typically a reset.
    Errored(io::Error),
}

/// Polls a one byte read without waiting.
///
/// The collector never talks back, so a pending read means the session is
/// still up while EOF or an error means it is gone and a write would be lost.
pub(crate) fn peer_state<S: AsyncRead + Unpin>(stream: &mut S) -> PeerState {
    let mut cx = Context::from_waker(noop_waker_ref());
    let mut byte = [0u8; 1];
    let mut buf = ReadBuf::new(&mut byte);
    match Pin::new(stream).poll_read(&mut cx, &mut buf) {
        Poll::Pending => PeerState::Open,
        Poll::Ready(Ok(())) if buf.filled().is_empty() => PeerState::Closed,
        Poll::Ready(Ok(())) => {
            trace!(message = "Discarding unexpected data from the collector.");
            PeerState::Open
        }
        Poll::Ready(Err(error)) => PeerState::Errored(error),
    }
}

/// Ends a session the orderly way, with a TLS `close_notify` where TLS is in
/// use followed by a FIN, waiting at most `limit` for it to go out.
///
/// A session the collector already closed is left to be dropped.
pub async fn close_stream<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, limit: Duration) {
    // Give the reactor a turn so the peer check sees what the collector sent.
    tokio::task::yield_now().await;
    if !matches!(peer_state(stream), PeerState::Open) {
        return;
    }
    match timeout(limit, stream.shutdown()).await {
        Ok(Ok(())) => emit!(TcpConnectionClosed),
        Ok(Err(error)) => emit!(TcpCloseFailed {
            error: Some(&error)
        }),
        Err(_) => emit!(TcpCloseFailed { error: None }),
    }
}
