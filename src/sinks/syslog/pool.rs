use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use tokio::io::AsyncRead;

use crate::{
    internal_events::{PooledConnectionDiscarded, PooledConnectionReturned, PooledConnectionReused},
    sinks::util::tcp::{PeerState, peer_state},
};

const DEFAULT_MAX_IDLE_PER_KEY: usize = 4;

/// Identity of a collector session: sessions are only reused for the same
/// destination and transport.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl PoolKey {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "tls" } else { "tcp" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

type Idle<S> = Arc<Mutex<HashMap<PoolKey, Vec<S>>>>;

/// Idle collector sessions shared between invocations.
///
/// A session is either idle in the pool or held by exactly one
/// `PooledConnection` lease, never both, so two invocations can not write to
/// the same stream.
pub struct ConnectionPool<S> {
    idle: Idle<S>,
    max_idle_per_key: usize,
}

impl<S> Clone for ConnectionPool<S> {
    fn clone(&self) -> Self {
        Self {
            idle: Arc::clone(&self.idle),
            max_idle_per_key: self.max_idle_per_key,
        }
    }
}

impl<S> Default for ConnectionPool<S> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_PER_KEY)
    }
}

impl<S> fmt::Debug for ConnectionPool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_idle_per_key", &self.max_idle_per_key)
            .finish_non_exhaustive()
    }
}

impl<S> ConnectionPool<S> {
    pub fn new(max_idle_per_key: usize) -> Self {
        Self {
            idle: Arc::default(),
            max_idle_per_key,
        }
    }

    /// Number of idle sessions held for `key`.
    pub fn idle_count(&self, key: &PoolKey) -> usize {
        self.idle
            .lock()
            .map(|idle| idle.get(key).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Takes every idle session out of the pool, for closing.
    pub fn drain(&self) -> Vec<S> {
        self.idle
            .lock()
            .map(|mut idle| idle.drain().flat_map(|(_, streams)| streams).collect())
            .unwrap_or_default()
    }
}

impl<S: AsyncRead + Unpin> ConnectionPool<S> {
    /// Leases an idle session for `key`, if a live one exists.
    ///
    /// Idle sessions the collector has closed in the meantime are dropped
    /// here rather than handed out. The lease is returned whether or not it
    /// holds a session; whatever it holds when dropped goes back to the pool.
    pub fn checkout(&self, key: &PoolKey) -> PooledConnection<S> {
        let mut stream = None;

        if let Ok(mut idle) = self.idle.lock()
            && let Some(streams) = idle.get_mut(key)
        {
            while let Some(mut candidate) = streams.pop() {
                match peer_state(&mut candidate) {
                    PeerState::Open => {
                        stream = Some(candidate);
                        break;
                    }
                    PeerState::Closed => emit!(PooledConnectionDiscarded {
                        host: &key.host,
                        port: key.port,
                        reason: "closed_by_peer",
                    }),
                    PeerState::Errored(_) => emit!(PooledConnectionDiscarded {
                        host: &key.host,
                        port: key.port,
                        reason: "read_error",
                    }),
                }
            }
        }

        if stream.is_some() {
            emit!(PooledConnectionReused {
                host: &key.host,
                port: key.port,
            });
        }

        PooledConnection {
            key: key.clone(),
            stream,
            idle: Arc::clone(&self.idle),
            max_idle_per_key: self.max_idle_per_key,
        }
    }
}

/// Exclusive use of at most one pooled session.
///
/// Take the stream out to use it and `release` it once it is known to be
/// healthy. A stream that is not released is closed when its user drops it,
/// which covers errors and cancellation alike. A lease dropped while still
/// holding its stream hands it back to the pool.
pub struct PooledConnection<S> {
    key: PoolKey,
    stream: Option<S>,
    idle: Idle<S>,
    max_idle_per_key: usize,
}

impl<S> PooledConnection<S> {
    pub const fn is_reused(&self) -> bool {
        self.stream.is_some()
    }

    pub fn take(&mut self) -> Option<S> {
        self.stream.take()
    }

    /// Returns `stream` to the pool, ending the lease.
    ///
    /// When the pool already holds as many idle sessions for this key as it
    /// keeps, the stream is handed back so the caller can close it.
    pub fn release(self, stream: S) -> Option<S> {
        self.check_in(stream)
    }

    fn check_in(&self, stream: S) -> Option<S> {
        let Ok(mut idle) = self.idle.lock() else {
            return Some(stream);
        };
        let streams = idle.entry(self.key.clone()).or_default();
        if streams.len() < self.max_idle_per_key {
            streams.push(stream);
            emit!(PooledConnectionReturned);
            None
        } else {
            Some(stream)
        }
    }
}

impl<S> Drop for PooledConnection<S> {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = self.check_in(stream);
        }
    }
}
