use std::{
    collections::VecDeque,
    io::{self, Write as _},
    net::SocketAddr,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use async_trait::async_trait;
use base64::prelude::{BASE64_STANDARD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use flate2::{Compression, write::GzEncoder};
use futures::StreamExt;
use serde_json::json;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpListener,
    task::JoinHandle,
};
use tokio_util::{
    codec::{FramedRead, LinesCodec},
    sync::CancellationToken,
};

use crate::{
    clock::FrozenClock,
    sinks::util::{ConnectError, Connector},
};

pub fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("TEST_LOG").unwrap_or_else(|_| "error".to_owned()),
        )
        .with_test_writer()
        .try_init();
}

pub fn frozen_clock() -> FrozenClock {
    FrozenClock::new(frozen_time())
}

pub fn frozen_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()
}

/// A base64 encoded, gzipped subscription envelope carrying `messages`.
pub fn envelope(log_group: &str, log_stream: &str, messages: &[&str]) -> Vec<u8> {
    let events: Vec<_> = messages
        .iter()
        .enumerate()
        .map(|(i, message)| {
            json!({ "id": i.to_string(), "timestamp": 1_709_296_205_000i64 + i as i64, "message": message })
        })
        .collect();
    encode_envelope(&json!({
        "messageType": "DATA_MESSAGE",
        "owner": "123456789012",
        "logGroup": log_group,
        "logStream": log_stream,
        "subscriptionFilters": ["syslog"],
        "logEvents": events,
    }))
}

/// The health probe CloudWatch Logs sends when a subscription is created.
pub fn control_envelope() -> Vec<u8> {
    encode_envelope(&json!({
        "messageType": "CONTROL_MESSAGE",
        "owner": "CloudwatchLogs",
        "logGroup": "",
        "logStream": "",
        "subscriptionFilters": [],
        "logEvents": [{
            "id": "",
            "timestamp": 1_709_296_205_000i64,
            "message": "CWL CONTROL MESSAGE: Checking health of destination.",
        }],
    }))
}

fn encode_envelope(payload: &serde_json::Value) -> Vec<u8> {
    let mut gzip = GzEncoder::new(Vec::new(), Compression::default());
    gzip.write_all(&serde_json::to_vec(payload).unwrap()).unwrap();
    BASE64_STANDARD.encode(gzip.finish().unwrap()).into_bytes()
}

/// Accepts `connections` connections one after another and collects every
/// line received, in arrival order. The handle resolves once the client has
/// closed the last of them.
pub async fn receive_lines(connections: usize) -> (SocketAddr, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut lines = Vec::new();
        for _ in 0..connections {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = FramedRead::new(socket, LinesCodec::new());
            while let Some(line) = framed.next().await {
                lines.push(line.unwrap());
            }
        }
        lines
    });
    (addr, handle)
}

/// Accepts any number of concurrent connections until `done` is cancelled,
/// keeping the lines of each session apart. The handle resolves once every
/// accepted session has been closed by the client.
pub async fn receive_sessions(done: CancellationToken) -> (SocketAddr, JoinHandle<Vec<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut readers = Vec::new();
        loop {
            let socket = tokio::select! {
                biased;
                accepted = listener.accept() => accepted.unwrap().0,
                _ = done.cancelled() => break,
            };
            readers.push(tokio::spawn(async move {
                FramedRead::new(socket, LinesCodec::new())
                    .map(Result::unwrap)
                    .collect::<Vec<String>>()
                    .await
            }));
        }

        let mut sessions = Vec::new();
        for reader in readers {
            sessions.push(reader.await.unwrap());
        }
        sessions
    });
    (addr, handle)
}

/// What a scripted stream does once it has accepted its budget of lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfterBudget {
    /// Writes fail with a broken pipe.
    Fail,
    /// Writes never complete.
    Stall,
    /// The peer sends EOF and writes fail.
    Close,
}

/// Behaviour of one connection handed out by a `ScriptedConnector`.
#[derive(Clone, Copy, Debug)]
pub struct StreamScript {
    pub accept_lines: usize,
    pub then: AfterBudget,
}

impl StreamScript {
    pub const fn failing_after(accept_lines: usize) -> Self {
        Self {
            accept_lines,
            then: AfterBudget::Fail,
        }
    }

    pub const fn stalling_after(accept_lines: usize) -> Self {
        Self {
            accept_lines,
            then: AfterBudget::Stall,
        }
    }

    pub const fn closing_after(accept_lines: usize) -> Self {
        Self {
            accept_lines,
            then: AfterBudget::Close,
        }
    }
}

#[derive(Default)]
struct Script {
    connect_failures: AtomicUsize,
    hanging_connects: AtomicUsize,
    streams: Mutex<VecDeque<StreamScript>>,
    connects: AtomicUsize,
    shutdowns: AtomicUsize,
    written: Mutex<Vec<u8>>,
}

/// An in-memory collector with scripted failures.
///
/// Connects fail or hang for the configured number of attempts, then succeed.
/// Successive connections follow the queued `StreamScript`s; once the queue is
/// empty connections accept everything. All bytes written through any of its
/// streams land in one shared session log.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connects(self, count: usize) -> Self {
        self.script.connect_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn hanging_connects(self, count: usize) -> Self {
        self.script.hanging_connects.store(count, Ordering::SeqCst);
        self
    }

    pub fn streams(self, streams: impl IntoIterator<Item = StreamScript>) -> Self {
        self.script.streams.lock().unwrap().extend(streams);
        self
    }

    /// Successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.script.connects.load(Ordering::SeqCst)
    }

    /// Sessions closed in an orderly way so far.
    pub fn shutdown_count(&self) -> usize {
        self.script.shutdowns.load(Ordering::SeqCst)
    }

    /// Lines received across all connections, in order.
    pub fn lines(&self) -> Vec<String> {
        let written = self.script.written.lock().unwrap();
        String::from_utf8_lossy(&written)
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Stream = ScriptedStream;

    async fn connect(&self) -> Result<ScriptedStream, ConnectError> {
        if Self::take(&self.script.hanging_connects) {
            futures::future::pending::<()>().await;
        }
        if Self::take(&self.script.connect_failures) {
            return Err(ConnectError::Connect {
                addr: SocketAddr::from(([127, 0, 0, 1], 514)),
                source: io::ErrorKind::ConnectionRefused.into(),
            });
        }

        self.script.connects.fetch_add(1, Ordering::SeqCst);
        let script = self.script.streams.lock().unwrap().pop_front();
        Ok(ScriptedStream {
            shared: Arc::clone(&self.script),
            budget: script.map(|s| s.accept_lines),
            then: script.map_or(AfterBudget::Fail, |s| s.then),
        })
    }
}

pub struct ScriptedStream {
    shared: Arc<Script>,
    budget: Option<usize>,
    then: AfterBudget,
}

impl ScriptedStream {
    fn exhausted(&self) -> bool {
        self.budget == Some(0)
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.exhausted() && self.then == AfterBudget::Close {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.exhausted() {
            return match self.then {
                AfterBudget::Stall => Poll::Pending,
                AfterBudget::Fail | AfterBudget::Close => {
                    Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
                }
            };
        }

        self.shared.written.lock().unwrap().extend_from_slice(buf);
        let newlines = buf.iter().filter(|b| **b == b'\n').count();
        if let Some(budget) = self.budget.as_mut() {
            *budget = budget.saturating_sub(newlines);
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared.shutdowns.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}
