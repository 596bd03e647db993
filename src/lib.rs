#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::type_complexity)]

//! Forwards CloudWatch Logs subscription batches to a remote syslog collector.
//!
//! One invocation takes one compressed envelope, decodes it into a
//! [`LogBatch`](event::LogBatch), renders every event as an RFC 5424 line and
//! writes the lines, in order, over a TCP (optionally TLS) connection.

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;

pub mod app;
pub mod cli;
pub mod clock;
pub mod codecs;
pub mod config;
pub mod event;
pub mod handler;
pub mod sinks;
#[cfg(test)]
pub mod test_util;
pub mod tls;
pub mod trace;

pub use handler::{Forwarder, InvocationResult, handle};

pub fn get_version() -> String {
    let pkg_version = env!("CARGO_PKG_VERSION");
    let target_arch = std::env::consts::ARCH;
    let target_os = std::env::consts::OS;
    format!("{pkg_version} ({target_arch}-{target_os})")
}
