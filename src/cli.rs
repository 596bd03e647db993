use std::path::PathBuf;

use clap::{ArgAction, CommandFactory, FromArgMatches, Parser};

use crate::get_version;

#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case")]
pub struct Opts {
    /// Read configuration from a TOML file. Without it the collector is
    /// taken from `SYSLOG_SERVER_HOST`, `SYSLOG_SERVER_PORT` and `DISABLE_TLS`.
    #[arg(short, long, env = "CLOUDWATCH_SYSLOG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Abort an invocation that takes longer than this many seconds. Lines
    /// delivered before the deadline are still reported.
    #[arg(long, env = "CLOUDWATCH_SYSLOG_INVOCATION_TIMEOUT_SECS")]
    pub invocation_timeout_secs: Option<f64>,

    /// Files holding one envelope each, forwarded one after another over
    /// the same connection pool. `-` or no file at all reads stdin.
    pub envelopes: Vec<PathBuf>,

    /// Enable more detailed internal logging. Repeat to increase level. Overridden by `--quiet`.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Reduce detail of internal logging. Repeat to reduce further. Overrides `--verbose`.
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,

    /// Set the logging format
    #[arg(long, default_value = "text", env = "CLOUDWATCH_SYSLOG_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Control when ANSI terminal formatting is used.
    ///
    /// By default ANSI formatting is enabled when stderr is a terminal.
    /// `--color always` and `--color never` force it on or off.
    #[arg(long, default_value = "auto", env = "CLOUDWATCH_SYSLOG_COLOR")]
    pub color: Color,
}

impl Opts {
    pub fn get_matches() -> Self {
        let version = get_version();
        let matches = Opts::command().version(version).get_matches();
        Opts::from_arg_matches(&matches).unwrap_or_else(|error| error.exit())
    }

    pub const fn log_level(&self) -> &'static str {
        match self.quiet {
            0 => match self.verbose {
                0 => "info",
                1 => "debug",
                2..=255 => "trace",
            },
            1 => "warn",
            2 => "error",
            3..=255 => "off",
        }
    }

    /// Envelope sources in invocation order, `None` standing for stdin.
    pub fn envelope_sources(&self) -> Vec<Option<PathBuf>> {
        if self.envelopes.is_empty() {
            return vec![None];
        }
        self.envelopes
            .iter()
            .map(|path| (path.as_os_str() != "-").then(|| path.clone()))
            .collect()
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Auto,
    Always,
    Never,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}
