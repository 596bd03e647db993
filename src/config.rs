use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use serde_with::serde_as;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    codecs::{AppNameSource, Facility, Severity, SyslogSerializerConfig},
    sinks::{
        syslog::{DeliverySettings, PoolKey},
        util::RetrySettings,
    },
    tls::{MaybeTlsSettings, TlsError, TlsOptions},
};

pub const ENV_HOST: &str = "SYSLOG_SERVER_HOST";
pub const ENV_PORT: &str = "SYSLOG_SERVER_PORT";
pub const ENV_DISABLE_TLS: &str = "DISABLE_TLS";
pub const ENV_CONNECT_TIMEOUT: &str = "SYSLOG_CONNECT_TIMEOUT_SECS";
pub const ENV_WRITE_TIMEOUT: &str = "SYSLOG_WRITE_TIMEOUT_SECS";
pub const ENV_MAX_RETRIES: &str = "SYSLOG_MAX_RETRIES";
pub const ENV_BACKOFF_BASE: &str = "SYSLOG_BACKOFF_BASE_MS";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("No collector host configured, set `remote_host` or {}.", ENV_HOST))]
    MissingHost,

    #[snafu(display("No collector port configured, set `remote_port` or {}.", ENV_PORT))]
    MissingPort,

    #[snafu(display("Invalid collector port {:?}, expected an integer from 1 to 65535.", value))]
    InvalidPort { value: String },

    #[snafu(display("`{}` must be greater than zero.", name))]
    InvalidDuration { name: &'static str },

    #[snafu(display("Invalid value {:?} for environment variable {}.", value, name))]
    InvalidEnv { name: &'static str, value: String },

    #[snafu(display("Could not read config file {:?}: {}", path, source))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not parse config file {:?}: {}", path, source))]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("Invalid TLS configuration: {}", source))]
    Tls { source: TlsError },
}

/// Where and how to forward log batches.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ForwarderConfig {
    /// Host name or address of the syslog collector.
    pub remote_host: String,

    /// TCP port of the syslog collector.
    pub remote_port: u16,

    /// Wrap the connection in TLS.
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// TLS verification options, used when `use_tls` is set.
    #[serde(default)]
    pub tls: Option<TlsOptions>,

    /// Bound on resolving, connecting and the TLS handshake.
    #[serde(default = "default_connect_timeout", rename = "connect_timeout_secs")]
    #[serde_as(as = "serde_with::DurationSecondsWithFrac<f64>")]
    pub connect_timeout: Duration,

    /// Bound on writing and flushing one line.
    #[serde(default = "default_write_timeout", rename = "write_timeout_secs")]
    #[serde_as(as = "serde_with::DurationSecondsWithFrac<f64>")]
    pub write_timeout: Duration,

    /// Reconnect attempts after the first one fails, per invocation.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay before the first retry, doubled for each further one.
    #[serde(default = "default_backoff_base", rename = "backoff_base_ms")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub backoff_base: Duration,

    /// Cap on a single retry delay.
    #[serde(default = "default_max_backoff", rename = "max_backoff_secs")]
    #[serde_as(as = "serde_with::DurationSecondsWithFrac<f64>")]
    pub max_backoff: Duration,

    #[serde(default)]
    pub facility: Facility,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default)]
    pub app_name: AppNameSource,

    /// Keep healthy sessions open for later invocations.
    #[serde(default = "default_true")]
    pub reuse_connections: bool,
}

const fn default_true() -> bool {
    true
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_max_retries() -> usize {
    3
}

const fn default_backoff_base() -> Duration {
    Duration::from_millis(100)
}

const fn default_max_backoff() -> Duration {
    Duration::from_secs(10)
}

impl ForwarderConfig {
    /// A configuration for `remote_host:remote_port` with every other option
    /// at its default.
    pub fn new(remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            remote_host: remote_host.into(),
            remote_port,
            use_tls: true,
            tls: None,
            connect_timeout: default_connect_timeout(),
            write_timeout: default_write_timeout(),
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            max_backoff: default_max_backoff(),
            facility: Facility::default(),
            severity: Severity::default(),
            app_name: AppNameSource::default(),
            reuse_connections: true,
        }
    }

    /// Reads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).context(ReadFileSnafu { path })?;
        let config: Self = toml::from_str(&text).context(ParseTomlSnafu { path })?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from environment style variables.
    ///
    /// `SYSLOG_SERVER_HOST` and `SYSLOG_SERVER_PORT` are mandatory, an empty
    /// value counts as missing. TLS stays on unless `DISABLE_TLS` is exactly
    /// `1`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let host = var(ENV_HOST).ok_or(ConfigError::MissingHost)?;
        let port = var(ENV_PORT).ok_or(ConfigError::MissingPort)?;
        let port = parse_port(port.trim())?;

        let mut config = Self::new(host, port);
        config.use_tls = var(ENV_DISABLE_TLS).as_deref() != Some("1");

        if let Some(value) = var(ENV_CONNECT_TIMEOUT) {
            config.connect_timeout = parse_secs(ENV_CONNECT_TIMEOUT, value)?;
        }
        if let Some(value) = var(ENV_WRITE_TIMEOUT) {
            config.write_timeout = parse_secs(ENV_WRITE_TIMEOUT, value)?;
        }
        if let Some(value) = var(ENV_MAX_RETRIES) {
            config.max_retries = value
                .trim()
                .parse::<usize>()
                .ok()
                .context(InvalidEnvSnafu {
                    name: ENV_MAX_RETRIES,
                    value,
                })?;
        }
        if let Some(value) = var(ENV_BACKOFF_BASE) {
            config.backoff_base = value
                .trim()
                .parse::<u64>()
                .ok()
                .map(Duration::from_millis)
                .context(InvalidEnvSnafu {
                    name: ENV_BACKOFF_BASE,
                    value,
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects destinations and timeouts no invocation could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_host.trim().is_empty() {
            return MissingHostSnafu.fail();
        }
        if self.remote_port == 0 {
            return InvalidPortSnafu { value: "0" }.fail();
        }
        if self.connect_timeout.is_zero() {
            return InvalidDurationSnafu {
                name: "connect_timeout_secs",
            }
            .fail();
        }
        if self.write_timeout.is_zero() {
            return InvalidDurationSnafu {
                name: "write_timeout_secs",
            }
            .fail();
        }
        Ok(())
    }

    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            connect_timeout: self.connect_timeout,
            write_timeout: self.write_timeout,
            retry: RetrySettings {
                max_retries: self.max_retries,
                backoff_base: self.backoff_base,
                max_backoff: self.max_backoff.max(self.backoff_base),
            },
        }
    }

    pub const fn serializer_config(&self) -> SyslogSerializerConfig {
        SyslogSerializerConfig {
            facility: self.facility,
            severity: self.severity,
            app_name: self.app_name,
        }
    }

    pub fn tls_settings(&self) -> Result<MaybeTlsSettings, ConfigError> {
        MaybeTlsSettings::from_config(self.use_tls, self.tls.as_ref()).context(TlsSnafu)
    }

    pub fn pool_key(&self) -> PoolKey {
        PoolKey::new(self.remote_host.clone(), self.remote_port, self.use_tls)
    }
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => InvalidPortSnafu { value }.fail(),
    }
}

fn parse_secs(name: &'static str, value: String) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .context(InvalidEnvSnafu { name, value })
}
