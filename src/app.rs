use std::{io::IsTerminal, path::PathBuf, time::Duration};

use tokio::{io::AsyncReadExt, runtime::Runtime};
use tokio_util::sync::CancellationToken;

use crate::{
    cli::{Color, LogFormat, Opts},
    config::ForwarderConfig,
    handler::{Forwarder, InvocationErrorKind, InvocationResult},
    trace,
};

pub struct Application {
    opts: Opts,
    forwarder: Forwarder,
    invocation_timeout: Option<Duration>,
    runtime: Runtime,
}

impl Application {
    pub fn prepare() -> Result<Self, exitcode::ExitCode> {
        let opts = Opts::get_matches();
        Self::prepare_from_opts(opts)
    }

    pub fn prepare_from_opts(opts: Opts) -> Result<Self, exitcode::ExitCode> {
        #[allow(deprecated)]
        openssl_probe::init_ssl_cert_env_vars();

        let color = match opts.color {
            Color::Auto => std::io::stderr().is_terminal(),
            Color::Always => true,
            Color::Never => false,
        };
        let json = opts.log_format == LogFormat::Json;
        trace::init(color, json, &trace::levels(opts.log_level()));

        let config = match &opts.config {
            Some(path) => ForwarderConfig::load(path),
            None => ForwarderConfig::from_env(),
        };
        let forwarder = config.and_then(|config| Forwarder::new(&config)).map_err(|error| {
            error!(message = "Configuration error.", %error);
            exitcode::CONFIG
        })?;

        let invocation_timeout = match opts.invocation_timeout_secs {
            None => None,
            Some(secs) => match Duration::try_from_secs_f64(secs) {
                Ok(timeout) if !timeout.is_zero() => Some(timeout),
                _ => {
                    error!(
                        message = "The `invocation-timeout-secs` argument must be a positive number of seconds.",
                        value = secs,
                    );
                    return Err(exitcode::CONFIG);
                }
            },
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                error!(message = "Unable to create async runtime.", %error);
                exitcode::OSERR
            })?;

        Ok(Application {
            opts,
            forwarder,
            invocation_timeout,
            runtime,
        })
    }

    /// Runs one invocation per envelope and returns the process exit code.
    pub fn run(self) -> exitcode::ExitCode {
        let Self {
            opts,
            forwarder,
            invocation_timeout,
            runtime,
        } = self;

        runtime.block_on(async move {
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!(message = "Interrupted, cancelling in-flight invocation.");
                    trigger.cancel();
                }
            });

            let mut outcome = Outcome::default();
            for source in opts.envelope_sources() {
                if shutdown.is_cancelled() {
                    break;
                }

                let raw = match read_envelope(source.as_ref()).await {
                    Ok(raw) => raw,
                    Err(error) => {
                        error!(
                            message = "Unable to read envelope.",
                            path = ?source.as_deref().unwrap_or_else(|| "-".as_ref()),
                            %error,
                        );
                        outcome.input_failed = true;
                        continue;
                    }
                };

                let result =
                    invoke(&forwarder, &raw, invocation_timeout, shutdown.child_token()).await;
                print_result(&result);
                outcome.record(&result);
            }

            forwarder.shutdown().await;
            outcome.exit_code()
        })
    }
}

async fn read_envelope(source: Option<&PathBuf>) -> std::io::Result<Vec<u8>> {
    match source {
        Some(path) => tokio::fs::read(path).await,
        None => {
            let mut raw = Vec::new();
            tokio::io::stdin().read_to_end(&mut raw).await?;
            Ok(raw)
        }
    }
}

/// Runs one invocation, cancelling it once `deadline` has passed.
async fn invoke(
    forwarder: &Forwarder,
    raw: &[u8],
    deadline: Option<Duration>,
    cancel: CancellationToken,
) -> InvocationResult {
    let timer = deadline.map(|deadline| {
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!(
                message = "Invocation deadline reached.",
                deadline_secs = deadline.as_secs_f64(),
            );
            trigger.cancel();
        })
    });

    let result = forwarder.handle(raw, &cancel).await;

    if let Some(timer) = timer {
        timer.abort();
    }
    result
}

#[allow(clippy::print_stdout)]
fn print_result(result: &InvocationResult) {
    match serde_json::to_string(result) {
        Ok(line) => println!("{line}"),
        Err(error) => error!(message = "Unable to serialize invocation result.", %error),
    }
}

#[derive(Debug, Default)]
struct Outcome {
    input_failed: bool,
    config_failed: bool,
    decode_failed: bool,
    delivery_failed: bool,
}

impl Outcome {
    fn record(&mut self, result: &InvocationResult) {
        match result.error.as_ref().map(|error| error.kind) {
            None => {}
            Some(InvocationErrorKind::Decode) => self.decode_failed = true,
            Some(InvocationErrorKind::Config) => self.config_failed = true,
            Some(
                InvocationErrorKind::ConnectFailed
                | InvocationErrorKind::WriteFailed
                | InvocationErrorKind::Timeout,
            ) => self.delivery_failed = true,
        }
    }

    /// Delivery failures take precedence over decode failures.
    const fn exit_code(&self) -> exitcode::ExitCode {
        if self.config_failed {
            exitcode::CONFIG
        } else if self.delivery_failed {
            exitcode::UNAVAILABLE
        } else if self.decode_failed {
            exitcode::DATAERR
        } else if self.input_failed {
            exitcode::NOINPUT
        } else {
            exitcode::OK
        }
    }
}
