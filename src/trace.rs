use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber, writing to stderr so stdout stays free for
/// invocation results.
///
/// `levels` takes `RUST_LOG` style directives. Calling this more than once is
/// harmless, later calls are ignored.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|error| {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Invalid log level directives {levels:?}: {error}, using `info`.");
        }
        EnvFilter::new("info")
    });

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.with_ansi(color).try_init()
    };
    // Tests may initialize this multiple times.
    let _ = result;
}

/// Directives applying `level` to this crate, unless `LOG` overrides them.
pub fn levels(level: &str) -> String {
    std::env::var("LOG").unwrap_or_else(|_| match level {
        "off" => "off".to_owned(),
        level => format!("cloudwatch_syslog={level}"),
    })
}
