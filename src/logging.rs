use tracing_subscriber::EnvFilter;

/// The four levels the CLI's `--log-level` flag accepts. `Warning` is
/// spelled out (rather than tracing's own `WARN`) to keep the flag's
/// vocabulary stable across reimplementations of this protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_tracing_level(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Initializes the global `tracing` subscriber. The level comes solely
/// from `--log-level`, not `RUST_LOG`, so the flag is authoritative.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::new(format!("maskproxy={}", level.as_tracing_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
