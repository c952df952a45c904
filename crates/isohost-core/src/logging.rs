//! Tracing subscriber setup shared by hosts and the CLI.

use tracing_subscriber::EnvFilter;

use crate::config::env_vars;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "isohost=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per event, for containers and log shippers.
    Json,
}

impl LogFormat {
    /// `Json` when `ISOHOST_LOG_JSON` parses as `true`.
    pub fn from_env() -> Self {
        let json = std::env::var(env_vars::LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);
        if json {
            Self::Json
        } else {
            Self::Compact
        }
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let filter = EnvFilter::new(DEFAULT_FILTER);
        if verbose {
            filter.add_directive(tracing::Level::DEBUG.into())
        } else {
            filter.add_directive(tracing::Level::WARN.into())
        }
    })
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_tracing(format: LogFormat, verbose: bool) -> bool {
    let filter = env_filter(verbose);
    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .try_init(),
    };
    result.is_ok()
}
