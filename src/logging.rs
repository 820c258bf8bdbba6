//! Process-wide tracing initialization.

use std::sync::Once;

use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

/// Log output formats selectable from the CLI.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
    Pretty,
}

static INIT_TRACING: Once = Once::new();

/// Initializes the global tracing subscriber. The first call per process
/// wins; later calls (e.g. a second server constructed in tests) are no-ops.
///
/// # Errors
///
/// Returns an error when the logging engine cannot be initialized.
pub fn init(format: LogFormat) -> eyre::Result<()> {
    let mut result = Ok(());
    INIT_TRACING.call_once(|| {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_timer(ChronoLocal::rfc_3339());

        result = match format {
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
        }
        .map_err(|e| eyre::eyre!("failed to initialize the logging engine: {e}"));
    });
    result
}
