use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{GossamerError, Result};

/// Installs the global subscriber. `filter` takes precedence over `RUST_LOG`, and without
/// either only `info` and above is printed.
pub fn init(filter: Option<&str>) -> Result<()> {
    let filter = match filter {
        Some(filter) => EnvFilter::try_new(filter),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")),
    }
    .map_err(|err| GossamerError::Config {
        error_msg: format!("invalid log filter: {}", err),
    })?;

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::Layer::new().compact().with_writer(std::io::stdout));
    tracing::subscriber::set_global_default(subscriber).map_err(|err| GossamerError::Config {
        error_msg: err.to_string(),
    })
}
