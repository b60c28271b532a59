use std::io::IsTerminal;

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};


const DEFAULT_FILTER: &str = "info";


#[derive(Debug, Error)]
pub enum InitError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
}


/// Install the global fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stdout().is_terminal());
    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|_| InitError::AlreadyInitialised)
}
