//! Spatial simulation and visibility domain
//!
//! Simulates the entities placed inside a containing entity and tracks which
//! of them can perceive each other.

pub mod config;
pub mod domain;

/// Initialize logging for binaries embedding the domain
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
