//! Logging setup for binaries and demos

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"p2p_lending=info"`). Fails if a global
/// subscriber is already set.
pub fn init_tracing(default_directive: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;
    Ok(())
}
