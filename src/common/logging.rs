use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "datavault=info";

/// Installs the global fmt subscriber. `RUST_LOG` takes precedence over `fallback`.
///
/// Returns `false` when a subscriber was already installed (tests, embedding hosts).
pub fn init_tracing(fallback: Option<&str>) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback.unwrap_or(DEFAULT_FILTER)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
