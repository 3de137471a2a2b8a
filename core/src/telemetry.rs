use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str = "vectormind=info,vectormind_core=info";

static SUBSCRIBER_GUARD: OnceLock<()> = OnceLock::new();

/// Builds the filter from `RUST_LOG`, falling back to [`DEFAULT_DIRECTIVES`].
pub fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Installs the global tracing subscriber.
///
/// Safe to call more than once; only the first call installs anything, so
/// tests and binaries can both call it.
pub fn init_tracing(filter: EnvFilter) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    if SUBSCRIBER_GUARD.get().is_some() {
        return Ok(());
    }

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false));
    tracing::subscriber::set_global_default(subscriber)?;
    SUBSCRIBER_GUARD.set(()).ok();

    Ok(())
}
