use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

/// Installs the global `tracing` subscriber once per process. Safe to call
/// from every binary entrypoint and from test setup; subsequent calls are
/// no-ops.
pub fn init_tracing() {
  INIT.get_or_init(|| {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
      .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_target(true)
      .json()
      .init();
  });
}
