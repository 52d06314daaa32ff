use prometheus::Registry;
use tracing_subscriber::EnvFilter;

/// Install a `tracing-subscriber` global subscriber filtered by `log_level`
/// (an `EnvFilter` directive string, e.g. `"info,txlog_core=debug"`).
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Assemble the process-wide metrics registry. The caller is responsible
/// for mounting it behind an HTTP text-exposition endpoint if
/// `metrics.listen-addr` is configured; that server is out of scope here.
pub fn build_registry() -> Registry {
    Registry::new()
}
