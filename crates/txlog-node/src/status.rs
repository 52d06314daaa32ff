use serde::Serialize;
use txlog_indexer::WatchRegistry;

/// A point-in-time summary of the watch registry, for the `status` CLI
/// subcommand and for embedding applications that want the same view.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub high_water_mark: Option<u64>,
    pub sticky_error: Option<String>,
}

impl StatusReport {
    pub fn summarize(registry: &WatchRegistry) -> Self {
        Self {
            high_water_mark: registry.high_water_mark(),
            sticky_error: registry.sticky_error().map(|e| e.to_string()),
        }
    }
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.high_water_mark, &self.sticky_error) {
            (None, _) => write!(f, "idle: no records processed yet"),
            (Some(hwm), None) => write!(f, "ok: high-water-mark={hwm}"),
            (Some(hwm), Some(err)) => write!(f, "halted: high-water-mark={hwm} error={err:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn idle_registry_reports_idle() {
        let registry = WatchRegistry::new(Duration::from_secs(60));
        let report = StatusReport::summarize(&registry);
        assert_eq!(report.to_string(), "idle: no records processed yet");
    }
}
