//! Process-wide log subscriber.
//!
//! `RUST_LOG` selects levels (default `info`); `RUST_LOG_FORMAT=json` switches
//! to one JSON object per line. Records emitted through the `log` facade by
//! the library crates are bridged into the same subscriber.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn json_requested(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Installs the subscriber. Later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let format = std::env::var("RUST_LOG_FORMAT").ok();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true);

    if json_requested(format.as_deref()) {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init();
    }

    #[test]
    fn json_format_is_case_insensitive() {
        assert!(json_requested(Some("JSON")));
        assert!(!json_requested(Some("pretty")));
        assert!(!json_requested(None));
    }
}
