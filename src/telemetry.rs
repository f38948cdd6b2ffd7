//! Structured logging setup.
//!
//! The crate logs through `tracing` macros everywhere; this module is the one
//! place that installs a subscriber. Library consumers that bring their own
//! subscriber simply never call [`init`].

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs a process-wide fmt subscriber at the given level.
///
/// `level` accepts "debug" | "info" | "warn" | "error" (case-insensitive);
/// anything else falls back to "info". `RUST_LOG` still wins when set, so
/// per-module overrides keep working.
///
/// Calling this twice is a no-op (the second install fails quietly), which
/// keeps it safe for tests.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(level).to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("nonsense"), Level::INFO);
    }

    #[test]
    fn init_is_idempotent() {
        init("info");
        init("debug"); // second install must not panic
    }
}
