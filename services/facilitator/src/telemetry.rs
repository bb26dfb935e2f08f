use crate::config::LoggingConfig;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// `DEBUG|INFO|WARNING|ERROR` (any case) as a filter directive
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}

/// `RUST_LOG` when set, otherwise `logging.level`
pub fn env_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&logging.level)))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(logging: &LoggingConfig) {
    let json = logging
        .format
        .as_deref()
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter(logging))
        .with_file(true)
        .with_line_number(true)
        .with_target(false);

    let installed = if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed && (logging.dir.is_some() || logging.filename.is_some()) {
        info!(
            "logging.dir / logging.filename are set; file output and rotation \
             (backup_count {}) are left to the process supervisor",
            logging.backup_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("INFO"), "info");
        assert_eq!(level_directive("debug"), "debug");
        assert_eq!(level_directive("WARNING"), "warn");
        assert_eq!(level_directive("Error"), "error");
        assert_eq!(level_directive("verbose"), "info");
    }
}
