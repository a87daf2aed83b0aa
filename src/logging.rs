//! Logging setup.
//!
//! Compact timestamped output with per-target levels taken from the
//! `[logging]` config section. `RUST_LOG` overrides the config when set:
//!
//! ```bash
//! RUST_LOG=debug ingest-watch /home/airavata/inputData
//! RUST_LOG=ingest_watch::dispatch=trace ingest-watch
//! ```

use std::sync::Once;

use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter directive string built from the config, e.g. `info,ingest_watch=debug`.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();

    let mut directives = config.default.clone();
    for (module, level) in modules {
        directives.push_str(&format!(",{module}={level}"));
    }
    directives
}

/// Install the global subscriber. Only the first call has an effect.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        // A subscriber may already be installed, e.g. by a test harness
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

/// Install the global subscriber with default levels.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Dispatcher log line `[dispatch] <event>: <detail>` at the given level.
///
/// Always logs under the `ingest_watch::dispatch` target so one
/// `logging.modules` entry controls every dispatcher decision.
///
/// ```ignore
/// dispatch_log!(info, "new file", "{}", path.display());
/// dispatch_log!(warn, "queue overflow");
/// ```
#[macro_export]
macro_rules! dispatch_log {
    ($level:ident, $event:expr) => {
        tracing::$level!(target: "ingest_watch::dispatch", "[dispatch] {}", $event)
    };
    ($level:ident, $event:expr, $($arg:tt)+) => {
        tracing::$level!(
            target: "ingest_watch::dispatch",
            "[dispatch] {}: {}",
            $event,
            format!($($arg)+)
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        let mut config = LoggingConfig::default();
        assert_eq!(filter_directives(&config), "info");

        config.default = "warn".to_string();
        config
            .modules
            .insert("ingest_watch::dispatch".to_string(), "trace".to_string());
        config
            .modules
            .insert("ingest_watch::handler".to_string(), "debug".to_string());
        assert_eq!(
            filter_directives(&config),
            "warn,ingest_watch::dispatch=trace,ingest_watch::handler=debug"
        );
        assert!(EnvFilter::try_new(filter_directives(&config)).is_ok());
    }

    #[test]
    fn test_dispatch_log_levels() {
        init();
        let handle = 7;
        dispatch_log!(info, "watching", "/base as wd{handle}");
        dispatch_log!(debug, "batch", "{} events", 3);
        dispatch_log!(warn, "queue overflow");
        dispatch_log!(error, "read failed", "{}", "EIO");
    }

    #[test]
    fn test_init_twice() {
        init();
        init();
        tracing::info!("logging initialized");
    }
}
