//! Subscriber setup for the `opfuzz` binary.

use opfuzz_common::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Resolve the effective level and format. `RUST_LOG` is handled by the
/// filter itself and wins over both.
pub fn resolve<'a>(
    level: Option<&'a str>,
    format: Option<&'a str>,
    config: &'a LoggingConfig,
) -> (&'a str, &'a str) {
    (level.unwrap_or(&config.level), format.unwrap_or(&config.format))
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable. A second call is a no-op.
pub fn init(level: Option<&str>, format: Option<&str>, config: &LoggingConfig) {
    let (level, format) = resolve(level, format, config);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    let _ = match format {
        "json" => subscriber.json().with_timer(tracing_subscriber::fmt::time::uptime()).try_init(),
        "compact" => subscriber.compact().try_init(),
        _ => subscriber.pretty().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let config = LoggingConfig { level: "warn".to_string(), format: "json".to_string() };
        assert_eq!(resolve(None, None, &config), ("warn", "json"));
        assert_eq!(resolve(Some("debug"), None, &config), ("debug", "json"));
        assert_eq!(resolve(Some("trace"), Some("compact"), &config), ("trace", "compact"));
    }
}
