//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over `LogConfig::filter`. Returns `false` when a
/// global subscriber was already installed, which is harmless in tests.
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("skein=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(config.with_target)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LogConfig {
            filter: "not a [valid filter".into(),
            ansi: false,
            with_target: true,
        };
        let _ = init(&config);
        assert!(!init(&config));
    }
}
