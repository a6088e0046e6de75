use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber, writing to stderr. `RUST_LOG` wins;
/// otherwise `debug` when `verbose`, else the configured level. Returns false
/// if a subscriber was already set.
pub fn init_tracing(config: &LoggingConfig, verbose: bool) -> bool {
    let filter = build_filter(config, verbose);

    if config.json_format {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(filter)
            .try_init()
            .is_ok()
    }
}

fn build_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    }
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config, false);
        assert!(!init_tracing(&config, true));
    }
}
