//! Tracing setup for hosts that embed the engine.

use tracing_subscriber::EnvFilter;

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_DIRECTIVE: &str = "omni_knowledge=info,omni_io=info";

/// Install a stderr `fmt` subscriber. `RUST_LOG` overrides
/// `default_directive`. Returns `false` when a global subscriber was already
/// installed, which is harmless.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing("omni_knowledge=debug");
        assert!(!init_tracing(DEFAULT_LOG_DIRECTIVE));
    }
}
