//! Tracing setup for Peril processes.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by
/// `default_filter` when `RUST_LOG` is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case nothing changes. Safe to call more than once.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing("warn");
        assert!(!init_tracing("debug"));
    }
}
