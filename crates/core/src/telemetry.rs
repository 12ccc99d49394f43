//! Tracing bootstrap for hosts embedding the segmentation engine.

use tracing_subscriber::EnvFilter;

/// Install a JSON `tracing` subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Fails instead of panicking when the host already installed a subscriber.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .json()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_error() {
        let first = init_tracing("crm_segmentation=debug");
        let second = init_tracing("crm_segmentation=debug");
        // Another test binary may have won the race for the global default.
        assert!(first.is_err() || second.is_err());
    }
}
