//! Process-wide `tracing` setup. Safe to call more than once; only the first
//! call installs anything.

use std::sync::Once;

static INIT: Once = Once::new();

#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
const DEFAULT_FILTER: &str = "folio_app=info";

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    INIT.call_once(|| {
        console_error_panic_hook::set_once();

        let config = tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(tracing::Level::INFO)
            .build();
        if tracing_subscriber::registry()
            .with(tracing_wasm::WASMLayer::new(config))
            .try_init()
            .is_err()
        {
            web_sys::console::warn_1(&"a tracing subscriber was already installed".into());
        }
    });
}

/// Honors `RUST_LOG`, falling back to info for this crate.
#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        // Test harnesses may have installed their own subscriber already.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
        assert!(INIT.is_completed());
        tracing::info!("logging initialized");
    }
}
