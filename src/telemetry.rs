//! Structured logging bootstrap.
//!
//! The dispatch hot path never logs above `trace!`/`debug!`; structural
//! events (ring bind, cluster join, filter attach, reflector failure) log at
//! `info!`/`warn!`.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a process-wide `tracing_subscriber` formatter. Safe to call more
/// than once; only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .finish();
        // A previously installed global subscriber (e.g. in a test binary
        // that links multiple crates doing this) is not an error here.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
