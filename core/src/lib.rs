//! Core functionality for the devguard process manager
//!
//! This crate contains the safety-aware process engine: the protection
//! classifier and its verdict cache, the tiered process inspector, the
//! parallel port scanner, the spawn registry for server-originated
//! processes, the termination engine, and the tool dispatcher that binds
//! them together behind a typed request enum.
//!
//! Everything here is owned by an explicit [`Engine`] root, never by
//! process-wide singletons, so tests can instantiate an isolated engine per
//! test with in-memory backends.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod inspect;
pub mod oplog;
pub mod os;
pub mod ports;
pub mod proc;
pub mod protection;
pub mod spawn;
pub mod terminate;

pub use config::EngineConfig;
pub use dispatch::Engine;
pub use error::{CoreError, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag observed at tier boundaries in the
/// inspector and between workers in the port scanner.
///
/// The termination engine deliberately ignores this: once a kill sequence
/// has begun it must complete or time out so the caller gets a definitive
/// result.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that will never be set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    ///
    /// # Errors
    ///
    /// Returns an error if a global subscriber is already installed.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::CoreError::Internal(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
