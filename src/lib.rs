// promopool - promo code allocation engine
// Hands out scarce, unique promotional codes over a flat async key-value store.

#![warn(rust_2018_idioms)]

pub mod promo;
pub mod storage;

// Re-exports for convenience
pub use promo::{CodeStats, LedgerEntry, ManagerConfig, PoolEntry, PromoAssignment, PromoCodeManager};
pub use storage::{KvBackend, Storage};

/// promopool error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Storage error: {0}")]
        Storage(String),

        #[error("Serialization error: {0}")]
        Serialization(#[from] serde_json::Error),

        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        let _version: &str = VERSION;
    }
}
