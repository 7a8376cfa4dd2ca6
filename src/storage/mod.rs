//! Storage layer
//!
//! # Architecture
//!
//! The engine state lives in a flat, string-keyed, string-valued store:
//!
//! ```text
//! promo:pool                       → JSON array of PoolEntry
//! promo:ledger                     → JSON array of LedgerEntry
//! promo:user:{user_id}:{offer_id}  → JSON PromoAssignment
//! ```
//!
//! ## Backend contract
//!
//! The `KvBackend` trait is the only interface the allocation engine consumes:
//! get, set, remove-many, list-all-keys and multi-get. No transactions, no
//! locking, no secondary indexes — any cross-key consistency is the engine's
//! own problem (see `promo::manager`).
//!
//! ## Implementations
//!
//! - **MemoryBackend**: DashMap-backed, for tests and ephemeral runs.
//! - **FileBackend**: a single JSON document on disk, rewritten per mutation.

pub mod backend;
pub mod file;
pub mod memory;

pub use backend::{KvBackend, Storage};
pub use file::FileBackend;
pub use memory::MemoryBackend;
