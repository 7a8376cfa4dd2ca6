//! Promo code domain
//!
//! # Overview
//!
//! Three logical collections share one flat key-value backend:
//!
//! ```text
//! Pool    — codes not yet handed to anyone, in ingestion (FIFO) order
//! Index   — one PromoAssignment per (user_id, offer_id), keyed lookup
//! Ledger  — append-ordered list of every assignment ever made
//! ```
//!
//! A code moves from the pool into an assignment exactly once and never
//! comes back. `PromoCodeManager` owns the operations that keep the three
//! views agreeing; see `manager` for the concurrency rules.

pub mod manager;
pub mod model;

pub use manager::{ManagerConfig, PromoCodeManager};
pub use model::{keys, normalize_code, CodeStats, LedgerEntry, PoolEntry, PromoAssignment};
