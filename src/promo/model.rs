//! Promo domain records and key namespace.
//!
//! Every record here is serialized as JSON text into the string-valued
//! backend. The pool and ledger are each one key holding a JSON array;
//! assignments get one key per `(user_id, offer_id)` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key namespace for engine state in the backend.
pub mod keys {
    /// Pool document: JSON array of `PoolEntry`, FIFO order.
    pub const POOL: &str = "promo:pool";

    /// Ledger document: JSON array of `LedgerEntry`, append order.
    pub const LEDGER: &str = "promo:ledger";

    /// Common prefix of all per-assignment keys.
    pub const USER_PREFIX: &str = "promo:user:";

    /// Key of the assignment record for one `(user_id, offer_id)` pair.
    pub fn assignment(user_id: &str, offer_id: &str) -> String {
        format!("{USER_PREFIX}{user_id}:{offer_id}")
    }

    /// Prefix matching every assignment key of one user.
    pub fn user_scope(user_id: &str) -> String {
        format!("{USER_PREFIX}{user_id}:")
    }
}

/// An unassigned code waiting in the pool.
///
/// Pool position doubles as allocation priority: the entry at index 0 is
/// the next one handed out (oldest-ingested first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEntry {
    /// Unique, stable entry id; carried into the ledger on assignment.
    pub id: String,

    /// Normalized (trimmed, uppercased) redeemable code value.
    pub code: String,

    /// When the code was ingested into the pool.
    pub created_at: DateTime<Utc>,
}

/// The durable binding of one code to one `(user_id, offer_id)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoAssignment {
    pub user_id: String,
    pub offer_id: String,
    pub code: String,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Transitions false → true exactly once, never back.
    pub is_used: bool,
}

/// Ledger mirror of an assignment, retaining the original pool entry id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Id of the `PoolEntry` this code was allocated from.
    pub id: String,
    pub user_id: String,
    pub offer_id: String,
    pub code: String,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
}

impl LedgerEntry {
    /// Build the ledger mirror for a fresh assignment.
    pub fn for_assignment(entry_id: String, assignment: &PromoAssignment) -> Self {
        Self {
            id: entry_id,
            user_id: assignment.user_id.clone(),
            offer_id: assignment.offer_id.clone(),
            code: assignment.code.clone(),
            assigned_at: assignment.assigned_at,
            expires_at: assignment.expires_at,
            is_used: assignment.is_used,
        }
    }
}

/// Derived counts over pool and ledger. Computed per call, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeStats {
    pub available: usize,
    pub assigned: usize,
    pub used: usize,
}

/// Canonical form of a code value: trimmed and ASCII-uppercased.
///
/// Returns `None` for codes that are blank after trimming; those are
/// skipped on ingestion.
pub fn normalize_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

/// Generate a pool entry id: ingestion timestamp plus a positional index.
///
/// The index is offset by the pool length at ingestion time so entries
/// appended in one batch get distinct ids.
pub fn entry_id(ingested_at: DateTime<Utc>, index: usize) -> String {
    format!("{}_{}", ingested_at.timestamp_millis(), index)
}
