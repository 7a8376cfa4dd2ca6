//! Promo code allocation engine.
//!
//! # Concurrency
//!
//! The backend has no transactions, so every multi-step mutation
//! (read-pool → write-pool → write-assignment → write-ledger) runs under a
//! single in-process `tokio::sync::Mutex`. That serializes all writers and
//! closes the double-allocation race between concurrent `assign` calls.
//! Read-only operations take no lock and re-read the backend each call.
//!
//! This is sufficient while this process is the sole writer to the backend;
//! multi-process coordination is out of scope.
//!
//! # Error surface
//!
//! Public operations never return errors: a backend failure is logged and
//! folded into the same `false` / `None` / empty shape used for expected
//! conditions (empty pool, missing assignment). Callers cannot distinguish
//! "never happened" from "storage errored".

use crate::error::{Error, Result};
use crate::promo::model::{
    entry_id, keys, normalize_code, CodeStats, LedgerEntry, PoolEntry, PromoAssignment,
};
use crate::storage::Storage;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Codes seeded by `auto_initialize` when no override is configured.
pub const DEFAULT_SEED_CODES: &[&str] = &[
    "WELCOME10", "WELCOME15", "WELCOME20", "SPRING25", "SUMMER30", "AUTUMN25", "WINTER20",
    "LOYAL50", "FRIEND15", "COMEBACK35",
];

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Validity window applied when `assign` gets no explicit expiry.
    pub validity_days: i64,

    /// Code list used by `auto_initialize` on first boot.
    pub seed_codes: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            validity_days: 30,
            seed_codes: DEFAULT_SEED_CODES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Allocation engine over a flat key-value backend.
///
/// Owns three derived views of the same facts: the available-code pool,
/// the per-`(user, offer)` assignment index, and the global ledger.
pub struct PromoCodeManager {
    storage: Arc<Storage>,
    config: ManagerConfig,
    /// Serializes every mutating operation; see module docs.
    write_lock: Mutex<()>,
}

impl PromoCodeManager {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self::with_config(storage, ManagerConfig::default())
    }

    pub fn with_config(storage: Arc<Storage>, config: ManagerConfig) -> Self {
        Self {
            storage,
            config,
            write_lock: Mutex::new(()),
        }
    }

    // ===== Pool management =====

    /// Replace the pool wholesale with the given codes.
    ///
    /// Unconditional: does not check whether the pool or ledger already hold
    /// data. One-time bootstrap callers wanting that guard should use
    /// `auto_initialize` instead.
    pub async fn initialize_code_database(&self, codes: &[String]) -> bool {
        let _guard = self.write_lock.lock().await;
        match self.replace_pool(codes).await {
            Ok(count) => {
                info!(count, "Initialized code pool");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize code pool");
                false
            }
        }
    }

    /// Append codes whose normalized value is not already pooled.
    ///
    /// Deduplication is pool-local only: a code value already consumed into
    /// the ledger is accepted again here and can be handed to a second user.
    /// Known latent gap, preserved deliberately.
    pub async fn add_codes_to_database(&self, codes: &[String]) -> bool {
        let _guard = self.write_lock.lock().await;
        match self.append_codes(codes).await {
            Ok(added) => {
                info!(added, submitted = codes.len(), "Added codes to pool");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to add codes to pool");
                false
            }
        }
    }

    /// Current pool, ingestion (FIFO) order. Empty on backend failure.
    pub async fn get_available_codes(&self) -> Vec<PoolEntry> {
        match self.load_pool().await {
            Ok(pool) => pool,
            Err(e) => {
                error!(error = %e, "Failed to read code pool");
                Vec::new()
            }
        }
    }

    pub async fn get_available_codes_count(&self) -> usize {
        self.get_available_codes().await.len()
    }

    /// First-boot guard: seed the pool only when both the pool and the
    /// ledger are empty. Returns success without touching anything when the
    /// system already holds data.
    pub async fn auto_initialize(&self) -> bool {
        let _guard = self.write_lock.lock().await;

        let already = async {
            Ok::<bool, Error>(!self.load_pool().await?.is_empty() || !self.load_ledger().await?.is_empty())
        }
        .await;

        match already {
            Ok(true) => {
                debug!("Code database already initialized, leaving state untouched");
                true
            }
            Ok(false) => match self.replace_pool(&self.config.seed_codes).await {
                Ok(count) => {
                    info!(count, "Auto-initialized code pool from seed list");
                    true
                }
                Err(e) => {
                    error!(error = %e, "Failed to auto-initialize code pool");
                    false
                }
            },
            Err(e) => {
                error!(error = %e, "Failed to probe code database state");
                false
            }
        }
    }

    // ===== Allocation =====

    /// Grant a code to `(user_id, offer_id)`.
    ///
    /// Idempotent: an existing assignment for the pair is returned unchanged
    /// and the pool is not touched. Otherwise the pool head (oldest-ingested
    /// code, the designated tie-break) is removed from the pool and persisted
    /// as both an assignment record and a ledger entry, all inside the write
    /// lock. Returns `None` when the pool is exhausted or storage fails.
    pub async fn assign_promo_code_to_user(
        &self,
        user_id: &str,
        offer_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Option<PromoAssignment> {
        let _guard = self.write_lock.lock().await;
        match self.allocate(user_id, offer_id, expires_at).await {
            Ok(result) => result,
            Err(e) => {
                error!(user_id, offer_id, error = %e, "Failed to assign promo code");
                None
            }
        }
    }

    /// Flip `is_used` to true on both the assignment and its ledger entry.
    ///
    /// Returns false when no assignment exists for the pair. Re-marking an
    /// already-used code succeeds and stays true; the flag never reverts.
    pub async fn mark_promo_code_as_used(&self, user_id: &str, offer_id: &str) -> bool {
        let _guard = self.write_lock.lock().await;
        match self.mark_used(user_id, offer_id).await {
            Ok(marked) => marked,
            Err(e) => {
                error!(user_id, offer_id, error = %e, "Failed to mark promo code used");
                false
            }
        }
    }

    /// Keyed lookup of the assignment for one `(user_id, offer_id)` pair.
    pub async fn get_user_promo_code_for_offer(
        &self,
        user_id: &str,
        offer_id: &str,
    ) -> Option<PromoAssignment> {
        match self.load_assignment(user_id, offer_id).await {
            Ok(found) => found,
            Err(e) => {
                error!(user_id, offer_id, error = %e, "Failed to read promo assignment");
                None
            }
        }
    }

    /// Every assignment of one user, across offers.
    ///
    /// Backed by a key-prefix scan; result order follows the backend's key
    /// enumeration and is unspecified.
    pub async fn get_all_user_promo_codes(&self, user_id: &str) -> Vec<PromoAssignment> {
        match self.load_user_assignments(user_id).await {
            Ok(found) => found,
            Err(e) => {
                error!(user_id, error = %e, "Failed to enumerate user promo codes");
                Vec::new()
            }
        }
    }

    // ===== Ledger & admin =====

    /// Full ledger, append order. Empty on backend failure.
    pub async fn get_assigned_codes(&self) -> Vec<LedgerEntry> {
        match self.load_ledger().await {
            Ok(ledger) => ledger,
            Err(e) => {
                error!(error = %e, "Failed to read assignment ledger");
                Vec::new()
            }
        }
    }

    /// Counts derived by reading pool and ledger. No stored counters.
    pub async fn get_code_database_stats(&self) -> CodeStats {
        let stats = async {
            let pool = self.load_pool().await?;
            let ledger = self.load_ledger().await?;
            Ok::<CodeStats, Error>(CodeStats {
                available: pool.len(),
                assigned: ledger.len(),
                used: ledger.iter().filter(|e| e.is_used).count(),
            })
        }
        .await;

        match stats {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Failed to compute code database stats");
                CodeStats::default()
            }
        }
    }

    /// Wipe pool, ledger and every per-user assignment key. Irreversible;
    /// meant for tests and resets.
    pub async fn clear_all_code_data(&self) -> bool {
        let _guard = self.write_lock.lock().await;
        match self.clear_all().await {
            Ok(removed) => {
                warn!(removed, "Cleared all promo code data");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to clear promo code data");
                false
            }
        }
    }

    // ===== Internal plumbing (callers hold the write lock where noted) =====

    async fn load_pool(&self) -> Result<Vec<PoolEntry>> {
        match self.storage.get(keys::POOL).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn store_pool(&self, pool: &[PoolEntry]) -> Result<()> {
        let raw = serde_json::to_string(pool)?;
        self.storage.set(keys::POOL, &raw).await
    }

    async fn load_ledger(&self) -> Result<Vec<LedgerEntry>> {
        match self.storage.get(keys::LEDGER).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn store_ledger(&self, ledger: &[LedgerEntry]) -> Result<()> {
        let raw = serde_json::to_string(ledger)?;
        self.storage.set(keys::LEDGER, &raw).await
    }

    async fn load_assignment(&self, user_id: &str, offer_id: &str) -> Result<Option<PromoAssignment>> {
        match self.storage.get(&keys::assignment(user_id, offer_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn store_assignment(&self, assignment: &PromoAssignment) -> Result<()> {
        let key = keys::assignment(&assignment.user_id, &assignment.offer_id);
        let raw = serde_json::to_string(assignment)?;
        self.storage.set(&key, &raw).await
    }

    /// Normalize, stamp and store a brand-new pool. Holds the write lock.
    async fn replace_pool(&self, codes: &[String]) -> Result<usize> {
        let now = Utc::now();
        let pool: Vec<PoolEntry> = codes
            .iter()
            .filter_map(|raw| normalize_code(raw))
            .enumerate()
            .map(|(index, code)| PoolEntry {
                id: entry_id(now, index),
                code,
                created_at: now,
            })
            .collect();

        let skipped = codes.len() - pool.len();
        if skipped > 0 {
            warn!(skipped, "Skipped blank codes during pool initialization");
        }

        self.store_pool(&pool).await?;
        Ok(pool.len())
    }

    /// Append codes not already pooled. Holds the write lock.
    async fn append_codes(&self, codes: &[String]) -> Result<usize> {
        let mut pool = self.load_pool().await?;
        let offset = pool.len();
        let now = Utc::now();

        let mut added = 0usize;
        for raw in codes {
            let Some(code) = normalize_code(raw) else {
                continue;
            };
            // Pool-local dedup only; the ledger is intentionally not consulted.
            if pool.iter().any(|entry| entry.code == code) {
                debug!(%code, "Skipping duplicate code already in pool");
                continue;
            }
            pool.push(PoolEntry {
                id: entry_id(now, offset + added),
                code,
                created_at: now,
            });
            added += 1;
        }

        if added > 0 {
            self.store_pool(&pool).await?;
        }
        Ok(added)
    }

    /// The race-sensitive core. Holds the write lock.
    async fn allocate(
        &self,
        user_id: &str,
        offer_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<PromoAssignment>> {
        // Idempotent short-circuit: the pair already holds a code.
        if let Some(existing) = self.load_assignment(user_id, offer_id).await? {
            debug!(user_id, offer_id, code = %existing.code, "Returning existing assignment");
            return Ok(Some(existing));
        }

        let mut pool = self.load_pool().await?;
        if pool.is_empty() {
            warn!(user_id, offer_id, "Code pool exhausted, nothing to assign");
            return Ok(None);
        }

        // FIFO: oldest-ingested code first.
        let selected = pool.remove(0);
        self.store_pool(&pool).await?;

        let assigned_at = Utc::now();
        let expires_at = match expires_at {
            Some(explicit) if explicit >= assigned_at => explicit,
            Some(explicit) => {
                warn!(user_id, offer_id, %explicit, "Requested expiry precedes assignment, clamping");
                assigned_at
            }
            None => assigned_at + Duration::days(self.config.validity_days),
        };

        let assignment = PromoAssignment {
            user_id: user_id.to_string(),
            offer_id: offer_id.to_string(),
            code: selected.code.clone(),
            assigned_at,
            expires_at,
            is_used: false,
        };
        self.store_assignment(&assignment).await?;

        let mut ledger = self.load_ledger().await?;
        ledger.push(LedgerEntry::for_assignment(selected.id, &assignment));
        self.store_ledger(&ledger).await?;

        info!(
            user_id,
            offer_id,
            code = %assignment.code,
            remaining = pool.len(),
            "Assigned promo code"
        );
        Ok(Some(assignment))
    }

    /// Flip `is_used` on both copies. Holds the write lock.
    async fn mark_used(&self, user_id: &str, offer_id: &str) -> Result<bool> {
        let Some(mut assignment) = self.load_assignment(user_id, offer_id).await? else {
            debug!(user_id, offer_id, "No assignment to mark used");
            return Ok(false);
        };

        assignment.is_used = true;
        self.store_assignment(&assignment).await?;

        let mut ledger = self.load_ledger().await?;
        let mut touched = false;
        for entry in ledger.iter_mut() {
            if entry.user_id == user_id && entry.offer_id == offer_id {
                entry.is_used = true;
                touched = true;
            }
        }
        if touched {
            self.store_ledger(&ledger).await?;
        }

        info!(user_id, offer_id, code = %assignment.code, "Marked promo code used");
        Ok(true)
    }

    async fn load_user_assignments(&self, user_id: &str) -> Result<Vec<PromoAssignment>> {
        let scope = keys::user_scope(user_id);
        let matching: Vec<String> = self
            .storage
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(&scope))
            .collect();

        let mut found = Vec::with_capacity(matching.len());
        for (key, value) in self.storage.multi_get(&matching).await? {
            match value {
                Some(raw) => found.push(serde_json::from_str(&raw)?),
                // Key vanished between enumeration and read; skip it.
                None => debug!(%key, "Assignment key disappeared during batch read"),
            }
        }
        Ok(found)
    }

    /// Remove pool, ledger and every assignment key. Holds the write lock.
    async fn clear_all(&self) -> Result<usize> {
        self.storage
            .remove_many(&[keys::POOL.to_string(), keys::LEDGER.to_string()])
            .await?;

        let user_keys: Vec<String> = self
            .storage
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(keys::USER_PREFIX))
            .collect();
        let removed = user_keys.len();
        if !user_keys.is_empty() {
            self.storage.remove_many(&user_keys).await?;
        }
        Ok(removed + 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn manager() -> PromoCodeManager {
        PromoCodeManager::new(Arc::new(Storage::new(Box::new(MemoryBackend::new()))))
    }

    fn codes(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_initialize_normalizes_and_replaces() {
        let mgr = manager();
        assert!(mgr.initialize_code_database(&codes(&[" a1 ", "b2", "  "])).await);

        let pool = mgr.get_available_codes().await;
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].code, "A1");
        assert_eq!(pool[1].code, "B2");
        assert_ne!(pool[0].id, pool[1].id);

        // wholesale replace, not append
        assert!(mgr.initialize_code_database(&codes(&["c3"])).await);
        let pool = mgr.get_available_codes().await;
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].code, "C3");
    }

    #[tokio::test]
    async fn test_add_codes_dedups_against_pool_only() {
        let mgr = manager();
        assert!(mgr.initialize_code_database(&codes(&["A1", "B2"])).await);
        assert!(mgr.add_codes_to_database(&codes(&["a1", "C3", "c3 "])).await);

        let pool = mgr.get_available_codes().await;
        let values: Vec<&str> = pool.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(values, vec!["A1", "B2", "C3"]);

        // a consumed code's value can be re-added: dedup ignores the ledger
        mgr.assign_promo_code_to_user("u1", "o1", None).await.unwrap();
        assert!(mgr.add_codes_to_database(&codes(&["A1"])).await);
        assert_eq!(mgr.get_available_codes_count().await, 3);
    }

    #[tokio::test]
    async fn test_assignment_scenario_fifo() {
        let mgr = manager();
        mgr.initialize_code_database(&codes(&["A1", "B2"])).await;

        let first = mgr.assign_promo_code_to_user("u1", "o1", None).await.unwrap();
        assert_eq!(first.code, "A1");
        assert_eq!(mgr.get_available_codes_count().await, 1);

        // idempotent repeat: same code, pool untouched
        let again = mgr.assign_promo_code_to_user("u1", "o1", None).await.unwrap();
        assert_eq!(again.code, "A1");
        assert_eq!(mgr.get_available_codes_count().await, 1);

        let second = mgr.assign_promo_code_to_user("u2", "o1", None).await.unwrap();
        assert_eq!(second.code, "B2");
        assert_eq!(mgr.get_available_codes_count().await, 0);

        // exhaustion: failure result, collections unchanged
        assert!(mgr.assign_promo_code_to_user("u3", "o1", None).await.is_none());
        assert_eq!(mgr.get_available_codes_count().await, 0);
        assert_eq!(mgr.get_assigned_codes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_assignment_default_expiry_window() {
        let mgr = manager();
        mgr.initialize_code_database(&codes(&["A1"])).await;

        let assignment = mgr.assign_promo_code_to_user("u1", "o1", None).await.unwrap();
        assert_eq!(assignment.expires_at - assignment.assigned_at, Duration::days(30));
        assert!(!assignment.is_used);
    }

    #[tokio::test]
    async fn test_assignment_explicit_expiry_clamped() {
        let mgr = manager();
        mgr.initialize_code_database(&codes(&["A1", "B2"])).await;

        let future = Utc::now() + Duration::days(90);
        let a = mgr.assign_promo_code_to_user("u1", "o1", Some(future)).await.unwrap();
        assert_eq!(a.expires_at, future);

        let past = Utc::now() - Duration::days(1);
        let b = mgr.assign_promo_code_to_user("u2", "o1", Some(past)).await.unwrap();
        assert!(b.expires_at >= b.assigned_at);
    }

    #[tokio::test]
    async fn test_mark_used_monotonic() {
        let mgr = manager();
        mgr.initialize_code_database(&codes(&["A1"])).await;

        // nothing assigned yet: no-op signal
        assert!(!mgr.mark_promo_code_as_used("u1", "o1").await);

        mgr.assign_promo_code_to_user("u1", "o1", None).await.unwrap();
        assert!(mgr.mark_promo_code_as_used("u1", "o1").await);
        assert!(mgr.get_user_promo_code_for_offer("u1", "o1").await.unwrap().is_used);

        // stays true on repeat
        assert!(mgr.mark_promo_code_as_used("u1", "o1").await);
        assert!(mgr.get_user_promo_code_for_offer("u1", "o1").await.unwrap().is_used);
    }

    #[tokio::test]
    async fn test_ledger_and_index_agree() {
        let mgr = manager();
        mgr.initialize_code_database(&codes(&["A1", "B2", "C3"])).await;

        mgr.assign_promo_code_to_user("u1", "o1", None).await.unwrap();
        mgr.assign_promo_code_to_user("u1", "o2", None).await.unwrap();
        mgr.assign_promo_code_to_user("u2", "o1", None).await.unwrap();
        mgr.mark_promo_code_as_used("u1", "o2").await;

        let ledger = mgr.get_assigned_codes().await;
        assert_eq!(ledger.len(), 3);

        for entry in &ledger {
            let assignment = mgr
                .get_user_promo_code_for_offer(&entry.user_id, &entry.offer_id)
                .await
                .unwrap();
            assert_eq!(assignment.code, entry.code);
            assert_eq!(assignment.is_used, entry.is_used);
        }
        assert_eq!(ledger.iter().filter(|e| e.is_used).count(), 1);
    }

    #[tokio::test]
    async fn test_get_all_user_promo_codes_scoped() {
        let mgr = manager();
        mgr.initialize_code_database(&codes(&["A1", "B2", "C3"])).await;

        mgr.assign_promo_code_to_user("u1", "o1", None).await.unwrap();
        mgr.assign_promo_code_to_user("u1", "o2", None).await.unwrap();
        mgr.assign_promo_code_to_user("u2", "o1", None).await.unwrap();

        let mut mine: Vec<String> = mgr
            .get_all_user_promo_codes("u1")
            .await
            .into_iter()
            .map(|a| a.code)
            .collect();
        mine.sort();
        assert_eq!(mine, vec!["A1".to_string(), "B2".to_string()]);

        assert!(mgr.get_all_user_promo_codes("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn test_auto_initialize_guard() {
        let mgr = manager();

        // empty system: seeds the built-in list
        assert!(mgr.auto_initialize().await);
        assert_eq!(mgr.get_available_codes_count().await, DEFAULT_SEED_CODES.len());

        // non-empty pool: success without reseeding
        mgr.initialize_code_database(&codes(&["ONLY1"])).await;
        assert!(mgr.auto_initialize().await);
        assert_eq!(mgr.get_available_codes_count().await, 1);

        // empty pool but non-empty ledger still counts as initialized
        mgr.assign_promo_code_to_user("u1", "o1", None).await.unwrap();
        assert_eq!(mgr.get_available_codes_count().await, 0);
        assert!(mgr.auto_initialize().await);
        assert_eq!(mgr.get_available_codes_count().await, 0);
    }

    #[tokio::test]
    async fn test_stats_derived_from_collections() {
        let mgr = manager();
        assert_eq!(mgr.get_code_database_stats().await, CodeStats::default());

        mgr.initialize_code_database(&codes(&["A1", "B2", "C3"])).await;
        mgr.assign_promo_code_to_user("u1", "o1", None).await.unwrap();
        mgr.assign_promo_code_to_user("u2", "o1", None).await.unwrap();
        mgr.mark_promo_code_as_used("u1", "o1").await;

        let stats = mgr.get_code_database_stats().await;
        assert_eq!(stats.available, 1);
        assert_eq!(stats.assigned, 2);
        assert_eq!(stats.used, 1);
    }

    #[tokio::test]
    async fn test_clear_all_code_data() {
        let mgr = manager();
        mgr.initialize_code_database(&codes(&["A1", "B2"])).await;
        mgr.assign_promo_code_to_user("u1", "o1", None).await.unwrap();

        assert!(mgr.clear_all_code_data().await);
        assert_eq!(mgr.get_available_codes_count().await, 0);
        assert!(mgr.get_assigned_codes().await.is_empty());
        assert!(mgr.get_user_promo_code_for_offer("u1", "o1").await.is_none());
        assert_eq!(mgr.get_code_database_stats().await, CodeStats::default());
    }

    #[tokio::test]
    async fn test_with_config_overrides() {
        let storage = Arc::new(Storage::new(Box::new(MemoryBackend::new())));
        let mgr = PromoCodeManager::with_config(
            storage,
            ManagerConfig {
                validity_days: 7,
                seed_codes: codes(&["SEED1"]),
            },
        );

        assert!(mgr.auto_initialize().await);
        assert_eq!(mgr.get_available_codes_count().await, 1);

        let a = mgr.assign_promo_code_to_user("u1", "o1", None).await.unwrap();
        assert_eq!(a.expires_at - a.assigned_at, Duration::days(7));
    }
}
