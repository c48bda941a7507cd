//! Two-tier result store
//!
//! The ephemeral tier holds full results including raw scanner output; the
//! durable tier holds the same results with raw output stripped, plus the
//! history index. Reads prefer the ephemeral tier. Writes go to both tiers
//! under one lock and keep the durable tier under the eviction policy's
//! soft limit.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::constants::{DEFAULT_HISTORY_MAX, SCAN_HISTORY_KEY, SCAN_RESULTS_KEY};
use crate::errors::StoreError;
use crate::history::HistoryIndex;
use crate::logging;
use crate::models::{HistoryEntry, ScanResult};

pub mod backend;
pub mod eviction;

pub use backend::{FileStore, KeyValueStore, MemoryStore};
pub use eviction::EvictionPolicy;

/// Results blob: `{ "<id>": ScanResult }`
type ResultMap = BTreeMap<Uuid, ScanResult>;

/// Outcome of [`ResultStore::save`]. Saving never fails outright; a durable
/// failure is reported here and the ephemeral copy is kept.
#[derive(Debug, Default)]
pub struct SaveReport {
    /// Ids removed from the durable tier by this save
    pub evicted: Vec<Uuid>,
    /// Durable write failure that survived emergency eviction
    pub storage_failure: Option<StoreError>,
}

impl SaveReport {
    pub fn is_durable(&self) -> bool {
        self.storage_failure.is_none()
    }
}

/// Counts reported after opening a store
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub reset_keys: Vec<String>,
    pub dropped_history: usize,
    pub evicted: usize,
}

pub struct ResultStore {
    durable: Arc<dyn KeyValueStore>,
    ephemeral: Arc<dyn KeyValueStore>,
    policy: EvictionPolicy,
    history_max: usize,
    write_lock: Mutex<()>,
}

impl ResultStore {
    /// Open a store over the two tiers and reconcile the durable state
    pub fn open(
        durable: Arc<dyn KeyValueStore>,
        ephemeral: Arc<dyn KeyValueStore>,
        policy: EvictionPolicy,
        history_max: usize,
    ) -> Result<Self, StoreError> {
        let store = Self {
            durable,
            ephemeral,
            policy,
            history_max,
            write_lock: Mutex::new(()),
        };
        let report = store.reconcile()?;
        if report != ReconcileReport::default() {
            log::info!(
                "Reconciled store: reset {:?}, dropped {} history row(s), evicted {}",
                report.reset_keys,
                report.dropped_history,
                report.evicted
            );
        }
        Ok(store)
    }

    /// Store with in-memory tiers and default limits
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            EvictionPolicy::default(),
            DEFAULT_HISTORY_MAX,
        )
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Reset corrupted blobs, drop history rows with no durable result and
    /// apply the size policy once
    fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut report = ReconcileReport::default();

        let mut results = match read_blob::<ResultMap>(&*self.durable, SCAN_RESULTS_KEY) {
            Ok(results) => results.unwrap_or_default(),
            Err(reason) => {
                logging::log_blob_reset(SCAN_RESULTS_KEY, "durable", &reason);
                self.durable.remove(SCAN_RESULTS_KEY)?;
                report.reset_keys.push(SCAN_RESULTS_KEY.to_string());
                ResultMap::new()
            }
        };

        let entries = match read_blob::<Vec<HistoryEntry>>(&*self.durable, SCAN_HISTORY_KEY) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(reason) => {
                logging::log_blob_reset(SCAN_HISTORY_KEY, "durable", &reason);
                self.durable.remove(SCAN_HISTORY_KEY)?;
                report.reset_keys.push(SCAN_HISTORY_KEY.to_string());
                Vec::new()
            }
        };

        if read_blob::<ResultMap>(&*self.ephemeral, SCAN_RESULTS_KEY).is_err() {
            logging::log_blob_reset(SCAN_RESULTS_KEY, "ephemeral", "unreadable");
            self.ephemeral.remove(SCAN_RESULTS_KEY)?;
            report.reset_keys.push(format!("ephemeral:{}", SCAN_RESULTS_KEY));
        }

        let stored_rows = entries.len();
        let mut history = HistoryIndex::from_entries(entries, self.history_max);
        let trimmed = stored_rows - history.len();
        let durable_ids: HashSet<Uuid> = results.keys().copied().collect();
        report.dropped_history = history.prune(&durable_ids) + trimmed;

        let evicted = self.enforce_soft_limit(&mut results, &mut history, None)?;
        report.evicted = evicted.len();

        // Persist only when something changed
        if report.dropped_history > 0 && evicted.is_empty() {
            write_blob(&*self.durable, SCAN_HISTORY_KEY, history.entries())?;
        }

        Ok(report)
    }

    /// Persist `result` in both tiers and record it in the history index
    pub fn save(&self, result: &ScanResult) -> SaveReport {
        let mut report = SaveReport::default();
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(_) => {
                report.storage_failure = Some(StoreError::LockPoisoned);
                return report;
            }
        };

        self.save_ephemeral(result);

        let mut results = self.load_results(&*self.durable);
        results.insert(result.id, result.without_raw());

        let mut history = self.load_history();
        history.record(result.history_entry());
        let mut valid = self.ephemeral_ids();
        valid.extend(results.keys().copied());
        history.prune(&valid);

        match self.write_durable(&results, &history) {
            Ok(bytes) => logging::log_result_saved(result.id, bytes),
            Err(error) => {
                log::warn!("Durable write failed ({}), evicting to make room", error);
                match self.emergency_write(&mut results, &mut history, result.id) {
                    Ok(evicted) => report.evicted = evicted,
                    Err(retry_error) => {
                        logging::log_storage_failure(
                            &retry_error.to_string(),
                            Some("durable write after emergency eviction"),
                        );
                        report.storage_failure = Some(retry_error);
                        return report;
                    }
                }
            }
        }

        match self.enforce_soft_limit(&mut results, &mut history, Some(result.id)) {
            Ok(evicted) => report.evicted.extend(evicted),
            Err(error) => {
                logging::log_storage_failure(&error.to_string(), Some("proactive eviction"));
                report.storage_failure = Some(error);
            }
        }

        report
    }

    /// Ephemeral writes are best effort. If the tier is full it is reset to
    /// hold just this result.
    fn save_ephemeral(&self, result: &ScanResult) {
        let mut results = self.load_results(&*self.ephemeral);
        results.insert(result.id, result.clone());
        if let Err(error) = write_blob(&*self.ephemeral, SCAN_RESULTS_KEY, &results) {
            log::warn!("Session tier write failed ({}), keeping only the newest result", error);
            let only: ResultMap = [(result.id, result.clone())].into_iter().collect();
            if let Err(error) = write_blob(&*self.ephemeral, SCAN_RESULTS_KEY, &only) {
                log::warn!("Session tier unavailable: {}", error);
            }
        }
    }

    /// Keep the newest `emergency_retained` results (always including
    /// `pinned`) and retry the durable write once
    fn emergency_write(
        &self,
        results: &mut ResultMap,
        history: &mut HistoryIndex,
        pinned: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        let keep = EvictionPolicy::retained_ids(
            results,
            history.entries(),
            self.policy.emergency_retained,
            Some(pinned),
        );
        let evicted = evict_except(results, &keep);
        history.prune(&results.keys().copied().collect());

        let bytes = self.write_durable(results, history)?;
        logging::log_eviction("emergency", &evicted, bytes, self.policy.soft_limit_bytes);
        Ok(evicted)
    }

    /// Evict oldest-saved first down to `min_retained` when the durable tier
    /// is over the soft limit, never touching `pinned`. History is pruned to
    /// what the durable tier still holds.
    fn enforce_soft_limit(
        &self,
        results: &mut ResultMap,
        history: &mut HistoryIndex,
        pinned: Option<Uuid>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let size = durable_size(results, history)?;
        if !self.policy.exceeds_soft_limit(size) || results.len() <= self.policy.min_retained {
            return Ok(Vec::new());
        }

        let keep = EvictionPolicy::retained_ids(
            results,
            history.entries(),
            self.policy.min_retained,
            pinned,
        );
        let evicted = evict_except(results, &keep);
        history.prune(&results.keys().copied().collect());

        let bytes = self.write_durable(results, history)?;
        logging::log_eviction("proactive", &evicted, bytes, self.policy.soft_limit_bytes);
        Ok(evicted)
    }

    /// Write both durable blobs, returning their combined size
    fn write_durable(&self, results: &ResultMap, history: &HistoryIndex) -> Result<usize, StoreError> {
        let results_bytes = write_blob(&*self.durable, SCAN_RESULTS_KEY, results)?;
        let history_bytes = write_blob(&*self.durable, SCAN_HISTORY_KEY, history.entries())?;
        Ok(results_bytes + history_bytes)
    }

    /// Look a result up, ephemeral tier first
    pub fn get(&self, id: Uuid) -> Option<ScanResult> {
        self.load_results(&*self.ephemeral)
            .remove(&id)
            .or_else(|| self.load_results(&*self.durable).remove(&id))
    }

    /// Remove a result from both tiers and the index. True if anything was removed.
    pub fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;

        let mut ephemeral = self.load_results(&*self.ephemeral);
        let in_ephemeral = ephemeral.remove(&id).is_some();
        if in_ephemeral {
            write_blob(&*self.ephemeral, SCAN_RESULTS_KEY, &ephemeral)?;
        }

        let mut durable = self.load_results(&*self.durable);
        let in_durable = durable.remove(&id).is_some();

        let mut history = self.load_history();
        let in_history = history.remove(id);
        let mut valid: HashSet<Uuid> = ephemeral.keys().copied().collect();
        valid.extend(durable.keys().copied());
        let pruned = history.prune(&valid);

        if in_durable || in_history || pruned > 0 {
            self.write_durable(&durable, &history)?;
        }

        let removed = in_ephemeral || in_durable || in_history;
        if removed {
            log::info!("Deleted scan result {}", id);
        }
        Ok(removed)
    }

    /// History rows that resolve in at least one tier, newest first
    pub fn list_history(&self) -> Vec<HistoryEntry> {
        let mut history = self.load_history();
        let mut valid = self.ephemeral_ids();
        valid.extend(self.load_results(&*self.durable).keys().copied());
        history.prune(&valid);
        history.list()
    }

    /// History rows whose target matches `pattern` exactly or as a glob
    pub fn filter_history(&self, pattern: &str) -> Vec<HistoryEntry> {
        HistoryIndex::from_entries(self.list_history(), self.history_max).filter(pattern)
    }

    /// Serialized size of the durable tier
    pub fn durable_size(&self) -> Result<usize, StoreError> {
        durable_size(&self.load_results(&*self.durable), &self.load_history())
    }

    /// Ids currently held by the durable tier
    pub fn durable_ids(&self) -> HashSet<Uuid> {
        self.load_results(&*self.durable).keys().copied().collect()
    }

    fn ephemeral_ids(&self) -> HashSet<Uuid> {
        self.load_results(&*self.ephemeral).keys().copied().collect()
    }

    /// Unreadable blobs count as empty; the next write replaces them
    fn load_results(&self, tier: &dyn KeyValueStore) -> ResultMap {
        match read_blob::<ResultMap>(tier, SCAN_RESULTS_KEY) {
            Ok(results) => results.unwrap_or_default(),
            Err(reason) => {
                log::warn!("Ignoring unreadable results in {}: {}", tier.describe(), reason);
                ResultMap::new()
            }
        }
    }

    fn load_history(&self) -> HistoryIndex {
        let entries = match read_blob::<Vec<HistoryEntry>>(&*self.durable, SCAN_HISTORY_KEY) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(reason) => {
                log::warn!("Ignoring unreadable history: {}", reason);
                Vec::new()
            }
        };
        HistoryIndex::from_entries(entries, self.history_max)
    }
}

/// Remove every result not in `keep`; returns the removed ids
fn evict_except(results: &mut ResultMap, keep: &HashSet<Uuid>) -> Vec<Uuid> {
    let evicted: Vec<Uuid> = results
        .keys()
        .filter(|id| !keep.contains(id))
        .copied()
        .collect();
    results.retain(|id, _| keep.contains(id));
    evicted
}

fn durable_size(results: &ResultMap, history: &HistoryIndex) -> Result<usize, StoreError> {
    Ok(to_json(SCAN_RESULTS_KEY, results)?.len() + to_json(SCAN_HISTORY_KEY, history.entries())?.len())
}

fn to_json<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Serialization {
        key: key.to_string(),
        source,
    })
}

/// Serialize and write `value`, returning the bytes written
fn write_blob<T: Serialize + ?Sized>(
    tier: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<usize, StoreError> {
    let json = to_json(key, value)?;
    tier.set(key, &json)?;
    Ok(json.len())
}

/// `Ok(None)` when the key is absent, `Err` with a reason when unreadable
fn read_blob<T: DeserializeOwned>(tier: &dyn KeyValueStore, key: &str) -> Result<Option<T>, String> {
    let raw = match tier.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw).map(Some).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HostRecord, ParsedResult, ScanConfiguration, ScanType};
    use chrono::{Duration, TimeZone, Utc};

    fn result(target: &str, offset_secs: i64, raw: Option<&str>) -> ScanResult {
        let config = ScanConfiguration::new(target, ScanType::Basic);
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(offset_secs);
        let parsed = ParsedResult {
            hosts: vec![HostRecord::default()],
        };
        ScanResult::new(
            &config,
            format!("nmap -sS -T4 -oX - {}", target),
            ts,
            2.5,
            parsed,
            raw.map(str::to_string),
        )
    }

    fn tiers() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    fn open(durable: &Arc<MemoryStore>, ephemeral: &Arc<MemoryStore>, policy: EvictionPolicy) -> ResultStore {
        ResultStore::open(durable.clone(), ephemeral.clone(), policy, DEFAULT_HISTORY_MAX).unwrap()
    }

    #[test]
    fn test_save_writes_both_tiers_and_strips_raw_durably() {
        let (durable, ephemeral) = tiers();
        let store = open(&durable, &ephemeral, EvictionPolicy::default());
        let saved = result("10.0.0.1", 0, Some("<nmaprun/>"));

        let report = store.save(&saved);
        assert!(report.is_durable());
        assert!(report.evicted.is_empty());

        let durable_blob = durable.get(SCAN_RESULTS_KEY).unwrap().unwrap();
        assert!(!durable_blob.contains("raw_payload"));
        let ephemeral_blob = ephemeral.get(SCAN_RESULTS_KEY).unwrap().unwrap();
        assert!(ephemeral_blob.contains("raw_payload"));

        assert_eq!(store.get(saved.id), Some(saved.clone()));
        assert_eq!(store.list_history(), vec![saved.history_entry()]);
    }

    #[test]
    fn test_get_falls_back_to_durable() {
        let (durable, ephemeral) = tiers();
        let saved = result("10.0.0.1", 0, Some("<nmaprun/>"));
        open(&durable, &ephemeral, EvictionPolicy::default()).save(&saved);

        // New session: empty ephemeral tier
        let store = open(&durable, &Arc::new(MemoryStore::new()), EvictionPolicy::default());
        let loaded = store.get(saved.id).unwrap();
        assert_eq!(loaded.raw_payload, None);
        assert_eq!(loaded, saved.without_raw());
        assert_eq!(store.get(Uuid::new_v4()), None);
    }

    #[test]
    fn test_proactive_eviction_keeps_min_retained() {
        let (durable, ephemeral) = tiers();
        let policy = EvictionPolicy {
            soft_limit_bytes: 1,
            min_retained: 2,
            emergency_retained: 1,
        };
        let store = open(&durable, &ephemeral, policy);
        let saved: Vec<_> = (0..4).map(|i| result(&format!("10.0.0.{}", i), i, None)).collect();

        let mut evicted = Vec::new();
        for r in &saved {
            evicted.extend(store.save(r).evicted);
        }

        assert_eq!(evicted.len(), 2);
        assert_eq!(store.durable_ids(), [saved[2].id, saved[3].id].into_iter().collect());
        let listed: Vec<Uuid> = store.list_history().iter().map(|e| e.id).collect();
        assert_eq!(listed, vec![saved[3].id, saved[2].id]);
        // Eviction never touches the session tier
        assert!(store.get(saved[0].id).is_some());
    }

    #[test]
    fn test_emergency_eviction_on_capacity() {
        let (_, ephemeral) = tiers();
        let first = result("10.0.0.1", 0, None);
        let result_bytes = serde_json::to_string(&first).unwrap().len() + 40;
        let row_bytes = serde_json::to_string(&first.history_entry()).unwrap().len() + 1;
        // Room for two results and their history rows, not three
        let durable = Arc::new(MemoryStore::with_capacity(2 * (result_bytes + row_bytes) + 100));
        let policy = EvictionPolicy {
            soft_limit_bytes: usize::MAX,
            min_retained: 10,
            emergency_retained: 1,
        };
        let store = ResultStore::open(durable.clone(), ephemeral.clone(), policy, 50).unwrap();

        assert!(store.save(&first).is_durable());
        let second = result("10.0.0.2", 10, None);
        store.save(&second);
        let third = result("10.0.0.3", 20, None);
        let report = store.save(&third);

        assert!(report.is_durable());
        assert!(!report.evicted.is_empty());
        assert!(store.durable_ids().contains(&third.id));
        assert!(store.durable_ids().len() < 3);
    }

    #[test]
    fn test_storage_failure_keeps_ephemeral_copy() {
        let (_, ephemeral) = tiers();
        let durable = Arc::new(MemoryStore::with_capacity(16));
        let store = ResultStore::open(durable, ephemeral.clone(), EvictionPolicy::default(), 50).unwrap();

        let saved = result("10.0.0.1", 0, Some("raw"));
        let report = store.save(&saved);
        assert!(matches!(
            report.storage_failure,
            Some(StoreError::CapacityExceeded { .. })
        ));
        assert_eq!(store.get(saved.id), Some(saved));
    }

    #[test]
    fn test_full_session_tier_keeps_only_newest() {
        let raw = "x".repeat(1_000);
        let first = result("10.0.0.1", 0, Some(&raw));
        let second = result("10.0.0.2", 1, Some(&raw));
        let single = |r: &ScanResult| to_json(SCAN_RESULTS_KEY, &ResultMap::from([(r.id, r.clone())])).unwrap().len();
        let capacity = SCAN_RESULTS_KEY.len() + single(&first).max(single(&second)) + 10;

        let durable = Arc::new(MemoryStore::new());
        let ephemeral = Arc::new(MemoryStore::with_capacity(capacity));
        let store = open(&durable, &ephemeral, EvictionPolicy::default());
        assert!(store.save(&first).is_durable());
        assert!(store.save(&second).is_durable());

        assert_eq!(store.ephemeral_ids(), HashSet::from([second.id]));
        assert_eq!(store.get(second.id), Some(second));
        assert_eq!(store.get(first.id), Some(first.without_raw()));
        assert_eq!(store.list_history().len(), 2);
    }

    #[test]
    fn test_delete_removes_everywhere() {
        let (durable, ephemeral) = tiers();
        let store = open(&durable, &ephemeral, EvictionPolicy::default());
        let keep = result("10.0.0.1", 0, None);
        let gone = result("10.0.0.2", 1, Some("raw"));
        store.save(&keep);
        store.save(&gone);

        assert!(store.delete(gone.id).unwrap());
        assert!(!store.delete(gone.id).unwrap());
        assert_eq!(store.get(gone.id), None);
        assert_eq!(store.list_history(), vec![keep.history_entry()]);
    }

    #[test]
    fn test_open_resets_corrupted_blobs() {
        let (durable, ephemeral) = tiers();
        durable.set(SCAN_RESULTS_KEY, "{not json").unwrap();
        durable.set(SCAN_HISTORY_KEY, "[]").unwrap();

        let store = open(&durable, &ephemeral, EvictionPolicy::default());
        assert!(store.list_history().is_empty());
        assert_eq!(durable.get(SCAN_RESULTS_KEY).unwrap(), None);

        let saved = result("10.0.0.1", 0, None);
        assert!(store.save(&saved).is_durable());
        assert_eq!(store.get(saved.id).map(|r| r.id), Some(saved.id));
    }

    #[test]
    fn test_open_drops_history_without_durable_result() {
        let (durable, ephemeral) = tiers();
        let orphan = result("10.0.0.9", 0, None);
        durable
            .set(SCAN_HISTORY_KEY, &serde_json::to_string(&[orphan.history_entry()]).unwrap())
            .unwrap();

        let store = open(&durable, &ephemeral, EvictionPolicy::default());
        assert!(store.list_history().is_empty());
        assert_eq!(durable.get(SCAN_HISTORY_KEY).unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_filter_history() {
        let (durable, ephemeral) = tiers();
        let store = open(&durable, &ephemeral, EvictionPolicy::default());
        store.save(&result("10.0.0.1", 0, None));
        store.save(&result("10.0.0.2", 1, None));
        store.save(&result("scanme.example.org", 2, None));

        assert_eq!(store.filter_history("10.0.0.*").len(), 2);
        assert_eq!(store.filter_history("scanme.example.org").len(), 1);
    }
}
