//! Size-driven eviction for the durable tier

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_EMERGENCY_RETAINED, DEFAULT_MIN_RETAINED, DEFAULT_SOFT_LIMIT_BYTES};
use crate::models::{HistoryEntry, ScanResult};

/// Capacity rules for the durable tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionPolicy {
    /// Serialized durable size (results blob + history blob) that triggers eviction
    pub soft_limit_bytes: usize,
    /// Most recent results kept by proactive eviction
    pub min_retained: usize,
    /// Most recent results kept after a failed durable write
    pub emergency_retained: usize,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            soft_limit_bytes: DEFAULT_SOFT_LIMIT_BYTES,
            min_retained: DEFAULT_MIN_RETAINED,
            emergency_retained: DEFAULT_EMERGENCY_RETAINED,
        }
    }
}

impl EvictionPolicy {
    pub fn exceeds_soft_limit(&self, durable_bytes: usize) -> bool {
        durable_bytes > self.soft_limit_bytes
    }

    /// Ids of the `keep` most recent results. `pinned` is always kept and
    /// counts toward `keep`.
    ///
    /// Recency is save order, which is history position (earlier rows are
    /// newer). Results without a history row rank after all rows, by scan
    /// timestamp, then by id for a stable order.
    pub fn retained_ids(
        results: &BTreeMap<Uuid, ScanResult>,
        history: &[HistoryEntry],
        keep: usize,
        pinned: Option<Uuid>,
    ) -> HashSet<Uuid> {
        let position: HashMap<Uuid, usize> = history
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.id, idx))
            .collect();

        let mut ordered: Vec<&ScanResult> = results.values().collect();
        ordered.sort_by(|a, b| newest_first(a, b, &position));

        let mut kept: HashSet<Uuid> = HashSet::with_capacity(keep);
        if let Some(id) = pinned.filter(|id| results.contains_key(id)) {
            kept.insert(id);
        }
        for result in ordered {
            if kept.len() >= keep {
                break;
            }
            kept.insert(result.id);
        }
        kept
    }
}

fn newest_first(a: &ScanResult, b: &ScanResult, position: &HashMap<Uuid, usize>) -> Ordering {
    let pa = position.get(&a.id).copied().unwrap_or(usize::MAX);
    let pb = position.get(&b.id).copied().unwrap_or(usize::MAX);
    pa.cmp(&pb)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParsedResult, ScanConfiguration, ScanType};
    use chrono::{TimeZone, Utc};

    fn result_at(secs: i64) -> ScanResult {
        let config = ScanConfiguration::new("10.0.0.1", ScanType::Ping);
        let ts = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        ScanResult::new(&config, "nmap".into(), ts, 1.0, ParsedResult::default(), None)
    }

    fn map(results: &[ScanResult]) -> BTreeMap<Uuid, ScanResult> {
        results.iter().map(|r| (r.id, r.clone())).collect()
    }

    #[test]
    fn test_save_order_wins_over_scan_start() {
        // Long scan started first but was saved last
        let results = [result_at(100), result_at(50), result_at(10)];
        let history = vec![
            results[2].history_entry(),
            results[1].history_entry(),
            results[0].history_entry(),
        ];
        let kept = EvictionPolicy::retained_ids(&map(&results), &history, 1, None);
        assert_eq!(kept, HashSet::from([results[2].id]));
    }

    #[test]
    fn test_unindexed_results_fall_back_to_timestamp() {
        let results = [result_at(0), result_at(30), result_at(10)];
        let kept = EvictionPolicy::retained_ids(&map(&results), &[], 2, None);
        assert_eq!(kept.len(), 2);
        assert!(kept.contains(&results[1].id));
        assert!(kept.contains(&results[2].id));
    }

    #[test]
    fn test_equal_timestamps_use_history_position() {
        let results = [result_at(5), result_at(5)];
        let history = vec![results[1].history_entry(), results[0].history_entry()];
        let kept = EvictionPolicy::retained_ids(&map(&results), &history, 1, None);
        assert!(kept.contains(&results[1].id));
    }

    #[test]
    fn test_pinned_counts_toward_keep() {
        let results = [result_at(0), result_at(10), result_at(20)];
        let kept = EvictionPolicy::retained_ids(&map(&results), &[], 2, Some(results[0].id));
        assert_eq!(kept.len(), 2);
        assert!(kept.contains(&results[0].id));
        assert!(kept.contains(&results[2].id));
    }

    #[test]
    fn test_soft_limit_is_exclusive() {
        let policy = EvictionPolicy {
            soft_limit_bytes: 100,
            ..EvictionPolicy::default()
        };
        assert!(!policy.exceeds_soft_limit(100));
        assert!(policy.exceeds_soft_limit(101));
    }
}
