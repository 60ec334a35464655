use crate::config::CacheConfig;

use super::backend::{EntryInfo, StorageUsageSnapshot};

/// Selects which entries to voluntarily evict when storage runs out.
///
/// The policy is pure: it receives a listing and a usage snapshot and returns
/// the ids to remove. Corrupt entries are always selected, ahead of any
/// age-based choice; after that, oldest entries are accumulated until usage
/// falls under the target, and not one entry further. It is invoked lazily,
/// only when a write has failed on a quota condition; there is no periodic
/// sweep.
#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    /// Prune until usage falls below this percentage of the reported quota.
    pub target_percent: u8,
    /// Absolute byte ceiling for backends that cannot report a quota.
    pub ceiling_bytes: u64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            target_percent: defaults.eviction_target_percent,
            ceiling_bytes: defaults.eviction_ceiling_bytes,
        }
    }
}

impl EvictionPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            target_percent: config.eviction_target_percent,
            ceiling_bytes: config.eviction_ceiling_bytes,
        }
    }

    /// Returns the ids to remove, oldest-first.
    ///
    /// With a reported quota, usage counts down from the snapshot's
    /// `used_bytes` towards `target_percent` of the quota. Without one, the
    /// summed entry sizes stand in as a local estimate, trimmed under the
    /// absolute ceiling. Because this only runs after a failed write, an
    /// empty selection would make the retry pointless; in that case the
    /// single oldest entry is selected so the retry can make progress.
    pub fn prune(&self, entries: &[EntryInfo], usage: StorageUsageSnapshot) -> Vec<String> {
        let mut candidates: Vec<&EntryInfo> = entries.iter().collect();
        candidates.sort_by_key(|entry| (!entry.corrupt, entry.created_at));

        let (mut remaining, target_bytes) = match usage.quota_bytes {
            Some(quota_bytes) if quota_bytes > 0 => (
                usage.used_bytes,
                quota_bytes * u64::from(self.target_percent) / 100,
            ),
            _ => {
                let estimate: u64 = entries.iter().map(|entry| entry.size_bytes).sum();
                (estimate.max(usage.used_bytes), self.ceiling_bytes)
            }
        };

        let mut selected = Vec::new();
        for entry in candidates {
            if !entry.corrupt && remaining <= target_bytes {
                break;
            }
            remaining = remaining.saturating_sub(entry.size_bytes);
            selected.push(entry.id.clone());
        }

        if selected.is_empty() {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|entry| entry.created_at)
            {
                selected.push(oldest.id.clone());
            }
        }

        selected
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    fn entry(id: &str, age_secs: u64, size_bytes: u64, corrupt: bool) -> EntryInfo {
        EntryInfo {
            id: id.into(),
            created_at: SystemTime::now() - Duration::from_secs(age_secs),
            size_bytes,
            corrupt,
        }
    }

    fn policy() -> EvictionPolicy {
        EvictionPolicy {
            target_percent: 80,
            ceiling_bytes: 5 * 1024 * 1024,
        }
    }

    #[test]
    fn test_oldest_first_until_target() {
        // 95 of 100 used, target 80: need to shed 15, oldest entries are 10 each
        let entries = vec![
            entry("new", 10, 10, false),
            entry("mid", 50, 10, false),
            entry("old", 100, 10, false),
        ];
        let usage = StorageUsageSnapshot {
            used_bytes: 95,
            quota_bytes: Some(100),
        };

        let selected = policy().prune(&entries, usage);
        assert_eq!(selected, vec!["old".to_string(), "mid".to_string()]);
    }

    #[test]
    fn test_no_more_than_necessary() {
        // already under target: nothing to do beyond the progress guarantee,
        // which picks exactly one entry
        let entries = vec![entry("old", 100, 10, false), entry("new", 10, 10, false)];
        let usage = StorageUsageSnapshot {
            used_bytes: 50,
            quota_bytes: Some(100),
        };

        let selected = policy().prune(&entries, usage);
        assert_eq!(selected, vec!["old".to_string()]);
    }

    #[test]
    fn test_convergence() {
        // repeated pruning against a shrinking snapshot strictly decreases
        // usage until it crosses the target
        let mut entries: Vec<EntryInfo> = (0..10)
            .map(|i| entry(&format!("e{i}"), 1000 - i * 10, 100, false))
            .collect();
        let quota_bytes = Some(1000);
        let mut used_bytes = 950;

        while used_bytes > 800 {
            let usage = StorageUsageSnapshot {
                used_bytes,
                quota_bytes,
            };
            let selected = policy().prune(&entries, usage);
            assert!(!selected.is_empty());
            for id in &selected {
                let position = entries.iter().position(|e| &e.id == id).unwrap();
                used_bytes -= entries.remove(position).size_bytes;
            }
        }
        assert!(used_bytes <= 800);
        // one round removes exactly what is needed: 950 -> 750
        assert_eq!(used_bytes, 750);
    }

    #[test]
    fn test_corrupt_entries_selected_first() {
        let entries = vec![
            entry("oldest", 100, 10, false),
            entry("broken", 5, 10, true),
        ];
        let usage = StorageUsageSnapshot {
            used_bytes: 95,
            quota_bytes: Some(100),
        };

        let selected = policy().prune(&entries, usage);
        assert_eq!(selected, vec!["broken".to_string(), "oldest".to_string()]);
    }

    #[test]
    fn test_corrupt_entries_selected_even_under_target() {
        let entries = vec![entry("fine", 100, 10, false), entry("broken", 5, 10, true)];
        let usage = StorageUsageSnapshot {
            used_bytes: 20,
            quota_bytes: Some(100),
        };

        let selected = policy().prune(&entries, usage);
        assert_eq!(selected, vec!["broken".to_string()]);
    }

    #[test]
    fn test_unknown_quota_uses_ceiling() {
        let policy = EvictionPolicy {
            target_percent: 80,
            ceiling_bytes: 25,
        };
        let entries = vec![
            entry("a", 300, 10, false),
            entry("b", 200, 10, false),
            entry("c", 100, 10, false),
        ];
        let usage = StorageUsageSnapshot {
            used_bytes: 0,
            quota_bytes: None,
        };

        // local estimate is 30 bytes, ceiling 25: shed the single oldest
        let selected = policy.prune(&entries, usage);
        assert_eq!(selected, vec!["a".to_string()]);
    }

    #[test]
    fn test_failed_write_always_makes_progress() {
        // usage reports healthy but the write failed anyway
        let entries = vec![entry("old", 100, 10, false), entry("new", 10, 10, false)];
        let usage = StorageUsageSnapshot {
            used_bytes: 10,
            quota_bytes: Some(1000),
        };

        let selected = policy().prune(&entries, usage);
        assert_eq!(selected, vec!["old".to_string()]);
    }

    #[test]
    fn test_empty_listing() {
        let usage = StorageUsageSnapshot {
            used_bytes: 100,
            quota_bytes: Some(100),
        };
        assert!(policy().prune(&[], usage).is_empty());
    }
}
