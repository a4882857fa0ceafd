//! Registry of exported counters, keyed by hardware stat.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use bcm_sdk::api::StatType;
use bcm_sdk::BcmResult;

use super::{MonotonicCounter, PendingStat, StatChangeQueue, StatKey};
use crate::error::{HalError, HalResult};
use crate::hw::HwContext;
use crate::{debug_log, info_log, warn_log};

const SOURCE: &str = "StatUpdater";

#[derive(Debug)]
struct StatCounters {
    name: String,
    counters: BTreeMap<StatType, MonotonicCounter>,
}

impl StatCounters {
    fn new(pending: &PendingStat) -> Self {
        Self {
            counters: pending
                .types
                .iter()
                .map(|t| (*t, MonotonicCounter::new(format!("{}.{}", pending.name, t))))
                .collect(),
            name: pending.name.clone(),
        }
    }
}

/// Counters for every stat the tables hold.
///
/// The counter map is behind one lock. [`refresh`](Self::refresh) is the
/// only writer; [`update_stats`](Self::update_stats) reads hardware under
/// the read lock and never changes the key set.
pub struct StatUpdater {
    ctx: Arc<HwContext>,
    stats: RwLock<BTreeMap<StatKey, StatCounters>>,
}

impl StatUpdater {
    pub fn new(ctx: Arc<HwContext>) -> Self {
        Self {
            ctx,
            stats: RwLock::new(BTreeMap::new()),
        }
    }

    /// Checks that `queue` applies cleanly: every removal names a known
    /// stat and no addition duplicates one. The queue is left as it is.
    pub fn check(&self, queue: &StatChangeQueue) -> HalResult<()> {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        validate(&stats, queue)
    }

    /// Applies the stat changes of one state delta.
    ///
    /// Removals are applied before additions, so a handle the SDK reused
    /// within the batch is accepted. The batch is checked first and drained
    /// only if it applies cleanly; otherwise neither the registry nor the
    /// queue changes.
    pub fn refresh(&self, queue: &mut StatChangeQueue) -> HalResult<()> {
        if queue.is_empty() {
            return Ok(());
        }
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        validate(&stats, queue)?;
        let (removals, additions) = queue.take();

        for key in &removals {
            if let Some(removed) = stats.remove(key) {
                debug_log!(SOURCE, stat = %key, "removed counters of {}", removed.name);
            }
        }
        for pending in &additions {
            debug_log!(SOURCE, stat = %pending.key, "added counters of {}", pending.name);
            stats.insert(pending.key, StatCounters::new(pending));
        }
        info_log!(
            SOURCE,
            removed = removals.len(),
            added = additions.len(),
            stats = stats.len(),
            "refreshed stats"
        );
        Ok(())
    }

    /// Reads every known counter from hardware. Returns the number of
    /// counters that were read successfully.
    pub fn update_stats(&self) -> usize {
        let sdk = self.ctx.sdk();
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        let mut updated = 0;
        for (key, stat) in stats.iter() {
            for (stat_type, counter) in &stat.counters {
                let sample: BcmResult<u64> = match key {
                    StatKey::Acl(handle) => sdk.stat_get(*handle, *stat_type),
                    StatKey::TeFlow(handle) => sdk.flexctr_stat_get(*handle, *stat_type),
                };
                match sample {
                    Ok(value) => {
                        counter.update(value);
                        updated += 1;
                    }
                    Err(e) => {
                        warn_log!(SOURCE, stat = %key, "failed to read {}: {}", counter.name(), e);
                    }
                }
            }
        }
        updated
    }

    /// Current value of one counter.
    pub fn counter(&self, key: impl Into<StatKey>, stat_type: StatType) -> HalResult<u64> {
        let key = key.into();
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        stats
            .get(&key)
            .and_then(|stat| stat.counters.get(&stat_type))
            .map(MonotonicCounter::value)
            .ok_or_else(|| HalError::StatNotFound(format!("{} {}", key, stat_type)))
    }

    pub fn counter_name(&self, key: impl Into<StatKey>, stat_type: StatType) -> Option<String> {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        stats
            .get(&key.into())
            .and_then(|stat| stat.counters.get(&stat_type))
            .map(|counter| counter.name().to_string())
    }

    /// Number of exported counters, one per stat and counter type.
    pub fn counter_count(&self) -> usize {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        stats.values().map(|stat| stat.counters.len()).sum()
    }

    pub fn stat_count(&self) -> usize {
        self.stats.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn validate(stats: &BTreeMap<StatKey, StatCounters>, queue: &StatChangeQueue) -> HalResult<()> {
    let mut known: BTreeMap<StatKey, bool> = stats.keys().map(|key| (*key, true)).collect();
    for key in queue.removals() {
        match known.get_mut(key) {
            Some(present) if *present => *present = false,
            _ => return Err(HalError::MissingStat(key.to_string())),
        }
    }
    for pending in queue.additions() {
        let present = known.entry(pending.key).or_insert(false);
        if *present {
            return Err(HalError::DuplicateStat(pending.key.to_string()));
        }
        *present = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::StatTableAccess;
    use crate::config::HalConfig;
    use bcm_sdk::api::FieldApi;
    use bcm_sdk::{FakeSdk, Handle};
    use pretty_assertions::assert_eq;

    fn updater() -> (Arc<FakeSdk>, StatUpdater) {
        let sdk = Arc::new(FakeSdk::new());
        let ctx = HwContext::new(sdk.clone(), HalConfig::default());
        (sdk, StatUpdater::new(ctx))
    }

    #[test]
    fn test_counters_named_by_stat_and_type() {
        let (sdk, updater) = updater();
        let stat = sdk
            .stat_create(128, &[StatType::Packets, StatType::Bytes])
            .unwrap();
        let mut queue = StatChangeQueue::default();
        queue.to_be_added_acl_stat(stat, "stat0", &[StatType::Packets, StatType::Bytes]);
        updater.refresh(&mut queue).unwrap();
        assert!(queue.is_empty());

        assert_eq!(updater.counter_count(), 2);
        assert_eq!(
            updater.counter_name(stat, StatType::Bytes).as_deref(),
            Some("stat0.bytes")
        );

        sdk.set_stat_value(stat, StatType::Packets, 42);
        assert_eq!(updater.update_stats(), 2);
        assert_eq!(updater.counter(stat, StatType::Packets).unwrap(), 42);
    }

    #[test]
    fn test_duplicate_addition_rejected_whole_batch() {
        let (_sdk, updater) = updater();
        let stat = Handle::from_raw_unchecked(5);
        let other = Handle::from_raw_unchecked(6);
        let mut queue = StatChangeQueue::default();
        queue.to_be_added_acl_stat(stat, "stat0", &[StatType::Packets]);
        updater.refresh(&mut queue).unwrap();

        queue.to_be_added_acl_stat(other, "stat1", &[StatType::Packets]);
        queue.to_be_added_acl_stat(stat, "stat0", &[StatType::Packets]);
        assert!(matches!(
            updater.check(&queue),
            Err(HalError::DuplicateStat(_))
        ));
        assert!(matches!(
            updater.refresh(&mut queue),
            Err(HalError::DuplicateStat(_))
        ));
        assert_eq!(updater.stat_count(), 1);
        // The rejected batch stays queued
        assert_eq!(queue.pending_acl_additions(), 2);
    }

    #[test]
    fn test_removal_of_unknown_stat_rejected() {
        let (_sdk, updater) = updater();
        let mut queue = StatChangeQueue::default();
        queue.to_be_removed_teflow_stat(Handle::from_raw_unchecked(9));
        assert!(matches!(
            updater.refresh(&mut queue),
            Err(HalError::MissingStat(_))
        ));
        assert_eq!(queue.pending_removals(), 1);
    }
}
