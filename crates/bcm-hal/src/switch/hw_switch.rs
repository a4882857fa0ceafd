use std::sync::Arc;

use bcm_hal_common::{DeltaEvent, StateDelta};
use bcm_sdk::BcmSdk;

use crate::acl::{AclDeps, AclTable};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::config::HalConfig;
use crate::error::{fatal, HalResult};
use crate::hw::HwContext;
use crate::mirror::MirrorTable;
use crate::nexthop::MultiPathNextHopTable;
use crate::port::PortTable;
use crate::state::{AclEntryState, SwitchState, SwitchStateDelta, TeFlowEntryState};
use crate::stats::{StatChangeQueue, StatUpdater};
use crate::teflow::{TeFlowDeps, TeFlowTable};
use crate::warm_boot::{SweepReport, TeFlowGroupState, WarmBootCache, WarmBootState};
use crate::{audit_log, error_log, info_log, warn_log};

const SOURCE: &str = "HwSwitch";

pub struct HwSwitch {
    ctx: Arc<HwContext>,
    cache: WarmBootCache,
    next_hops: MultiPathNextHopTable,
    acls: AclTable,
    teflows: TeFlowTable,
    mirrors: MirrorTable,
    ports: PortTable,
    stat_updater: Arc<StatUpdater>,
    applied: SwitchState,
    init_done: bool,
}

impl HwSwitch {
    /// Brings up the tables against `sdk`.
    ///
    /// The warm-boot cache is populated from whatever the SDK already has
    /// programmed, plus `wb_state` when the previous agent left one. The
    /// initial state must then be applied with
    /// [`state_changed`](Self::state_changed) before
    /// [`finish_init`](Self::finish_init) sweeps what nobody claimed.
    pub fn init(
        sdk: Arc<dyn BcmSdk>,
        config: HalConfig,
        wb_state: Option<WarmBootState>,
    ) -> HalResult<Self> {
        config.validate()?;
        let warm_boot = wb_state.is_some();
        let ctx = HwContext::new(sdk, config);

        let mut cache = WarmBootCache::new(ctx.clone());
        cache.populate(wb_state)?;

        let configured = TeFlowGroupState {
            dst_prefix_length: ctx.config().teflow_dst_prefix_length,
            hint_id: ctx.config().teflow_hint_id,
        };
        let group = match cache.teflow_group_state() {
            Some(saved) => {
                if saved != configured {
                    warn_log!(
                        SOURCE,
                        saved_prefix_length = saved.dst_prefix_length,
                        configured_prefix_length = configured.dst_prefix_length,
                        "keeping teflow group settings from warm boot state"
                    );
                }
                saved
            }
            None => configured,
        };

        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "init")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "warm_boot": warm_boot,
                "cached_objects": cache.len(),
                "asic": format!("{:?}", ctx.config().asic),
            })));

        Ok(Self {
            next_hops: MultiPathNextHopTable::new(ctx.clone()),
            acls: AclTable::new(ctx.clone()),
            teflows: TeFlowTable::new(ctx.clone(), group),
            mirrors: MirrorTable::new(ctx.clone()),
            ports: PortTable::new(),
            stat_updater: Arc::new(StatUpdater::new(ctx.clone())),
            applied: SwitchState::new(),
            init_done: false,
            cache,
            ctx,
        })
    }

    /// Ends initialization: every cached object no table claimed is removed
    /// from hardware.
    pub fn finish_init(&mut self) -> SweepReport {
        let report = self.cache.clear();
        self.init_done = true;
        info_log!(SOURCE, reclaimed = report.total(), "init done");
        audit_log!(AuditRecord::new(AuditCategory::WarmBoot, SOURCE, "sweep")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::to_value(report).unwrap_or_default()));
        report
    }

    /// Programs the difference between the applied state and `new`.
    ///
    /// On failure the hardware is brought back to the previously applied
    /// state and the error is returned; the applied state is unchanged.
    pub fn state_changed(&mut self, new: &SwitchState) -> HalResult<()> {
        new.validate()?;
        let delta = SwitchStateDelta::between(&self.applied, new);
        if delta.is_empty() {
            return Ok(());
        }

        let mut queue = StatChangeQueue::default();
        let applied = self
            .apply(&delta, &mut queue)
            .and_then(|()| self.stat_updater.check(&queue));
        if let Err(e) = applied {
            warn_log!(SOURCE, "state delta failed, rolling back: {}", e);
            audit_log!(AuditRecord::new(AuditCategory::ErrorCondition, SOURCE, "state_changed")
                .with_outcome(AuditOutcome::Failure)
                .with_error(e.to_string()));
            self.roll_back(&mut queue);
            return Err(e);
        }
        self.stat_updater.refresh(&mut queue)?;
        self.applied = new.clone();
        Ok(())
    }

    /// Undoes a partly applied delta. Tables only hold what reached the
    /// hardware, so the delta from their contents back to the applied
    /// state restores it.
    fn roll_back(&mut self, queue: &mut StatChangeQueue) {
        let partial = self.programmed_state();
        let back = SwitchStateDelta::between(&partial, &self.applied);
        if let Err(e) = self.apply(&back, queue) {
            fatal(SOURCE, format!("failed to roll back state delta: {}", e));
        }
        if let Err(e) = self.stat_updater.refresh(queue) {
            fatal(SOURCE, format!("stat registry diverged during roll back: {}", e));
        }
    }

    fn apply(&mut self, delta: &SwitchStateDelta, queue: &mut StatChangeQueue) -> HalResult<()> {
        self.remove_acls(&delta.acls, queue)?;
        self.remove_teflows(&delta.teflows, queue)?;

        for event in delta.ports.iter() {
            match event {
                DeltaEvent::Added(port) => {
                    self.ports
                        .process_added(port, &mut self.mirrors, &mut self.cache)?
                }
                DeltaEvent::Removed(port) => {
                    self.ports
                        .process_removed(port, &mut self.mirrors, &mut self.cache)?
                }
                DeltaEvent::Changed { old, new } => {
                    self.ports
                        .process_changed(old, new, &mut self.mirrors, &mut self.cache)?
                }
            }
        }

        for event in delta.mirrors.iter() {
            if let DeltaEvent::Removed(mirror) = event {
                self.mirrors
                    .process_removed(mirror, &self.ports, &self.acls, &mut self.cache)?;
            }
        }
        for event in delta.mirrors.iter() {
            if let DeltaEvent::Changed { old, new } = event {
                self.mirrors
                    .process_changed(old, new, &self.ports, &self.acls, &mut self.cache)?;
            }
        }
        for event in delta.mirrors.iter() {
            if let DeltaEvent::Added(mirror) = event {
                self.mirrors
                    .process_added(mirror, &self.ports, &self.acls, &mut self.cache)?;
            }
        }

        self.add_acls(&delta.acls, queue)?;
        self.add_teflows(&delta.teflows, queue)
    }

    fn remove_acls(
        &mut self,
        delta: &StateDelta<AclEntryState>,
        queue: &mut StatChangeQueue,
    ) -> HalResult<()> {
        let mut deps = AclDeps {
            cache: &mut self.cache,
            next_hops: &mut self.next_hops,
            stat_access: queue,
            mirrors: &self.mirrors,
        };
        for event in delta.iter() {
            match event {
                DeltaEvent::Removed(old) | DeltaEvent::Changed { old, .. } => {
                    self.acls.process_removed(old, &mut deps)?
                }
                DeltaEvent::Added(_) => {}
            }
        }
        Ok(())
    }

    fn add_acls(
        &mut self,
        delta: &StateDelta<AclEntryState>,
        queue: &mut StatChangeQueue,
    ) -> HalResult<()> {
        let mut deps = AclDeps {
            cache: &mut self.cache,
            next_hops: &mut self.next_hops,
            stat_access: queue,
            mirrors: &self.mirrors,
        };
        for event in delta.iter() {
            if let DeltaEvent::Changed { new, .. } = event {
                self.acls.process_added(new, &mut deps)?;
            }
        }
        for event in delta.iter() {
            if let DeltaEvent::Added(new) = event {
                self.acls.process_added(new, &mut deps)?;
            }
        }
        Ok(())
    }

    fn remove_teflows(
        &mut self,
        delta: &StateDelta<TeFlowEntryState>,
        queue: &mut StatChangeQueue,
    ) -> HalResult<()> {
        let mut deps = TeFlowDeps {
            cache: &mut self.cache,
            next_hops: &mut self.next_hops,
            stat_access: queue,
        };
        for event in delta.iter() {
            if let DeltaEvent::Removed(old) = event {
                self.teflows.process_removed(old, &mut deps)?;
            }
        }
        Ok(())
    }

    fn add_teflows(
        &mut self,
        delta: &StateDelta<TeFlowEntryState>,
        queue: &mut StatChangeQueue,
    ) -> HalResult<()> {
        let mut deps = TeFlowDeps {
            cache: &mut self.cache,
            next_hops: &mut self.next_hops,
            stat_access: queue,
        };
        for event in delta.iter() {
            if let DeltaEvent::Changed { old, new } = event {
                self.teflows.process_changed(old, new, &mut deps)?;
            }
        }
        for event in delta.iter() {
            if let DeltaEvent::Added(new) = event {
                self.teflows.process_added(new, &mut deps)?;
            }
        }
        Ok(())
    }

    /// The state the tables currently hold in hardware.
    pub fn programmed_state(&self) -> SwitchState {
        SwitchState {
            acls: self.acls.states(),
            teflows: self.teflows.states(),
            mirrors: self.mirrors.states(),
            ports: self.ports.states(),
        }
    }

    /// Facts to persist for the next warm boot.
    pub fn warm_boot_state(&self) -> WarmBootState {
        WarmBootState {
            teflow: Some(self.teflows.group_state()),
            acl_stats: self.acls.acl_stat_records(),
            ..WarmBootState::default()
        }
    }

    /// Leaves everything programmed and returns the state the next agent
    /// needs to adopt it.
    pub fn graceful_exit(self) -> WarmBootState {
        let state = self.warm_boot_state();
        self.ctx.set_exiting();
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "graceful_exit")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "acls": self.acls.len(),
                "teflows": self.teflows.len(),
                "mirrors": self.mirrors.len(),
                "acl_stats": state.acl_stats.len(),
            })));
        state
    }

    pub fn is_init_done(&self) -> bool {
        self.init_done
    }

    pub fn applied_state(&self) -> &SwitchState {
        &self.applied
    }

    pub fn context(&self) -> &Arc<HwContext> {
        &self.ctx
    }

    pub fn warm_boot_cache(&self) -> &WarmBootCache {
        &self.cache
    }

    pub fn acl_table(&self) -> &AclTable {
        &self.acls
    }

    pub fn teflow_table(&self) -> &TeFlowTable {
        &self.teflows
    }

    pub fn mirror_table(&self) -> &MirrorTable {
        &self.mirrors
    }

    pub fn port_table(&self) -> &PortTable {
        &self.ports
    }

    pub fn next_hop_table(&self) -> &MultiPathNextHopTable {
        &self.next_hops
    }

    pub fn stat_updater(&self) -> &Arc<StatUpdater> {
        &self.stat_updater
    }
}

impl Drop for HwSwitch {
    /// Without a graceful exit, everything the switch programmed is removed
    /// in dependency order.
    fn drop(&mut self) {
        if self.ctx.is_exiting() || std::thread::panicking() {
            return;
        }
        if let Err(e) = self.state_changed(&SwitchState::new()) {
            error_log!(SOURCE, "failed to tear down switch: {}", e);
            // Leave the rest in hardware rather than destroy objects that
            // are still referenced.
            self.ctx.set_exiting();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::StatTableAccess;
    use crate::error::HalError;
    use crate::state::{MatchAction, TrafficCounter};
    use bcm_sdk::api::StatType;
    use bcm_sdk::{BcmStatus, FakeSdk};
    use pretty_assertions::assert_eq;

    fn counted(name: &str, priority: i32, stat: &str) -> AclEntryState {
        AclEntryState {
            action: Some(MatchAction {
                traffic_counter: Some(TrafficCounter::new(stat, vec![StatType::Packets])),
                ..Default::default()
            }),
            ..AclEntryState::new(name, priority)
        }
    }

    fn switch(sdk: &Arc<FakeSdk>) -> HwSwitch {
        let mut hw = HwSwitch::init(sdk.clone(), HalConfig::default(), None).unwrap();
        hw.finish_init();
        hw
    }

    #[test]
    fn test_failed_delta_rolls_back() {
        let sdk = Arc::new(FakeSdk::new());
        let mut hw = switch(&sdk);
        let first = SwitchState::new().with_acl(counted("acl0", 1, "stat0"));
        hw.state_changed(&first).unwrap();
        assert_eq!(hw.stat_updater().counter_count(), 1);

        // acl0 moves to stat1; its new entry fails to install
        let second = SwitchState::new()
            .with_acl(counted("acl0", 1, "stat1"))
            .with_acl(counted("acl1", 2, "stat1"));
        sdk.fail_next("entry_install", BcmStatus::Internal);
        assert!(hw.state_changed(&second).is_err());

        assert_eq!(hw.programmed_state().acls, first.acls);
        assert_eq!(hw.acl_table().acl_stat_ref_count("stat0"), Some(1));
        assert_eq!(hw.acl_table().acl_stat_ref_count("stat1"), None);
        assert_eq!(sdk.stat_count(), 1);
        assert_eq!(hw.stat_updater().counter_count(), 1);
    }

    #[test]
    fn test_stat_registry_conflict_rolls_back() {
        let sdk = Arc::new(FakeSdk::new());
        let mut hw = switch(&sdk);

        // Every handle the SDK could give the next stat is already known
        let mut taken = StatChangeQueue::default();
        for raw in 1..=64 {
            taken.to_be_added_acl_stat(
                bcm_sdk::Handle::from_raw_unchecked(raw),
                "stale",
                &[StatType::Packets],
            );
        }
        hw.stat_updater().refresh(&mut taken).unwrap();

        let state = SwitchState::new().with_acl(counted("acl0", 1, "stat0"));
        assert!(matches!(
            hw.state_changed(&state),
            Err(HalError::DuplicateStat(_))
        ));
        assert!(hw.programmed_state().acls.is_empty());
        assert_eq!(hw.acl_table().acl_stat_ref_count("stat0"), None);
        assert_eq!(sdk.stat_count(), 0);
        assert_eq!(sdk.entry_count(HalConfig::default().acl_group_id), 0);
        assert_eq!(hw.stat_updater().stat_count(), 64);

        // Nothing was committed, so the same state without a counter applies
        hw.state_changed(&SwitchState::new().with_acl(AclEntryState::new("acl0", 1)))
            .unwrap();
        assert_eq!(sdk.entry_count(HalConfig::default().acl_group_id), 1);
    }

    #[test]
    fn test_drop_tears_down_everything() {
        let sdk = Arc::new(FakeSdk::new());
        {
            let mut hw = switch(&sdk);
            let state = SwitchState::new()
                .with_acl(counted("acl0", 1, "stat0"))
                .with_acl(counted("acl1", 2, "stat0"));
            hw.state_changed(&state).unwrap();
        }
        assert_eq!(sdk.entry_count(HalConfig::default().acl_group_id), 0);
        assert_eq!(sdk.stat_count(), 0);
    }

    #[test]
    fn test_graceful_exit_leaves_hardware() {
        let sdk = Arc::new(FakeSdk::new());
        let mut hw = switch(&sdk);
        hw.state_changed(&SwitchState::new().with_acl(counted("acl0", 1, "stat0")))
            .unwrap();
        let wb = hw.graceful_exit();

        assert_eq!(sdk.entry_count(HalConfig::default().acl_group_id), 1);
        assert_eq!(sdk.stat_count(), 1);
        assert!(wb.acl_stats.contains_key("stat0"));
        assert_eq!(
            wb.teflow.map(|g| g.dst_prefix_length),
            Some(HalConfig::default().teflow_dst_prefix_length)
        );
    }
}
