//! One TeFlow entry.
//!
//! Unlike ACL entries, TeFlow entries are updated in place. The entry keeps
//! the redirect and counter it actually has in hardware; an update moves
//! them toward what the new state asks for and always ends with an install.

use std::collections::BTreeSet;
use std::sync::Arc;

use bcm_sdk::api::{
    EgressPath, FieldAction, Qualifier, QualifierData, QualifierField,
    DEFAULT_COUNTER_ACTION_INDEX,
};
use bcm_sdk::{EgressId, FieldEntryKind, TeFlowEntryHandle, TeFlowStatHandle};

use super::stat::TeFlowStatTable;
use super::table::TeFlowDeps;
use crate::acl::{ip_prefix_from_qualifier, ip_prefix_qualifier};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::error::{check_fatal, fatal, HalError, HalResult};
use crate::hw::{HwContext, Owned};
use crate::nexthop::egress_paths;
use crate::state::{resolve_stat_enabled, TeFlowEntryState, TeFlowKey};
use crate::{audit_log, debug_log, warn_log};

const SOURCE: &str = "TeFlowEntry";

pub fn src_port_qualifier(key: &TeFlowKey) -> QualifierData {
    QualifierData::exact(key.src_port.into(), 32)
}

/// Rebuilds the flow key from the two qualifiers of an entry.
pub fn flow_key_from_hw(src: QualifierData, dst: QualifierData) -> Option<TeFlowKey> {
    if src.is_unset() {
        return None;
    }
    let src_port = u32::try_from(src.data).ok()?;
    let dst_prefix = ip_prefix_from_qualifier(dst)?;
    Some(TeFlowKey::new(src_port, dst_prefix))
}

fn desired_redirect(state: &TeFlowEntryState) -> Option<BTreeSet<EgressPath>> {
    state.enabled.then(|| egress_paths(&state.next_hops))
}

fn desired_stat(state: &TeFlowEntryState) -> HalResult<Option<&str>> {
    if !resolve_stat_enabled(state) {
        return Ok(None);
    }
    match &state.counter_id {
        Some(counter) => Ok(Some(counter.as_str())),
        None => Err(HalError::InvalidConfig(format!(
            "teflow {} has stats enabled but no counter id",
            state.flow
        ))),
    }
}

#[derive(Debug)]
pub struct TeFlowEntry {
    ctx: Arc<HwContext>,
    state: Arc<TeFlowEntryState>,
    handle: Owned<FieldEntryKind>,
    redirect: Option<(BTreeSet<EgressPath>, EgressId)>,
    stat: Option<(String, TeFlowStatHandle)>,
}

impl TeFlowEntry {
    pub fn new(
        ctx: Arc<HwContext>,
        state: Arc<TeFlowEntryState>,
        stats: &mut TeFlowStatTable,
        deps: &mut TeFlowDeps<'_>,
    ) -> HalResult<Self> {
        desired_stat(&state)?;
        match deps.cache.find_teflow(&state.flow) {
            Some(handle) => Self::adopt(ctx, state, handle, stats, deps),
            None => Self::create(ctx, state, stats, deps),
        }
    }

    fn create(
        ctx: Arc<HwContext>,
        state: Arc<TeFlowEntryState>,
        stats: &mut TeFlowStatTable,
        deps: &mut TeFlowDeps<'_>,
    ) -> HalResult<Self> {
        let sdk = ctx.sdk();
        let handle = sdk
            .entry_create(ctx.config().teflow_group_id)
            .map_err(|e| HalError::from_bcm("teflow entry", e))?;
        let mut entry = Self {
            handle: Owned::new(ctx.clone(), handle, "teflow entry", |sdk, h| sdk.entry_destroy(h)),
            ctx: ctx.clone(),
            state: state.clone(),
            redirect: None,
            stat: None,
        };

        let programmed = (|| {
            let hw = |e| HalError::from_bcm("teflow entry", e);
            sdk.qualify(
                handle,
                Qualifier::new(QualifierField::SrcPort, src_port_qualifier(&state.flow)),
            )
            .map_err(hw)?;
            sdk.qualify(
                handle,
                Qualifier::new(
                    QualifierField::DstIp6,
                    ip_prefix_qualifier(&state.flow.dst_prefix),
                ),
            )
            .map_err(hw)?;
            entry.reconcile(&state, stats, deps)?;
            sdk.entry_install(handle).map_err(hw)
        })();

        if let Err(e) = programmed {
            warn_log!(SOURCE, flow = %state.flow, "failed to program teflow: {}", e);
            entry.release(stats, deps);
            return Err(e);
        }
        audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "create")
            .with_outcome(AuditOutcome::Success)
            .with_object_type("teflow_entry")
            .with_object_id(format!("{} ({})", handle, state.flow)));
        Ok(entry)
    }

    fn adopt(
        ctx: Arc<HwContext>,
        state: Arc<TeFlowEntryState>,
        handle: TeFlowEntryHandle,
        stats: &mut TeFlowStatTable,
        deps: &mut TeFlowDeps<'_>,
    ) -> HalResult<Self> {
        debug_log!(SOURCE, flow = %state.flow, handle = %handle, "found teflow in warm boot cache");
        let sdk = ctx.sdk();

        let redirect = match desired_redirect(&state) {
            Some(paths) => {
                let egress = deps.next_hops.inc_ref_or_create(&paths, deps.cache)?;
                Some((paths, egress))
            }
            None => None,
        };
        let hw_redirect = check_fatal(
            SOURCE,
            sdk.actions_get(handle),
            format_args!("failed to read actions of teflow entry {}", handle),
        )
        .into_iter()
        .find_map(|action| match action {
            FieldAction::L3Switch(egress) => Some(egress),
            _ => None,
        });
        if hw_redirect != redirect.as_ref().map(|(_, egress)| *egress) {
            fatal(
                SOURCE,
                format!(
                    "teflow {} redirects to {:?} in hardware, expected {:?}",
                    state.flow,
                    hw_redirect,
                    redirect.as_ref().map(|(_, egress)| *egress)
                ),
            );
        }
        deps.cache.programmed_teflow(&state.flow);

        let mut entry = Self {
            handle: Owned::new(ctx.clone(), handle, "teflow entry", |sdk, h| sdk.entry_destroy(h)),
            ctx,
            state: state.clone(),
            redirect,
            stat: None,
        };

        let claimed = (|| {
            if let (Some(counter), Some((stat, _))) =
                (desired_stat(&state)?, deps.cache.find_teflow_stat(handle))
            {
                let stat = stats.inc_ref_or_adopt(counter, stat, deps.stat_access)?;
                deps.cache.programmed_teflow_stat(handle);
                entry.stat = Some((counter.to_string(), stat));
            }
            // Anything still missing, such as a counter enabled while the
            // agent was down, is programmed now.
            if entry.reconcile(&state, stats, deps)? {
                entry.install()?;
            }
            Ok::<_, HalError>(())
        })();
        if let Err(e) = claimed {
            entry.release(stats, deps);
            return Err(e);
        }
        Ok(entry)
    }

    /// Applies a changed state to the same hardware entry.
    pub fn update(
        &mut self,
        state: Arc<TeFlowEntryState>,
        stats: &mut TeFlowStatTable,
        deps: &mut TeFlowDeps<'_>,
    ) -> HalResult<()> {
        desired_stat(&state)?;
        let applied = self
            .reconcile(&state, stats, deps)
            .and_then(|_| self.install());
        if let Err(e) = applied {
            // Put back what the old state asked for so the entry matches
            // the state it is still filed under.
            let old = self.state.clone();
            if let Err(restore) = self
                .reconcile(&old, stats, deps)
                .and_then(|_| self.install())
            {
                fatal(
                    SOURCE,
                    format!("failed to restore teflow {} after {}: {}", old.flow, e, restore),
                );
            }
            return Err(e);
        }
        debug_log!(
            SOURCE,
            flow = %state.flow,
            enabled = state.enabled,
            stat = self.stat.is_some(),
            "updated teflow"
        );
        self.state = state;
        Ok(())
    }

    fn install(&self) -> HalResult<()> {
        self.ctx
            .sdk()
            .entry_install(self.handle.handle())
            .map_err(|e| HalError::from_bcm("teflow entry", e))
    }

    /// Moves the redirect and counter toward `state`. Returns whether
    /// anything changed.
    ///
    /// Removals go first: the redirect of a disabled entry, then a counter
    /// that is disabled or renamed. Then the redirect is replaced and the
    /// counter created.
    fn reconcile(
        &mut self,
        state: &TeFlowEntryState,
        stats: &mut TeFlowStatTable,
        deps: &mut TeFlowDeps<'_>,
    ) -> HalResult<bool> {
        let redirect = desired_redirect(state);
        let counter = desired_stat(state)?;
        let mut changed = false;

        if redirect.is_none() && self.redirect.is_some() {
            self.remove_redirect(deps)?;
            changed = true;
        }
        if self.stat.as_ref().map(|(name, _)| name.as_str()) != counter && self.stat.is_some() {
            self.remove_stat(stats, deps)?;
            changed = true;
        }
        if let Some(paths) = redirect {
            if self.redirect.as_ref().map(|(p, _)| p) != Some(&paths) {
                self.remove_redirect(deps)?;
                self.add_redirect(paths, deps)?;
                changed = true;
            }
        }
        if let Some(counter) = counter {
            if self.stat.is_none() {
                self.add_stat(counter, stats, deps)?;
                changed = true;
            }
        }
        Ok(changed)
    }

    fn add_redirect(&mut self, paths: BTreeSet<EgressPath>, deps: &mut TeFlowDeps<'_>) -> HalResult<()> {
        let egress = deps.next_hops.inc_ref_or_create(&paths, deps.cache)?;
        if let Err(e) = self
            .ctx
            .sdk()
            .action_add(self.handle.handle(), FieldAction::L3Switch(egress))
        {
            deps.next_hops.deref(&paths)?;
            return Err(HalError::from_bcm("teflow redirect", e));
        }
        self.redirect = Some((paths, egress));
        Ok(())
    }

    fn remove_redirect(&mut self, deps: &mut TeFlowDeps<'_>) -> HalResult<()> {
        if let Some((paths, egress)) = self.redirect.take() {
            check_fatal(
                SOURCE,
                self.ctx
                    .sdk()
                    .action_delete(self.handle.handle(), FieldAction::L3Switch(egress)),
                format_args!("failed to remove redirect of teflow {}", self.state.flow),
            );
            deps.next_hops.deref(&paths)?;
        }
        Ok(())
    }

    fn add_stat(
        &mut self,
        counter: &str,
        stats: &mut TeFlowStatTable,
        deps: &mut TeFlowDeps<'_>,
    ) -> HalResult<()> {
        let stat = stats.inc_ref_or_create(counter, deps.stat_access)?;
        if let Err(e) = self.ctx.sdk().flexctr_attach(
            self.handle.handle(),
            stat,
            DEFAULT_COUNTER_ACTION_INDEX,
        ) {
            stats.deref(counter, deps.stat_access)?;
            return Err(HalError::from_bcm("teflow stat", e));
        }
        self.stat = Some((counter.to_string(), stat));
        Ok(())
    }

    fn remove_stat(&mut self, stats: &mut TeFlowStatTable, deps: &mut TeFlowDeps<'_>) -> HalResult<()> {
        if let Some((counter, stat)) = self.stat.take() {
            check_fatal(
                SOURCE,
                self.ctx.sdk().flexctr_detach(self.handle.handle(), stat),
                format_args!("failed to detach stat {} from teflow {}", stat, self.state.flow),
            );
            stats.deref(&counter, deps.stat_access)?;
        }
        Ok(())
    }

    /// Releases the counter and redirect, then the entry.
    pub fn remove(self, stats: &mut TeFlowStatTable, deps: &mut TeFlowDeps<'_>) {
        let flow = self.state.flow;
        self.release(stats, deps);
        debug_log!(SOURCE, flow = %flow, "removed teflow");
    }

    fn release(mut self, stats: &mut TeFlowStatTable, deps: &mut TeFlowDeps<'_>) {
        if let Err(e) = self.remove_stat(stats, deps) {
            fatal(SOURCE, format!("failed to release stat of {}: {}", self.state.flow, e));
        }
        let redirect = self.redirect.take();
        if let Some((_, egress)) = &redirect {
            check_fatal(
                SOURCE,
                self.ctx
                    .sdk()
                    .action_delete(self.handle.handle(), FieldAction::L3Switch(*egress)),
                format_args!("failed to remove redirect of teflow {}", self.state.flow),
            );
        }
        let flow = self.state.flow;
        drop(self);
        if let Some((paths, _)) = redirect {
            if let Err(e) = deps.next_hops.deref(&paths) {
                fatal(SOURCE, format!("failed to release redirect of {}: {}", flow, e));
            }
        }
    }

    pub fn state(&self) -> &Arc<TeFlowEntryState> {
        &self.state
    }

    pub fn handle(&self) -> TeFlowEntryHandle {
        self.handle.handle()
    }

    pub fn redirect_egress(&self) -> Option<EgressId> {
        self.redirect.as_ref().map(|(_, egress)| *egress)
    }

    pub fn stat_handle(&self) -> Option<TeFlowStatHandle> {
        self.stat.as_ref().map(|(_, stat)| *stat)
    }
}

impl Drop for TeFlowEntry {
    /// Detaches the counter of an entry dropped along with its tables.
    fn drop(&mut self) {
        if self.ctx.is_exiting() || std::thread::panicking() {
            return;
        }
        if let Some((_, stat)) = self.stat.take() {
            let entry = self.handle.handle();
            check_fatal(
                SOURCE,
                self.ctx.sdk().flexctr_detach(entry, stat),
                format_args!("failed to detach stat {} from teflow entry {}", stat, entry),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::IpPrefix;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_flow_key_round_trip_through_qualifiers() {
        let key = TeFlowKey::new(
            7,
            IpPrefix::new(IpAddr::V6(Ipv6Addr::new(0x100, 0, 0, 0, 0, 0, 0, 0)), 64),
        );
        let src = src_port_qualifier(&key);
        let dst = ip_prefix_qualifier(&key.dst_prefix);
        assert_eq!(flow_key_from_hw(src, dst), Some(key));
    }

    #[test]
    fn test_flow_key_needs_both_qualifiers() {
        let prefix = IpPrefix::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 24);
        let key = TeFlowKey::new(1, prefix);
        assert_eq!(
            flow_key_from_hw(QualifierData::UNSET, ip_prefix_qualifier(&prefix)),
            None
        );
        assert_eq!(
            flow_key_from_hw(src_port_qualifier(&key), QualifierData::UNSET),
            None
        );
    }

    #[test]
    fn test_stat_needs_counter_id() {
        let prefix = IpPrefix::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 24);
        let state = TeFlowEntryState {
            stat_enabled: Some(true),
            ..TeFlowEntryState::new(TeFlowKey::new(1, prefix))
        };
        assert!(matches!(desired_stat(&state), Err(HalError::InvalidConfig(_))));
    }
}
