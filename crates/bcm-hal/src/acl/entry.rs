//! One ACL entry.
//!
//! An entry is never patched in place: a changed ACL is torn down and
//! created again. Construction either adopts the entry the previous run left
//! at the same priority, after checking it matches the state field by field,
//! or programs a new one. Teardown releases what the entry borrows before
//! the entry itself goes: mirror actions, then the stat, then the entry,
//! then ranges and the redirect egress.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bcm_sdk::api::{EgressPath, FieldAction, Qualifier, QualifierField, RangeKind, RangeSpec};
use bcm_sdk::{AclEntryHandle, AclRangeHandle, AclStatHandle, EgressId, FieldEntryKind};

use super::qualifiers::{expected_qualifiers, qualifier_matches, range_specs};
use super::range::AclRangeTable;
use super::stat::AclStatTable;
use super::sw_priority_to_hw;
use super::table::AclDeps;
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::error::{check_fatal, fatal, HalError, HalResult};
use crate::hw::{HwContext, Owned};
use crate::nexthop::egress_paths;
use crate::state::{AclActionType, AclEntryState, MirrorAction, MirrorDirection};
use crate::{audit_log, debug_log, warn_log};

const SOURCE: &str = "AclEntry";

/// Actions `acl` programs, mirrors excepted.
pub fn expected_actions(acl: &AclEntryState, redirect: Option<EgressId>) -> Vec<FieldAction> {
    let mut actions = Vec::new();
    if acl.action_type == AclActionType::Deny {
        actions.push(FieldAction::Drop);
    }
    if let Some(action) = &acl.action {
        if let Some(queue) = action.send_to_queue {
            if queue.to_cpu {
                actions.push(FieldAction::CosQCpuNew(queue.queue_id));
                actions.push(FieldAction::CopyToCpu);
            } else {
                actions.push(FieldAction::CosQNew(queue.queue_id));
            }
        }
        if let Some(dscp) = action.set_dscp {
            actions.push(FieldAction::DscpNew(dscp));
        }
    }
    if let Some(egress) = redirect {
        actions.push(FieldAction::L3Switch(egress));
    }
    actions
}

fn is_mirror_action(action: &FieldAction) -> bool {
    matches!(
        action,
        FieldAction::MirrorIngress(_) | FieldAction::MirrorEgress(_)
    )
}

fn mirror_uses(acl: &AclEntryState) -> Vec<(String, MirrorDirection)> {
    let mut uses = Vec::new();
    if let Some(mirror) = acl.ingress_mirror() {
        uses.push((mirror.to_string(), MirrorDirection::Ingress));
    }
    if let Some(mirror) = acl.egress_mirror() {
        uses.push((mirror.to_string(), MirrorDirection::Egress));
    }
    uses
}

#[derive(Debug)]
struct AttachedStat {
    name: String,
    handle: AclStatHandle,
}

/// Ranges and redirect egress an entry references.
#[derive(Debug, Default)]
struct SharedRefs {
    ranges: BTreeMap<RangeKind, (RangeSpec, AclRangeHandle)>,
    redirect: Option<(BTreeSet<EgressPath>, EgressId)>,
}

impl SharedRefs {
    fn acquire(
        acl: &AclEntryState,
        ranges: &mut AclRangeTable,
        deps: &mut AclDeps<'_>,
    ) -> HalResult<Self> {
        let mut refs = SharedRefs::default();
        let acquired = (|| {
            for spec in range_specs(acl) {
                let handle = ranges.inc_ref_or_create(&spec, deps.cache)?;
                refs.ranges.insert(spec.kind, (spec, handle));
            }
            if let Some(redirect) = acl.redirect() {
                let paths = egress_paths(&redirect.next_hops);
                let egress = deps.next_hops.inc_ref_or_create(&paths, deps.cache)?;
                refs.redirect = Some((paths, egress));
            }
            Ok::<_, HalError>(())
        })();
        match acquired {
            Ok(()) => Ok(refs),
            Err(e) => {
                refs.release(ranges, deps);
                Err(e)
            }
        }
    }

    fn range_handles(&self) -> BTreeMap<RangeKind, AclRangeHandle> {
        self.ranges
            .iter()
            .map(|(kind, (_, handle))| (*kind, *handle))
            .collect()
    }

    fn redirect_egress(&self) -> Option<EgressId> {
        self.redirect.as_ref().map(|(_, egress)| *egress)
    }

    fn release(self, ranges: &mut AclRangeTable, deps: &mut AclDeps<'_>) {
        for (spec, _) in self.ranges.values() {
            if let Err(e) = ranges.deref(spec) {
                fatal(SOURCE, format!("failed to release range {:?}: {}", spec, e));
            }
        }
        if let Some((paths, _)) = &self.redirect {
            if let Err(e) = deps.next_hops.deref(paths) {
                fatal(SOURCE, format!("failed to release redirect next hop: {}", e));
            }
        }
    }
}

#[derive(Debug)]
pub struct AclEntry {
    ctx: Arc<HwContext>,
    state: Arc<AclEntryState>,
    handle: Owned<FieldEntryKind>,
    refs: SharedRefs,
    stat: Option<AttachedStat>,
    mirrors: Vec<(String, MirrorDirection)>,
}

impl AclEntry {
    /// Adopts the entry left at the same priority by the previous run, or
    /// programs a new one. A failure leaves nothing allocated.
    pub fn new(
        ctx: Arc<HwContext>,
        state: Arc<AclEntryState>,
        stats: &mut AclStatTable,
        ranges: &mut AclRangeTable,
        deps: &mut AclDeps<'_>,
    ) -> HalResult<Self> {
        let refs = SharedRefs::acquire(&state, ranges, deps)?;

        match deps.cache.find_acl(state.priority) {
            Some(handle) => Self::adopt(ctx, state, handle, refs, stats, ranges, deps),
            None => Self::create(ctx, state, refs, stats, ranges, deps),
        }
    }

    fn create(
        ctx: Arc<HwContext>,
        state: Arc<AclEntryState>,
        refs: SharedRefs,
        stats: &mut AclStatTable,
        ranges: &mut AclRangeTable,
        deps: &mut AclDeps<'_>,
    ) -> HalResult<Self> {
        let handle = match ctx.sdk().entry_create(ctx.config().acl_group_id) {
            Ok(handle) => handle,
            Err(e) => {
                refs.release(ranges, deps);
                return Err(HalError::from_bcm("acl entry", e));
            }
        };
        let mut entry = Self {
            handle: Owned::new(ctx.clone(), handle, "acl entry", |sdk, h| sdk.entry_destroy(h)),
            ctx,
            state,
            refs,
            stat: None,
            mirrors: Vec::new(),
        };
        if let Err(e) = entry.program(stats, deps) {
            warn_log!(
                SOURCE,
                priority = entry.state.priority,
                "failed to program acl {}: {}",
                entry.state.name,
                e
            );
            entry.release(stats, ranges, deps);
            return Err(e);
        }
        audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "create")
            .with_outcome(AuditOutcome::Success)
            .with_object_type("acl_entry")
            .with_object_id(format!("{} ({})", handle, entry.state.name)));
        Ok(entry)
    }

    /// Qualifiers first, then actions, the stat and priority; the entry is
    /// installed before it is enabled and mirrored.
    fn program(&mut self, stats: &mut AclStatTable, deps: &mut AclDeps<'_>) -> HalResult<()> {
        let sdk = self.ctx.sdk();
        let handle = self.handle.handle();
        let hw = |e| HalError::from_bcm("acl entry", e);

        for (field, value) in expected_qualifiers(&self.state, &self.refs.range_handles()) {
            sdk.qualify(handle, Qualifier::new(field, value)).map_err(hw)?;
        }
        for action in expected_actions(&self.state, self.refs.redirect_egress()) {
            sdk.action_add(handle, action).map_err(hw)?;
        }
        if let Some(counter) = self.state.traffic_counter() {
            let stat = stats.inc_ref_or_create(
                &counter.name,
                &counter.types,
                deps.cache,
                deps.stat_access,
            )?;
            if let Err(e) = sdk.stat_attach(handle, stat) {
                stats.deref(&counter.name, deps.stat_access)?;
                return Err(HalError::from_bcm("acl stat", e));
            }
            self.stat = Some(AttachedStat {
                name: counter.name.clone(),
                handle: stat,
            });
        }
        sdk.entry_prio_set(handle, sw_priority_to_hw(self.state.priority))
            .map_err(hw)?;
        sdk.entry_install(handle).map_err(hw)?;
        sdk.entry_enable_set(handle, self.state.is_enabled())
            .map_err(hw)?;
        self.start_mirrors(deps)
    }

    fn adopt(
        ctx: Arc<HwContext>,
        state: Arc<AclEntryState>,
        handle: AclEntryHandle,
        refs: SharedRefs,
        stats: &mut AclStatTable,
        ranges: &mut AclRangeTable,
        deps: &mut AclDeps<'_>,
    ) -> HalResult<Self> {
        debug_log!(
            SOURCE,
            priority = state.priority,
            handle = %handle,
            "found acl {} in warm boot cache",
            state.name
        );
        if !is_state_same(&ctx, handle, &state, &refs) {
            fatal(
                SOURCE,
                format!(
                    "acl {} at priority {} does not match entry {} in hardware",
                    state.name, state.priority, handle
                ),
            );
        }
        deps.cache.programmed_acl(state.priority);

        let mut entry = Self {
            handle: Owned::new(ctx.clone(), handle, "acl entry", |sdk, h| sdk.entry_destroy(h)),
            ctx,
            state,
            refs,
            stat: None,
            mirrors: Vec::new(),
        };
        if let Err(e) = entry.claim(stats, deps) {
            entry.release(stats, ranges, deps);
            return Err(e);
        }
        Ok(entry)
    }

    /// Takes over the stat and mirror actions of an adopted entry.
    fn claim(&mut self, stats: &mut AclStatTable, deps: &mut AclDeps<'_>) -> HalResult<()> {
        let handle = self.handle.handle();
        if let Some(counter) = self.state.traffic_counter() {
            let Some(existing) = deps.cache.find_acl_stat(handle) else {
                fatal(
                    SOURCE,
                    format!("acl entry {} has no unclaimed stat for {}", handle, counter.name),
                );
            };
            let taken = stats
                .holder(existing)
                .is_some_and(|other| other != counter.name);
            let stat = if taken {
                // Another counter already adopted this stat by name, so the
                // entry moves to a stat of its own.
                debug_log!(
                    SOURCE,
                    handle = %handle,
                    stat = %existing,
                    "acl {} gives up its stat for {}",
                    self.state.name,
                    counter.name
                );
                check_fatal(
                    SOURCE,
                    self.ctx.sdk().stat_detach(handle, existing),
                    format_args!("failed to detach stat {} from acl entry {}", existing, handle),
                );
                deps.cache.programmed_acl_stat(handle);
                let stat = stats.inc_ref_or_create(
                    &counter.name,
                    &counter.types,
                    deps.cache,
                    deps.stat_access,
                )?;
                if let Err(e) = self.ctx.sdk().stat_attach(handle, stat) {
                    stats.deref(&counter.name, deps.stat_access)?;
                    return Err(HalError::from_bcm("acl stat", e));
                }
                stat
            } else {
                let stat = stats.inc_ref_or_adopt(
                    &counter.name,
                    &counter.types,
                    existing,
                    deps.stat_access,
                )?;
                deps.cache.programmed_acl_stat(handle);
                stat
            };
            self.stat = Some(AttachedStat {
                name: counter.name.clone(),
                handle: stat,
            });
        }
        self.start_mirrors(deps)
    }

    fn start_mirrors(&mut self, deps: &mut AclDeps<'_>) -> HalResult<()> {
        let handle = self.handle.handle();
        for (mirror, direction) in mirror_uses(&self.state) {
            deps.mirrors.apply_acl_mirror_action(
                &mirror,
                handle,
                MirrorAction::Start,
                direction,
                deps.cache,
            )?;
            self.mirrors.push((mirror, direction));
        }
        Ok(())
    }

    /// Releases the entry: mirror actions, stat, entry, ranges, redirect.
    pub fn remove(self, stats: &mut AclStatTable, ranges: &mut AclRangeTable, deps: &mut AclDeps<'_>) {
        let name = self.state.name.clone();
        let handle = self.handle.handle();
        self.release(stats, ranges, deps);
        debug_log!(SOURCE, handle = %handle, "removed acl {}", name);
    }

    fn release(mut self, stats: &mut AclStatTable, ranges: &mut AclRangeTable, deps: &mut AclDeps<'_>) {
        let entry = self.handle.handle();

        for (mirror, direction) in std::mem::take(&mut self.mirrors).iter().rev() {
            if let Err(e) = deps.mirrors.apply_acl_mirror_action(
                mirror,
                entry,
                MirrorAction::Stop,
                *direction,
                deps.cache,
            ) {
                fatal(SOURCE, format!("failed to stop mirror {} on {}: {}", mirror, entry, e));
            }
        }
        if let Some(stat) = self.stat.take() {
            check_fatal(
                SOURCE,
                self.ctx.sdk().stat_detach(entry, stat.handle),
                format_args!("failed to detach stat {} from acl entry {}", stat.handle, entry),
            );
            if let Err(e) = stats.deref(&stat.name, deps.stat_access) {
                fatal(SOURCE, format!("failed to release stat {}: {}", stat.name, e));
            }
        }
        let refs = std::mem::take(&mut self.refs);
        drop(self);
        refs.release(ranges, deps);
    }

    pub fn state(&self) -> &Arc<AclEntryState> {
        &self.state
    }

    pub fn handle(&self) -> AclEntryHandle {
        self.handle.handle()
    }

    pub fn priority(&self) -> i32 {
        self.state.priority
    }

    pub fn stat_handle(&self) -> Option<AclStatHandle> {
        self.stat.as_ref().map(|s| s.handle)
    }

    pub fn redirect_egress(&self) -> Option<EgressId> {
        self.refs.redirect_egress()
    }

    /// Mirrors this entry has started, with their direction.
    pub fn mirror_uses(&self) -> &[(String, MirrorDirection)] {
        &self.mirrors
    }
}

impl Drop for AclEntry {
    /// An entry dropped without [`AclEntry::remove`] goes with its tables.
    /// Its stat still has to come off before the entry handle is destroyed.
    fn drop(&mut self) {
        if self.ctx.is_exiting() || std::thread::panicking() {
            return;
        }
        if let Some(stat) = self.stat.take() {
            let entry = self.handle.handle();
            check_fatal(
                SOURCE,
                self.ctx.sdk().stat_detach(entry, stat.handle),
                format_args!("failed to detach stat {} from acl entry {}", stat.handle, entry),
            );
        }
    }
}

/// Reads the adopted entry back and compares it with what `state` would
/// have programmed. Mirror actions are left to the mirrors to claim.
fn is_state_same(
    ctx: &HwContext,
    handle: AclEntryHandle,
    state: &AclEntryState,
    refs: &SharedRefs,
) -> bool {
    let sdk = ctx.sdk();
    let read = |what: &str| format!("failed to read {} of acl entry {}", what, handle);

    let enabled = check_fatal(SOURCE, sdk.entry_enable_get(handle), read("enable"));
    if enabled != state.is_enabled() {
        warn_log!(SOURCE, handle = %handle, "enable mismatch: hw {}", enabled);
        return false;
    }
    let priority = check_fatal(SOURCE, sdk.entry_prio_get(handle), read("priority"));
    if priority != sw_priority_to_hw(state.priority) {
        warn_log!(SOURCE, handle = %handle, "priority mismatch: hw {}", priority);
        return false;
    }

    let expected = expected_qualifiers(state, &refs.range_handles());
    for field in QualifierField::ALL {
        let hw = check_fatal(SOURCE, sdk.qualifier_get(handle, field), read("qualifier"));
        if !qualifier_matches(field, hw, expected.get(&field)) {
            warn_log!(
                SOURCE,
                handle = %handle,
                "qualifier {:?} mismatch: hw {:?}, sw {:?}",
                field,
                hw,
                expected.get(&field)
            );
            return false;
        }
    }

    let mut hw_actions: Vec<_> = check_fatal(SOURCE, sdk.actions_get(handle), read("actions"))
        .into_iter()
        .filter(|a| !is_mirror_action(a))
        .collect();
    let mut sw_actions = expected_actions(state, refs.redirect_egress());
    hw_actions.sort();
    sw_actions.sort();
    if hw_actions != sw_actions {
        warn_log!(
            SOURCE,
            handle = %handle,
            "action mismatch: hw {:?}, sw {:?}",
            hw_actions,
            sw_actions
        );
        return false;
    }

    let hw_stat = check_fatal(SOURCE, sdk.entry_stat_get(handle), read("stat"));
    match (hw_stat, state.traffic_counter()) {
        (None, None) => true,
        (Some(stat), Some(counter)) => {
            let types = check_fatal(SOURCE, sdk.stat_config_get(stat), read("stat config"));
            let same = ctx
                .config()
                .asic
                .stat_equivalence()
                .matches(&types, &counter.types);
            if !same {
                warn_log!(
                    SOURCE,
                    handle = %handle,
                    "stat {} counters {:?} do not match {:?}",
                    stat,
                    types,
                    counter.types
                );
            }
            same
        }
        (hw_stat, sw_counter) => {
            warn_log!(
                SOURCE,
                handle = %handle,
                "stat mismatch: hw {:?}, sw {:?}",
                hw_stat,
                sw_counter.map(|c| &c.name)
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MatchAction, SendToQueue};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expected_actions_for_cpu_queue() {
        let acl = AclEntryState {
            action_type: AclActionType::Deny,
            action: Some(MatchAction {
                send_to_queue: Some(SendToQueue {
                    queue_id: 3,
                    to_cpu: true,
                }),
                set_dscp: Some(10),
                ..Default::default()
            }),
            ..AclEntryState::new("acl0", 1)
        };
        assert_eq!(
            expected_actions(&acl, None),
            vec![
                FieldAction::Drop,
                FieldAction::CosQCpuNew(3),
                FieldAction::CopyToCpu,
                FieldAction::DscpNew(10),
            ]
        );
    }

    #[test]
    fn test_expected_actions_for_redirect() {
        let acl = AclEntryState::new("acl0", 1);
        let egress = EgressId::from_raw_unchecked(100_002);
        assert_eq!(
            expected_actions(&acl, Some(egress)),
            vec![FieldAction::L3Switch(egress)]
        );
        assert!(expected_actions(&acl, None).is_empty());
    }
}
