//! Warm-boot cache.
//!
//! Populated once at startup by traversing every hardware table the agent
//! programs, the cache maps the software identity of each object found to its
//! SDK handle. Feature objects created afterwards look themselves up here and
//! adopt what they find, erasing the entry (`programmed_*`). Whatever is left
//! once the initial state has been applied has no owner and is destroyed by
//! [`WarmBootCache::clear`].
//!
//! Claiming an entry twice is a consistency violation and fatal.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bcm_sdk::api::mirror::MIRROR_DEST_TUNNEL_SFLOW;
use bcm_sdk::api::{
    CounterActionIndex, EgressPath, FieldAction, FieldEntrySnapshot, QualifierField, RangeSpec,
    TunnelConfig,
};
use bcm_sdk::{
    AclEntryHandle, AclRangeHandle, AclStatHandle, EgressId, Gport, MirrorHandle,
    TeFlowEntryHandle, TeFlowStatHandle,
};
use serde::Serialize;

use super::state::{AclStatRecord, TeFlowGroupState, WarmBootState};
use crate::acl::hw_priority_to_sw;
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::error::{check_fatal, fatal, HalResult};
use crate::hw::HwContext;
use crate::state::{MirrorDirection, TeFlowKey};
use crate::teflow::flow_key_from_hw;
use crate::{audit_log, debug_log, info_log, warn_log};

const SOURCE: &str = "WarmBootCache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclStatStatus {
    pub stat: AclStatHandle,
    pub claimed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeFlowStatStatus {
    pub stat: TeFlowStatHandle,
    pub action_index: CounterActionIndex,
    pub claimed: bool,
}

/// Unclaimed objects removed by [`WarmBootCache::clear`], per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub acl_stats_detached: usize,
    pub acl_stats_destroyed: usize,
    pub acl_entries: usize,
    pub acl_ranges: usize,
    pub teflow_stats: usize,
    pub teflow_entries: usize,
    pub mirrored_acls: usize,
    pub mirrored_ports: usize,
    pub mirrors: usize,
    pub egresses: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.acl_stats_detached
            + self.acl_stats_destroyed
            + self.acl_entries
            + self.acl_ranges
            + self.teflow_stats
            + self.teflow_entries
            + self.mirrored_acls
            + self.mirrored_ports
            + self.mirrors
            + self.egresses
    }
}

pub struct WarmBootCache {
    ctx: Arc<HwContext>,
    wb_state: Option<WarmBootState>,
    populated: bool,

    priority_to_acl: BTreeMap<i32, AclEntryHandle>,
    acl_to_stat: BTreeMap<AclEntryHandle, AclStatStatus>,
    named_stats: BTreeMap<String, AclStatHandle>,
    ranges: BTreeMap<RangeSpec, AclRangeHandle>,

    mirrors: BTreeMap<(Gport, Option<TunnelConfig>), MirrorHandle>,
    mirror_flags: BTreeMap<MirrorHandle, u32>,
    mirrored_ports: BTreeMap<(Gport, u32), MirrorHandle>,
    mirrored_acls: BTreeMap<(AclEntryHandle, MirrorDirection), MirrorHandle>,

    teflows: BTreeMap<TeFlowKey, TeFlowEntryHandle>,
    teflow_stats: BTreeMap<TeFlowEntryHandle, TeFlowStatStatus>,

    egresses: BTreeMap<BTreeSet<EgressPath>, EgressId>,
}

impl WarmBootCache {
    pub fn new(ctx: Arc<HwContext>) -> Self {
        Self {
            ctx,
            wb_state: None,
            populated: false,
            priority_to_acl: BTreeMap::new(),
            acl_to_stat: BTreeMap::new(),
            named_stats: BTreeMap::new(),
            ranges: BTreeMap::new(),
            mirrors: BTreeMap::new(),
            mirror_flags: BTreeMap::new(),
            mirrored_ports: BTreeMap::new(),
            mirrored_acls: BTreeMap::new(),
            teflows: BTreeMap::new(),
            teflow_stats: BTreeMap::new(),
            egresses: BTreeMap::new(),
        }
    }

    /// Traverses the hardware tables. Runs once, before any feature object
    /// exists.
    pub fn populate(&mut self, wb_state: Option<WarmBootState>) -> HalResult<()> {
        if self.populated {
            fatal(SOURCE, "warm boot cache populated twice");
        }
        self.wb_state = wb_state;

        self.populate_acls()?;
        self.populate_ranges()?;
        self.populate_teflows()?;
        self.populate_mirrors()?;
        self.populate_egresses()?;
        self.populated = true;

        info_log!(
            SOURCE,
            acls = self.priority_to_acl.len(),
            acl_stats = self.acl_to_stat.len(),
            ranges = self.ranges.len(),
            teflows = self.teflows.len(),
            mirrors = self.mirrors.len(),
            mirrored_ports = self.mirrored_ports.len(),
            mirrored_acls = self.mirrored_acls.len(),
            egresses = self.egresses.len(),
            "populated warm boot cache"
        );
        audit_log!(AuditRecord::new(AuditCategory::WarmBoot, SOURCE, "populate")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "acls": self.priority_to_acl.len(),
                "acl_stats": self.acl_to_stat.len(),
                "teflows": self.teflows.len(),
                "mirrors": self.mirrors.len(),
                "has_warm_boot_state": self.wb_state.is_some(),
            })));
        Ok(())
    }

    fn traverse_group(&self, group: bcm_sdk::GroupId) -> HalResult<Vec<FieldEntrySnapshot>> {
        let mut entries = Vec::new();
        self.ctx
            .sdk()
            .entry_traverse(group, &mut |snapshot| entries.push(snapshot.clone()))?;
        Ok(entries)
    }

    fn populate_acls(&mut self) -> HalResult<()> {
        let sdk = self.ctx.sdk();
        for entry in self.traverse_group(self.ctx.config().acl_group_id)? {
            let priority = hw_priority_to_sw(entry.priority);
            if let Some(other) = self.priority_to_acl.insert(priority, entry.handle) {
                fatal(
                    SOURCE,
                    format!(
                        "acl entries {} and {} share priority {}",
                        other, entry.handle, priority
                    ),
                );
            }
            if let Some(stat) = sdk.entry_stat_get(entry.handle)? {
                self.acl_to_stat.insert(
                    entry.handle,
                    AclStatStatus {
                        stat,
                        claimed: false,
                    },
                );
            }
            for action in sdk.actions_get(entry.handle)? {
                match action {
                    FieldAction::MirrorIngress(mirror) => {
                        self.mirrored_acls
                            .insert((entry.handle, MirrorDirection::Ingress), mirror);
                    }
                    FieldAction::MirrorEgress(mirror) => {
                        self.mirrored_acls
                            .insert((entry.handle, MirrorDirection::Egress), mirror);
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn populate_ranges(&mut self) -> HalResult<()> {
        let mut ranges = Vec::new();
        self.ctx
            .sdk()
            .range_traverse(&mut |handle, spec| ranges.push((handle, *spec)))?;
        for (handle, spec) in ranges {
            if let Some(other) = self.ranges.insert(spec, handle) {
                fatal(
                    SOURCE,
                    format!("ranges {} and {} share {:?}", other, handle, spec),
                );
            }
        }
        Ok(())
    }

    fn populate_teflows(&mut self) -> HalResult<()> {
        let sdk = self.ctx.sdk();
        for entry in self.traverse_group(self.ctx.config().teflow_group_id)? {
            let src = sdk.qualifier_get(entry.handle, QualifierField::SrcPort)?;
            let dst = sdk.qualifier_get(entry.handle, QualifierField::DstIp6)?;
            let Some(key) = flow_key_from_hw(src, dst) else {
                fatal(
                    SOURCE,
                    format!("teflow entry {} has no flow qualifiers", entry.handle),
                );
            };
            if let Some(other) = self.teflows.insert(key, entry.handle) {
                fatal(
                    SOURCE,
                    format!("teflow entries {} and {} share {}", other, entry.handle, key),
                );
            }
            if let Some(attachment) = sdk.entry_flexctr_get(entry.handle)? {
                self.teflow_stats.insert(
                    entry.handle,
                    TeFlowStatStatus {
                        stat: attachment.stat,
                        action_index: attachment.action_index,
                        claimed: false,
                    },
                );
            }
        }
        Ok(())
    }

    fn populate_mirrors(&mut self) -> HalResult<()> {
        let sdk = self.ctx.sdk();
        let mut destinations = Vec::new();
        sdk.mirror_destination_traverse(&mut |handle, dest| {
            destinations.push((handle, dest.clone()))
        })?;
        for (handle, dest) in destinations {
            self.mirror_flags.insert(handle, dest.flags());
            if let Some(other) = self.mirrors.insert((dest.gport, dest.tunnel), handle) {
                fatal(
                    SOURCE,
                    format!("mirror destinations {} and {} share one egress path", other, handle),
                );
            }
        }

        let mut associations = Vec::new();
        sdk.mirror_port_traverse(&mut |gport, flags, dest| {
            associations.push((gport, flags, dest))
        })?;
        for (gport, flags, dest) in associations {
            self.mirrored_ports.insert((gport, flags), dest);
        }
        Ok(())
    }

    fn populate_egresses(&mut self) -> HalResult<()> {
        let mut egresses = Vec::new();
        self.ctx.sdk().egress_traverse(&mut |egress, paths| {
            egresses.push((egress, paths.iter().copied().collect::<BTreeSet<_>>()))
        })?;
        for (egress, paths) in egresses {
            self.egresses.insert(paths, egress);
        }
        Ok(())
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// The warm-boot state this boot started from.
    pub fn warm_boot_state(&self) -> Option<&WarmBootState> {
        self.wb_state.as_ref()
    }

    pub fn teflow_group_state(&self) -> Option<TeFlowGroupState> {
        self.wb_state.as_ref().and_then(|state| state.teflow)
    }

    pub fn acl_stat_record(&self, name: &str) -> Option<&AclStatRecord> {
        self.wb_state.as_ref()?.acl_stats.get(name)
    }

    /// Name a stat was created under before the restart.
    pub fn stat_name(&self, stat: AclStatHandle) -> Option<&str> {
        self.wb_state.as_ref()?.stat_name(stat)
    }

    fn claimed(&self, what: &str, key: impl std::fmt::Display, handle: impl std::fmt::Display) {
        debug_log!(SOURCE, handle = %handle, "claimed {} {}", what, key);
        audit_log!(AuditRecord::new(AuditCategory::WarmBoot, SOURCE, "claim")
            .with_outcome(AuditOutcome::Success)
            .with_object_type(what)
            .with_object_id(handle.to_string()));
    }

    // ------------------------------------------------------------------
    // ACL entries and stats
    // ------------------------------------------------------------------

    pub fn find_acl(&self, priority: i32) -> Option<AclEntryHandle> {
        self.priority_to_acl.get(&priority).copied()
    }

    pub fn programmed_acl(&mut self, priority: i32) {
        match self.priority_to_acl.remove(&priority) {
            Some(handle) => self.claimed("acl_entry", priority, handle),
            None => fatal(SOURCE, format!("acl priority {} claimed twice", priority)),
        }
    }

    /// Stat attached to `entry` before the restart, unless already claimed.
    pub fn find_acl_stat(&self, entry: AclEntryHandle) -> Option<AclStatHandle> {
        self.acl_to_stat
            .get(&entry)
            .filter(|status| !status.claimed)
            .map(|status| status.stat)
    }

    /// Marks the stat attachment of `entry` as claimed. The record stays
    /// until the sweep, which needs it to tell used stats from orphans.
    pub fn programmed_acl_stat(&mut self, entry: AclEntryHandle) {
        match self.acl_to_stat.get_mut(&entry) {
            Some(status) if !status.claimed => {
                status.claimed = true;
                let stat = status.stat;
                self.claimed("acl_stat", entry, stat);
            }
            _ => fatal(SOURCE, format!("stat of acl entry {} claimed twice", entry)),
        }
    }

    /// Stat the previous run kept under `name`, if it is still attached to
    /// an entry in hardware and has not been claimed yet, by name or by an
    /// adopted entry.
    pub fn find_acl_stat_by_name(&self, name: &str) -> Option<&AclStatRecord> {
        if self.named_stats.contains_key(name) {
            return None;
        }
        let record = self.acl_stat_record(name)?;
        let mut attached = self
            .acl_to_stat
            .values()
            .filter(|status| status.stat == record.handle)
            .peekable();
        attached.peek()?;
        if attached.any(|status| status.claimed) {
            return None;
        }
        Some(record)
    }

    /// Claims the stat named `name` for a new user. Its attachments to
    /// unclaimed entries are still detached by the sweep but the stat
    /// itself survives it.
    pub fn programmed_acl_stat_by_name(&mut self, name: &str) {
        let Some(record) = self.find_acl_stat_by_name(name) else {
            fatal(SOURCE, format!("acl stat {} claimed twice by name", name));
        };
        let handle = record.handle;
        self.named_stats.insert(name.to_string(), handle);
        self.claimed("acl_stat", name, handle);
    }

    pub fn find_range(&self, spec: &RangeSpec) -> Option<AclRangeHandle> {
        self.ranges.get(spec).copied()
    }

    pub fn programmed_range(&mut self, spec: &RangeSpec) {
        match self.ranges.remove(spec) {
            Some(handle) => self.claimed("acl_range", format!("{:?}", spec), handle),
            None => fatal(SOURCE, format!("range {:?} claimed twice", spec)),
        }
    }

    // ------------------------------------------------------------------
    // Mirrors
    // ------------------------------------------------------------------

    pub fn find_mirror(&self, gport: Gport, tunnel: &Option<TunnelConfig>) -> Option<MirrorHandle> {
        self.mirrors.get(&(gport, tunnel.clone())).copied()
    }

    pub fn programmed_mirror(&mut self, gport: Gport, tunnel: &Option<TunnelConfig>) {
        match self.mirrors.remove(&(gport, tunnel.clone())) {
            Some(handle) => {
                let kind = match tunnel {
                    Some(t) if t.udp_ports.is_some() => "sflow",
                    Some(_) => "erspan",
                    None => "span",
                };
                self.claimed("mirror_destination", format!("{} via {}", kind, gport), handle);
            }
            None => fatal(
                SOURCE,
                format!("mirror destination through {} claimed twice", gport),
            ),
        }
    }

    pub fn find_mirrored_port(&self, gport: Gport, flags: u32) -> Option<MirrorHandle> {
        self.mirrored_ports.get(&(gport, flags)).copied()
    }

    /// Claims a port mirror association. Claiming one association of an
    /// sFlow destination claims every association with the same flags.
    pub fn programmed_mirrored_port(&mut self, gport: Gport, flags: u32) {
        let Some(handle) = self.mirrored_ports.remove(&(gport, flags)) else {
            fatal(
                SOURCE,
                format!("mirrored port {} flags {:#x} claimed twice", gport, flags),
            );
        };
        if self.is_sflow_mirror(handle) {
            self.mirrored_ports
                .retain(|(_, f), h| !(*h == handle && *f == flags));
        }
        self.claimed("mirrored_port", format!("{} flags {:#x}", gport, flags), handle);
    }

    pub fn find_mirrored_acl(
        &self,
        entry: AclEntryHandle,
        direction: MirrorDirection,
    ) -> Option<MirrorHandle> {
        self.mirrored_acls.get(&(entry, direction)).copied()
    }

    pub fn programmed_mirrored_acl(&mut self, entry: AclEntryHandle, direction: MirrorDirection) {
        match self.mirrored_acls.remove(&(entry, direction)) {
            Some(handle) => {
                self.claimed("mirrored_acl", format!("{} {}", entry, direction), handle)
            }
            None => fatal(
                SOURCE,
                format!("{} mirror of acl entry {} claimed twice", direction, entry),
            ),
        }
    }

    fn is_sflow_mirror(&self, handle: MirrorHandle) -> bool {
        self.mirror_flags
            .get(&handle)
            .map(|flags| flags & MIRROR_DEST_TUNNEL_SFLOW != 0)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // TeFlow entries and stats
    // ------------------------------------------------------------------

    pub fn find_teflow(&self, key: &TeFlowKey) -> Option<TeFlowEntryHandle> {
        self.teflows.get(key).copied()
    }

    pub fn programmed_teflow(&mut self, key: &TeFlowKey) {
        match self.teflows.remove(key) {
            Some(handle) => self.claimed("teflow_entry", key, handle),
            None => fatal(SOURCE, format!("teflow {} claimed twice", key)),
        }
    }

    pub fn find_teflow_stat(
        &self,
        entry: TeFlowEntryHandle,
    ) -> Option<(TeFlowStatHandle, CounterActionIndex)> {
        self.teflow_stats
            .get(&entry)
            .filter(|status| !status.claimed)
            .map(|status| (status.stat, status.action_index))
    }

    pub fn programmed_teflow_stat(&mut self, entry: TeFlowEntryHandle) {
        match self.teflow_stats.get_mut(&entry) {
            Some(status) if !status.claimed => {
                status.claimed = true;
                let stat = status.stat;
                self.claimed("teflow_stat", entry, stat);
            }
            _ => fatal(
                SOURCE,
                format!("stat of teflow entry {} claimed twice", entry),
            ),
        }
    }

    // ------------------------------------------------------------------
    // Egresses
    // ------------------------------------------------------------------

    pub fn find_egress(&self, paths: &BTreeSet<EgressPath>) -> Option<EgressId> {
        self.egresses.get(paths).copied()
    }

    pub fn programmed_egress(&mut self, paths: &BTreeSet<EgressPath>) {
        match self.egresses.remove(paths) {
            Some(egress) => self.claimed("egress", format!("{} paths", paths.len()), egress),
            None => fatal(SOURCE, "egress claimed twice"),
        }
    }

    /// Entries not yet claimed or swept, stat records included.
    pub fn len(&self) -> usize {
        self.priority_to_acl.len()
            + self.acl_to_stat.len()
            + self.ranges.len()
            + self.mirrors.len()
            + self.mirrored_ports.len()
            + self.mirrored_acls.len()
            + self.teflows.len()
            + self.teflow_stats.len()
            + self.egresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Sweep
    // ------------------------------------------------------------------

    fn reclaimed(&self, action: &str, what: &str, id: impl std::fmt::Display) {
        info_log!(SOURCE, "{} unclaimed {} {}", action, what, id);
        audit_log!(AuditRecord::new(AuditCategory::WarmBoot, SOURCE, action)
            .with_outcome(AuditOutcome::Success)
            .with_object_type(what)
            .with_object_id(id.to_string()));
    }

    /// Removes every unclaimed object from hardware, dependents first.
    ///
    /// Stats are detached before their entries are destroyed, entries are
    /// destroyed before the ranges and egresses they use, and mirror
    /// destinations go last once no port or entry references them.
    pub fn clear(&mut self) -> SweepReport {
        let sdk = self.ctx.sdk();
        let mut report = SweepReport::default();

        // ACL stats: detach from unclaimed entries, remember stats still used
        let mut stats_used: BTreeSet<_> = self.named_stats.values().copied().collect();
        for (entry, status) in &self.acl_to_stat {
            if status.claimed {
                stats_used.insert(status.stat);
                continue;
            }
            self.reclaimed("detach", "acl_stat", format!("{} from acl entry {}", status.stat, entry));
            check_fatal(
                SOURCE,
                sdk.stat_detach(*entry, status.stat),
                format_args!("failed to detach stat {} from {}", status.stat, entry),
            );
            report.acl_stats_detached += 1;
        }
        for status in self.acl_to_stat.values() {
            if !stats_used.insert(status.stat) {
                continue;
            }
            match self.stat_name(status.stat) {
                Some(name) => self.reclaimed("destroy", "acl_stat", format!("{} ({})", status.stat, name)),
                None => self.reclaimed("destroy", "acl_stat", status.stat),
            }
            check_fatal(
                SOURCE,
                sdk.stat_destroy(status.stat),
                format_args!("failed to destroy stat {}", status.stat),
            );
            report.acl_stats_destroyed += 1;
        }
        self.acl_to_stat.clear();
        self.named_stats.clear();

        let mut destroyed_acls = BTreeSet::new();
        for (priority, entry) in std::mem::take(&mut self.priority_to_acl) {
            self.reclaimed("destroy", "acl_entry", format!("{} (priority {})", entry, priority));
            check_fatal(
                SOURCE,
                sdk.entry_destroy(entry),
                format_args!("failed to destroy acl entry {}", entry),
            );
            destroyed_acls.insert(entry);
            report.acl_entries += 1;
        }

        // TeFlow stats may be shared by counter id like ACL stats
        let mut flexctrs_used = BTreeSet::new();
        for (entry, status) in &self.teflow_stats {
            if status.claimed {
                flexctrs_used.insert(status.stat);
                continue;
            }
            self.reclaimed("detach", "teflow_stat", format!("{} from teflow entry {}", status.stat, entry));
            check_fatal(
                SOURCE,
                sdk.flexctr_detach(*entry, status.stat),
                format_args!("failed to detach flex counter {} from {}", status.stat, entry),
            );
        }
        for status in self.teflow_stats.values() {
            if !flexctrs_used.insert(status.stat) {
                continue;
            }
            self.reclaimed("destroy", "teflow_stat", status.stat);
            check_fatal(
                SOURCE,
                sdk.flexctr_destroy(status.stat),
                format_args!("failed to destroy flex counter {}", status.stat),
            );
            report.teflow_stats += 1;
        }
        self.teflow_stats.clear();

        for (key, entry) in std::mem::take(&mut self.teflows) {
            self.reclaimed("destroy", "teflow_entry", format!("{} ({})", entry, key));
            check_fatal(
                SOURCE,
                sdk.entry_destroy(entry),
                format_args!("failed to destroy teflow entry {}", entry),
            );
            report.teflow_entries += 1;
        }

        for (spec, range) in std::mem::take(&mut self.ranges) {
            self.reclaimed("destroy", "acl_range", format!("{} ({:?})", range, spec));
            check_fatal(
                SOURCE,
                sdk.range_destroy(range),
                format_args!("failed to destroy range {}", range),
            );
            report.acl_ranges += 1;
        }

        for ((entry, direction), mirror) in std::mem::take(&mut self.mirrored_acls) {
            if destroyed_acls.contains(&entry) {
                continue;
            }
            self.reclaimed("remove", "mirrored_acl", format!("{} {} mirror {}", entry, direction, mirror));
            let action = match direction {
                MirrorDirection::Ingress => FieldAction::MirrorIngress(mirror),
                MirrorDirection::Egress => FieldAction::MirrorEgress(mirror),
            };
            check_fatal(
                SOURCE,
                sdk.action_delete(entry, action),
                format_args!("failed to remove {} mirror from acl entry {}", direction, entry),
            );
            check_fatal(
                SOURCE,
                sdk.entry_install(entry),
                format_args!("failed to reinstall acl entry {}", entry),
            );
            report.mirrored_acls += 1;
        }

        for ((gport, flags), mirror) in std::mem::take(&mut self.mirrored_ports) {
            self.reclaimed("remove", "mirrored_port", format!("{} flags {:#x} mirror {}", gport, flags, mirror));
            check_fatal(
                SOURCE,
                sdk.mirror_port_dest_delete(gport, flags, mirror),
                format_args!("failed to remove port {} from mirror {}", gport, mirror),
            );
            report.mirrored_ports += 1;
        }

        for ((gport, _), mirror) in std::mem::take(&mut self.mirrors) {
            self.reclaimed("destroy", "mirror_destination", format!("{} via {}", mirror, gport));
            check_fatal(
                SOURCE,
                sdk.mirror_destination_destroy(mirror),
                format_args!("failed to destroy mirror destination {}", mirror),
            );
            report.mirrors += 1;
        }
        self.mirror_flags.clear();

        for (_, egress) in std::mem::take(&mut self.egresses) {
            self.reclaimed("destroy", "egress", egress);
            check_fatal(
                SOURCE,
                sdk.egress_destroy(egress),
                format_args!("failed to destroy egress {}", egress),
            );
            report.egresses += 1;
        }

        if report.total() > 0 {
            warn_log!(SOURCE, reclaimed = report.total(), "removed unclaimed hardware state");
        }
        audit_log!(AuditRecord::new(AuditCategory::WarmBoot, SOURCE, "clear")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::to_value(report).unwrap_or_default()));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::sw_priority_to_hw;
    use crate::config::HalConfig;
    use bcm_sdk::api::{FieldApi, StatType};
    use bcm_sdk::FakeSdk;
    use pretty_assertions::assert_eq;

    const GROUP: bcm_sdk::GroupId = 128;

    fn acl_entry(sdk: &FakeSdk, priority: i32, stat: Option<AclStatHandle>) -> AclEntryHandle {
        let entry = sdk.entry_create(GROUP).unwrap();
        sdk.entry_prio_set(entry, sw_priority_to_hw(priority)).unwrap();
        if let Some(stat) = stat {
            sdk.stat_attach(entry, stat).unwrap();
        }
        sdk.entry_install(entry).unwrap();
        entry
    }

    fn populated(sdk: &Arc<FakeSdk>) -> WarmBootCache {
        let mut cache = WarmBootCache::new(HwContext::new(sdk.clone(), HalConfig::default()));
        cache.populate(None).unwrap();
        cache
    }

    #[test]
    fn test_populate_indexes_entries_by_priority() {
        let sdk = Arc::new(FakeSdk::new());
        let stat = sdk.stat_create(GROUP, &[StatType::Packets]).unwrap();
        let entry = acl_entry(&sdk, 5, Some(stat));

        let cache = populated(&sdk);
        assert!(cache.is_populated());
        assert_eq!(cache.find_acl(5), Some(entry));
        assert_eq!(cache.find_acl(6), None);
        assert_eq!(cache.find_acl_stat(entry), Some(stat));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    #[should_panic(expected = "claimed twice")]
    fn test_double_claim_is_fatal() {
        let sdk = Arc::new(FakeSdk::new());
        acl_entry(&sdk, 5, None);
        let mut cache = populated(&sdk);
        cache.programmed_acl(5);
        cache.programmed_acl(5);
    }

    #[test]
    fn test_clear_detaches_stats_before_destroying() {
        let sdk = Arc::new(FakeSdk::new());
        let stat = sdk.stat_create(GROUP, &[StatType::Packets]).unwrap();
        acl_entry(&sdk, 5, Some(stat));
        let mut cache = populated(&sdk);

        sdk.clear_calls();
        let report = cache.clear();
        assert_eq!(sdk.ops(), vec!["stat_detach", "stat_destroy", "entry_destroy"]);
        assert_eq!(report.acl_stats_detached, 1);
        assert_eq!(report.acl_stats_destroyed, 1);
        assert_eq!(report.acl_entries, 1);
        assert_eq!(report.total(), 3);
        assert!(cache.is_empty());
        assert_eq!(sdk.entry_count(GROUP), 0);
        assert_eq!(sdk.stat_count(), 0);
    }

    #[test]
    fn test_claimed_stat_survives_sweep_of_other_user() {
        let sdk = Arc::new(FakeSdk::new());
        let stat = sdk.stat_create(GROUP, &[StatType::Packets]).unwrap();
        let kept = acl_entry(&sdk, 1, Some(stat));
        let dropped = acl_entry(&sdk, 2, Some(stat));
        let mut cache = populated(&sdk);

        cache.programmed_acl(1);
        cache.programmed_acl_stat(kept);
        assert_eq!(cache.find_acl_stat(kept), None);
        let report = cache.clear();

        assert_eq!(report.acl_stats_detached, 1);
        assert_eq!(report.acl_stats_destroyed, 0);
        assert_eq!(report.acl_entries, 1);
        assert!(sdk.stat_exists(stat));
        assert!(sdk.entry_exists(kept));
        assert!(!sdk.entry_exists(dropped));
    }

    #[test]
    fn test_clear_of_cold_boot_is_empty() {
        let sdk = Arc::new(FakeSdk::new());
        let mut cache = populated(&sdk);
        assert!(cache.is_empty());
        assert_eq!(cache.clear(), SweepReport::default());
    }
}
