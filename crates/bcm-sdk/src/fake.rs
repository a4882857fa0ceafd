//! In-memory SDK.
//!
//! `FakeSdk` implements every adapter trait against plain maps. It enforces
//! the sequencing rules of the real SDK that matter to the agent: an entry
//! cannot be destroyed while a stat is attached, a stat cannot be destroyed
//! while attached, and a mirror destination cannot be destroyed while a port
//! or an entry still references it. All of those return `BCM_E_BUSY`.
//!
//! Tests use the ordered call log to observe teardown order, `fail_next` to
//! inject failures and [`FakeLimits`] to simulate full tables. The hardware
//! contents can be dumped and restored, which lets the agent binary act out
//! a warm boot without a real ASIC.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::api::field::{
    FieldAction, FieldApi, FieldEntrySnapshot, Qualifier, QualifierData, QualifierField,
    RangeSpec, StatType,
};
use crate::api::flex_counter::{CounterActionIndex, FlexCounterApi, FlexCounterAttachment};
use crate::api::l3::{EgressPath, L3Api};
use crate::api::mirror::{MirrorApi, MirrorDestination};
use crate::error::{BcmError, BcmResult, BcmStatus};
use crate::types::{
    AclRangeHandle, AclStatHandle, EgressId, FieldEntryHandle, GroupId, Gport, MirrorHandle,
    RawHandle, TeFlowStatHandle,
};

/// Raw id of the SDK-owned drop egress.
const DROP_EGRESS_RAW: RawHandle = 100_000;
/// First id handed out for egress objects.
const FIRST_EGRESS_RAW: RawHandle = 100_002;

/// One recorded SDK call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkCall {
    pub op: &'static str,
    pub handle: RawHandle,
}

impl SdkCall {
    pub fn new(op: &'static str, handle: RawHandle) -> Self {
        Self { op, handle }
    }
}

/// Table capacities. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FakeLimits {
    pub entries: Option<usize>,
    pub stats: Option<usize>,
    pub mirrors: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FakeEntry {
    group: GroupId,
    priority: i32,
    enabled: bool,
    installed: bool,
    qualifiers: BTreeMap<QualifierField, QualifierData>,
    actions: Vec<FieldAction>,
    stat: Option<AclStatHandle>,
    flexctr: Option<FlexCounterAttachment>,
}

impl FakeEntry {
    fn new(group: GroupId) -> Self {
        Self {
            group,
            priority: 0,
            enabled: true,
            installed: false,
            qualifiers: BTreeMap::new(),
            actions: Vec::new(),
            stat: None,
            flexctr: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FakeStat {
    types: Vec<StatType>,
    attached: BTreeSet<FieldEntryHandle>,
    values: BTreeMap<StatType, u64>,
}

impl FakeStat {
    fn new(types: &[StatType]) -> Self {
        Self {
            types: types.to_vec(),
            attached: BTreeSet::new(),
            values: types.iter().map(|t| (*t, 0)).collect(),
        }
    }
}

/// Hardware contents of a [`FakeSdk`], serializable for warm boot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FakeDump {
    next_id: RawHandle,
    next_egress: RawHandle,
    entries: BTreeMap<FieldEntryHandle, FakeEntry>,
    stats: BTreeMap<AclStatHandle, FakeStat>,
    flexctrs: BTreeMap<TeFlowStatHandle, FakeStat>,
    ranges: BTreeMap<AclRangeHandle, RangeSpec>,
    mirrors: BTreeMap<MirrorHandle, MirrorDestination>,
    port_mirrors: BTreeSet<(Gport, u32, MirrorHandle)>,
    egresses: BTreeMap<EgressId, Vec<EgressPath>>,
    #[serde(default)]
    limits: FakeLimits,
}

#[derive(Debug, Default)]
struct FakeState {
    hw: FakeDump,
    calls: Vec<SdkCall>,
    failures: BTreeMap<&'static str, BcmStatus>,
}

impl FakeState {
    /// Records the call and consumes an injected failure for `op`, if any.
    fn enter(&mut self, op: &'static str, handle: RawHandle) -> BcmResult<()> {
        self.calls.push(SdkCall::new(op, handle));
        match self.failures.remove(op) {
            Some(status) => {
                log::debug!("fake sdk: injected {} for {}({})", status, op, handle);
                Err(BcmError::new(status, format!("{} injected failure", op)))
            }
            None => Ok(()),
        }
    }

    fn alloc(&mut self) -> RawHandle {
        self.hw.next_id += 1;
        self.hw.next_id
    }

    fn entry(&self, entry: FieldEntryHandle, op: &str) -> BcmResult<&FakeEntry> {
        self.hw
            .entries
            .get(&entry)
            .ok_or_else(|| BcmError::new(BcmStatus::NotFound, format!("{}: entry {}", op, entry)))
    }

    fn entry_mut(&mut self, entry: FieldEntryHandle, op: &str) -> BcmResult<&mut FakeEntry> {
        self.hw
            .entries
            .get_mut(&entry)
            .ok_or_else(|| BcmError::new(BcmStatus::NotFound, format!("{}: entry {}", op, entry)))
    }

    fn check_limit(current: usize, limit: Option<usize>, what: &str) -> BcmResult<()> {
        match limit {
            Some(max) if current >= max => Err(BcmError::new(
                BcmStatus::Full,
                format!("{} table full ({} entries)", what, max),
            )),
            _ => Ok(()),
        }
    }

    fn mirror_in_use(&self, handle: MirrorHandle) -> bool {
        self.hw.port_mirrors.iter().any(|(_, _, h)| *h == handle)
            || self.hw.entries.values().any(|e| {
                e.actions.iter().any(|a| {
                    matches!(a, FieldAction::MirrorIngress(h) | FieldAction::MirrorEgress(h) if *h == handle)
                })
            })
    }
}

/// In-memory implementation of [`BcmSdk`](crate::api::BcmSdk).
#[derive(Debug, Default)]
pub struct FakeSdk {
    state: Mutex<FakeState>,
}

impl FakeSdk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: FakeLimits) -> Self {
        let sdk = Self::new();
        sdk.lock().hw.limits = limits;
        sdk
    }

    /// Restores hardware contents from a previous [`FakeSdk::dump`].
    pub fn from_dump(dump: FakeDump) -> Self {
        let sdk = Self::new();
        sdk.lock().hw = dump;
        sdk
    }

    /// Snapshot of the hardware contents.
    pub fn dump(&self) -> FakeDump {
        self.lock().hw.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes the next call to `op` fail with `status`.
    pub fn fail_next(&self, op: &'static str, status: BcmStatus) {
        self.lock().failures.insert(op, status);
    }

    pub fn calls(&self) -> Vec<SdkCall> {
        self.lock().calls.clone()
    }

    /// Names of the recorded calls, in order.
    pub fn ops(&self) -> Vec<&'static str> {
        self.lock().calls.iter().map(|c| c.op).collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn set_stat_value(&self, stat: AclStatHandle, stat_type: StatType, value: u64) {
        if let Some(s) = self.lock().hw.stats.get_mut(&stat) {
            s.values.insert(stat_type, value);
        }
    }

    pub fn set_flexctr_value(&self, stat: TeFlowStatHandle, stat_type: StatType, value: u64) {
        if let Some(s) = self.lock().hw.flexctrs.get_mut(&stat) {
            s.values.insert(stat_type, value);
        }
    }

    pub fn entry_count(&self, group: GroupId) -> usize {
        self.lock()
            .hw
            .entries
            .values()
            .filter(|e| e.group == group)
            .count()
    }

    pub fn entry_exists(&self, entry: FieldEntryHandle) -> bool {
        self.lock().hw.entries.contains_key(&entry)
    }

    pub fn entry_installed(&self, entry: FieldEntryHandle) -> bool {
        self.lock()
            .hw
            .entries
            .get(&entry)
            .map(|e| e.installed)
            .unwrap_or(false)
    }

    pub fn stat_count(&self) -> usize {
        self.lock().hw.stats.len()
    }

    pub fn stat_exists(&self, stat: AclStatHandle) -> bool {
        self.lock().hw.stats.contains_key(&stat)
    }

    pub fn flexctr_count(&self) -> usize {
        self.lock().hw.flexctrs.len()
    }

    pub fn range_count(&self) -> usize {
        self.lock().hw.ranges.len()
    }

    pub fn mirror_count(&self) -> usize {
        self.lock().hw.mirrors.len()
    }

    pub fn mirror_exists(&self, handle: MirrorHandle) -> bool {
        self.lock().hw.mirrors.contains_key(&handle)
    }

    pub fn egress_count(&self) -> usize {
        self.lock().hw.egresses.len()
    }

    /// All `(gport, flags, destination)` port mirror associations.
    pub fn port_mirrors(&self) -> Vec<(Gport, u32, MirrorHandle)> {
        self.lock().hw.port_mirrors.iter().copied().collect()
    }
}

impl FieldApi for FakeSdk {
    fn entry_create(&self, group: GroupId) -> BcmResult<FieldEntryHandle> {
        let mut st = self.lock();
        st.enter("entry_create", group)?;
        FakeState::check_limit(st.hw.entries.len(), st.hw.limits.entries, "field entry")?;
        let handle = FieldEntryHandle::from_raw_unchecked(st.alloc());
        st.hw.entries.insert(handle, FakeEntry::new(group));
        Ok(handle)
    }

    fn entry_destroy(&self, entry: FieldEntryHandle) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("entry_destroy", entry.as_raw())?;
        let e = st.entry(entry, "entry_destroy")?;
        if e.stat.is_some() || e.flexctr.is_some() {
            return Err(BcmError::new(
                BcmStatus::Busy,
                format!("entry {} still has a counter attached", entry),
            ));
        }
        st.hw.entries.remove(&entry);
        Ok(())
    }

    fn entry_install(&self, entry: FieldEntryHandle) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("entry_install", entry.as_raw())?;
        st.entry_mut(entry, "entry_install")?.installed = true;
        Ok(())
    }

    fn entry_prio_set(&self, entry: FieldEntryHandle, priority: i32) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("entry_prio_set", entry.as_raw())?;
        st.entry_mut(entry, "entry_prio_set")?.priority = priority;
        Ok(())
    }

    fn entry_prio_get(&self, entry: FieldEntryHandle) -> BcmResult<i32> {
        let st = self.lock();
        Ok(st.entry(entry, "entry_prio_get")?.priority)
    }

    fn entry_enable_set(&self, entry: FieldEntryHandle, enable: bool) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("entry_enable_set", entry.as_raw())?;
        st.entry_mut(entry, "entry_enable_set")?.enabled = enable;
        Ok(())
    }

    fn entry_enable_get(&self, entry: FieldEntryHandle) -> BcmResult<bool> {
        let st = self.lock();
        Ok(st.entry(entry, "entry_enable_get")?.enabled)
    }

    fn qualify(&self, entry: FieldEntryHandle, qualifier: Qualifier) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("qualify", entry.as_raw())?;
        let e = st.entry_mut(entry, "qualify")?;
        // the ASIC cannot tell a programmed zero from "never set" for these
        if qualifier.field.zero_means_unset() && qualifier.value.data == 0 {
            e.qualifiers.remove(&qualifier.field);
        } else {
            e.qualifiers.insert(qualifier.field, qualifier.value);
        }
        Ok(())
    }

    fn qualifier_get(
        &self,
        entry: FieldEntryHandle,
        field: QualifierField,
    ) -> BcmResult<QualifierData> {
        let st = self.lock();
        Ok(st
            .entry(entry, "qualifier_get")?
            .qualifiers
            .get(&field)
            .copied()
            .unwrap_or(QualifierData::UNSET))
    }

    fn action_add(&self, entry: FieldEntryHandle, action: FieldAction) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("action_add", entry.as_raw())?;
        if let FieldAction::MirrorIngress(h) | FieldAction::MirrorEgress(h) = action {
            if !st.hw.mirrors.contains_key(&h) {
                return Err(BcmError::new(
                    BcmStatus::NotFound,
                    format!("mirror destination {}", h),
                ));
            }
        }
        let e = st.entry_mut(entry, "action_add")?;
        if e.actions.iter().any(|a| a.same_type(&action)) {
            return Err(BcmError::new(
                BcmStatus::Exists,
                format!("action {:?} already on entry {}", action, entry),
            ));
        }
        e.actions.push(action);
        Ok(())
    }

    fn action_delete(&self, entry: FieldEntryHandle, action: FieldAction) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("action_delete", entry.as_raw())?;
        let e = st.entry_mut(entry, "action_delete")?;
        let before = e.actions.len();
        e.actions.retain(|a| *a != action);
        if e.actions.len() == before {
            return Err(BcmError::new(
                BcmStatus::NotFound,
                format!("action {:?} on entry {}", action, entry),
            ));
        }
        Ok(())
    }

    fn actions_get(&self, entry: FieldEntryHandle) -> BcmResult<Vec<FieldAction>> {
        let st = self.lock();
        Ok(st.entry(entry, "actions_get")?.actions.clone())
    }

    fn stat_create(&self, group: GroupId, types: &[StatType]) -> BcmResult<AclStatHandle> {
        let mut st = self.lock();
        st.enter("stat_create", group)?;
        FakeState::check_limit(st.hw.stats.len(), st.hw.limits.stats, "field stat")?;
        let handle = AclStatHandle::from_raw_unchecked(st.alloc());
        st.hw.stats.insert(handle, FakeStat::new(types));
        Ok(handle)
    }

    fn stat_destroy(&self, stat: AclStatHandle) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("stat_destroy", stat.as_raw())?;
        match st.hw.stats.get(&stat) {
            None => Err(BcmError::new(BcmStatus::NotFound, format!("stat {}", stat))),
            Some(s) if !s.attached.is_empty() => Err(BcmError::new(
                BcmStatus::Busy,
                format!("stat {} still attached to {} entries", stat, s.attached.len()),
            )),
            Some(_) => {
                st.hw.stats.remove(&stat);
                Ok(())
            }
        }
    }

    fn stat_attach(&self, entry: FieldEntryHandle, stat: AclStatHandle) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("stat_attach", stat.as_raw())?;
        if st.entry(entry, "stat_attach")?.stat.is_some() {
            return Err(BcmError::new(
                BcmStatus::Exists,
                format!("entry {} already has a stat", entry),
            ));
        }
        let s = st
            .hw
            .stats
            .get_mut(&stat)
            .ok_or_else(|| BcmError::new(BcmStatus::NotFound, format!("stat {}", stat)))?;
        s.attached.insert(entry);
        st.entry_mut(entry, "stat_attach")?.stat = Some(stat);
        Ok(())
    }

    fn stat_detach(&self, entry: FieldEntryHandle, stat: AclStatHandle) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("stat_detach", stat.as_raw())?;
        let e = st.entry_mut(entry, "stat_detach")?;
        if e.stat != Some(stat) {
            return Err(BcmError::new(
                BcmStatus::NotFound,
                format!("stat {} not attached to entry {}", stat, entry),
            ));
        }
        e.stat = None;
        if let Some(s) = st.hw.stats.get_mut(&stat) {
            s.attached.remove(&entry);
        }
        Ok(())
    }

    fn entry_stat_get(&self, entry: FieldEntryHandle) -> BcmResult<Option<AclStatHandle>> {
        let st = self.lock();
        Ok(st.entry(entry, "entry_stat_get")?.stat)
    }

    fn stat_config_get(&self, stat: AclStatHandle) -> BcmResult<Vec<StatType>> {
        let st = self.lock();
        st.hw
            .stats
            .get(&stat)
            .map(|s| s.types.clone())
            .ok_or_else(|| BcmError::new(BcmStatus::NotFound, format!("stat {}", stat)))
    }

    fn stat_get(&self, stat: AclStatHandle, stat_type: StatType) -> BcmResult<u64> {
        let st = self.lock();
        let s = st
            .hw
            .stats
            .get(&stat)
            .ok_or_else(|| BcmError::new(BcmStatus::NotFound, format!("stat {}", stat)))?;
        s.values.get(&stat_type).copied().ok_or_else(|| {
            BcmError::new(
                BcmStatus::Param,
                format!("stat {} has no {} counter", stat, stat_type),
            )
        })
    }

    fn range_create(&self, spec: &RangeSpec) -> BcmResult<AclRangeHandle> {
        let mut st = self.lock();
        st.enter("range_create", spec.min as RawHandle)?;
        let handle = AclRangeHandle::from_raw_unchecked(st.alloc());
        st.hw.ranges.insert(handle, *spec);
        Ok(handle)
    }

    fn range_destroy(&self, range: AclRangeHandle) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("range_destroy", range.as_raw())?;
        let in_use = st.hw.entries.values().any(|e| {
            e.qualifiers.iter().any(|(f, q)| {
                matches!(
                    f,
                    QualifierField::SrcL4PortRange
                        | QualifierField::DstL4PortRange
                        | QualifierField::PacketLengthRange
                ) && q.data == range.as_raw() as u128
            })
        });
        if in_use {
            return Err(BcmError::new(
                BcmStatus::Busy,
                format!("range {} still qualified on", range),
            ));
        }
        st.hw
            .ranges
            .remove(&range)
            .map(|_| ())
            .ok_or_else(|| BcmError::new(BcmStatus::NotFound, format!("range {}", range)))
    }

    fn entry_traverse(
        &self,
        group: GroupId,
        visitor: &mut dyn FnMut(&FieldEntrySnapshot),
    ) -> BcmResult<()> {
        let snapshots: Vec<FieldEntrySnapshot> = self
            .lock()
            .hw
            .entries
            .iter()
            .filter(|(_, e)| e.group == group)
            .map(|(h, e)| FieldEntrySnapshot {
                handle: *h,
                priority: e.priority,
                enabled: e.enabled,
            })
            .collect();
        snapshots.iter().for_each(|s| visitor(s));
        Ok(())
    }

    fn range_traverse(
        &self,
        visitor: &mut dyn FnMut(AclRangeHandle, &RangeSpec),
    ) -> BcmResult<()> {
        let ranges: Vec<_> = self
            .lock()
            .hw
            .ranges
            .iter()
            .map(|(h, s)| (*h, *s))
            .collect();
        ranges.iter().for_each(|(h, s)| visitor(*h, s));
        Ok(())
    }
}

impl FlexCounterApi for FakeSdk {
    fn flexctr_create(&self, group: GroupId, types: &[StatType]) -> BcmResult<TeFlowStatHandle> {
        let mut st = self.lock();
        st.enter("flexctr_create", group)?;
        FakeState::check_limit(st.hw.flexctrs.len(), st.hw.limits.stats, "flex counter")?;
        let handle = TeFlowStatHandle::from_raw_unchecked(st.alloc());
        st.hw.flexctrs.insert(handle, FakeStat::new(types));
        Ok(handle)
    }

    fn flexctr_destroy(&self, stat: TeFlowStatHandle) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("flexctr_destroy", stat.as_raw())?;
        match st.hw.flexctrs.get(&stat) {
            None => Err(BcmError::new(
                BcmStatus::NotFound,
                format!("flex counter {}", stat),
            )),
            Some(s) if !s.attached.is_empty() => Err(BcmError::new(
                BcmStatus::Busy,
                format!("flex counter {} still attached", stat),
            )),
            Some(_) => {
                st.hw.flexctrs.remove(&stat);
                Ok(())
            }
        }
    }

    fn flexctr_attach(
        &self,
        entry: FieldEntryHandle,
        stat: TeFlowStatHandle,
        action_index: CounterActionIndex,
    ) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("flexctr_attach", stat.as_raw())?;
        if st.entry(entry, "flexctr_attach")?.flexctr.is_some() {
            return Err(BcmError::new(
                BcmStatus::Exists,
                format!("entry {} already has a flex counter", entry),
            ));
        }
        let s = st.hw.flexctrs.get_mut(&stat).ok_or_else(|| {
            BcmError::new(BcmStatus::NotFound, format!("flex counter {}", stat))
        })?;
        s.attached.insert(entry);
        st.entry_mut(entry, "flexctr_attach")?.flexctr =
            Some(FlexCounterAttachment { stat, action_index });
        Ok(())
    }

    fn flexctr_detach(&self, entry: FieldEntryHandle, stat: TeFlowStatHandle) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("flexctr_detach", stat.as_raw())?;
        let e = st.entry_mut(entry, "flexctr_detach")?;
        if !matches!(e.flexctr, Some(att) if att.stat == stat) {
            return Err(BcmError::new(
                BcmStatus::NotFound,
                format!("flex counter {} not attached to entry {}", stat, entry),
            ));
        }
        e.flexctr = None;
        if let Some(s) = st.hw.flexctrs.get_mut(&stat) {
            s.attached.remove(&entry);
        }
        Ok(())
    }

    fn entry_flexctr_get(
        &self,
        entry: FieldEntryHandle,
    ) -> BcmResult<Option<FlexCounterAttachment>> {
        let st = self.lock();
        Ok(st.entry(entry, "entry_flexctr_get")?.flexctr)
    }

    fn flexctr_config_get(&self, stat: TeFlowStatHandle) -> BcmResult<Vec<StatType>> {
        let st = self.lock();
        st.hw
            .flexctrs
            .get(&stat)
            .map(|s| s.types.clone())
            .ok_or_else(|| BcmError::new(BcmStatus::NotFound, format!("flex counter {}", stat)))
    }

    fn flexctr_stat_get(&self, stat: TeFlowStatHandle, stat_type: StatType) -> BcmResult<u64> {
        let st = self.lock();
        st.hw
            .flexctrs
            .get(&stat)
            .and_then(|s| s.values.get(&stat_type).copied())
            .ok_or_else(|| {
                BcmError::new(
                    BcmStatus::NotFound,
                    format!("flex counter {} {}", stat, stat_type),
                )
            })
    }
}

impl MirrorApi for FakeSdk {
    fn mirror_destination_create(&self, dest: &MirrorDestination) -> BcmResult<MirrorHandle> {
        let mut st = self.lock();
        st.enter("mirror_destination_create", dest.gport.as_raw())?;
        FakeState::check_limit(st.hw.mirrors.len(), st.hw.limits.mirrors, "mirror destination")?;
        let handle = MirrorHandle::from_raw_unchecked(st.alloc());
        st.hw.mirrors.insert(handle, dest.clone());
        Ok(handle)
    }

    fn mirror_destination_destroy(&self, handle: MirrorHandle) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("mirror_destination_destroy", handle.as_raw())?;
        if !st.hw.mirrors.contains_key(&handle) {
            return Err(BcmError::new(
                BcmStatus::NotFound,
                format!("mirror destination {}", handle),
            ));
        }
        if st.mirror_in_use(handle) {
            return Err(BcmError::new(
                BcmStatus::Busy,
                format!("mirror destination {} still in use", handle),
            ));
        }
        st.hw.mirrors.remove(&handle);
        Ok(())
    }

    fn mirror_destination_get(&self, handle: MirrorHandle) -> BcmResult<MirrorDestination> {
        let st = self.lock();
        st.hw.mirrors.get(&handle).cloned().ok_or_else(|| {
            BcmError::new(
                BcmStatus::NotFound,
                format!("mirror destination {}", handle),
            )
        })
    }

    fn mirror_port_dest_add(&self, gport: Gport, flags: u32, dest: MirrorHandle) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("mirror_port_dest_add", dest.as_raw())?;
        if !st.hw.mirrors.contains_key(&dest) {
            return Err(BcmError::new(
                BcmStatus::NotFound,
                format!("mirror destination {}", dest),
            ));
        }
        if !st.hw.port_mirrors.insert((gport, flags, dest)) {
            return Err(BcmError::new(
                BcmStatus::Exists,
                format!("port {} already mirrored to {}", gport, dest),
            ));
        }
        Ok(())
    }

    fn mirror_port_dest_delete(
        &self,
        gport: Gport,
        flags: u32,
        dest: MirrorHandle,
    ) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("mirror_port_dest_delete", dest.as_raw())?;
        if !st.hw.port_mirrors.remove(&(gport, flags, dest)) {
            return Err(BcmError::new(
                BcmStatus::NotFound,
                format!("port {} not mirrored to {}", gport, dest),
            ));
        }
        Ok(())
    }

    fn mirror_destination_traverse(
        &self,
        visitor: &mut dyn FnMut(MirrorHandle, &MirrorDestination),
    ) -> BcmResult<()> {
        let mirrors: Vec<_> = self
            .lock()
            .hw
            .mirrors
            .iter()
            .map(|(h, d)| (*h, d.clone()))
            .collect();
        mirrors.iter().for_each(|(h, d)| visitor(*h, d));
        Ok(())
    }

    fn mirror_port_traverse(
        &self,
        visitor: &mut dyn FnMut(Gport, u32, MirrorHandle),
    ) -> BcmResult<()> {
        let associations: Vec<_> = self.lock().hw.port_mirrors.iter().copied().collect();
        associations
            .iter()
            .for_each(|(gport, flags, dest)| visitor(*gport, *flags, *dest));
        Ok(())
    }
}

impl L3Api for FakeSdk {
    fn egress_create(&self, paths: &[EgressPath]) -> BcmResult<EgressId> {
        let mut st = self.lock();
        st.enter("egress_create", paths.len() as RawHandle)?;
        if st.hw.next_egress < FIRST_EGRESS_RAW {
            st.hw.next_egress = FIRST_EGRESS_RAW;
        }
        let egress = EgressId::from_raw_unchecked(st.hw.next_egress);
        st.hw.next_egress += 1;
        st.hw.egresses.insert(egress, paths.to_vec());
        Ok(egress)
    }

    fn egress_destroy(&self, egress: EgressId) -> BcmResult<()> {
        let mut st = self.lock();
        st.enter("egress_destroy", egress.as_raw())?;
        let in_use = st
            .hw
            .entries
            .values()
            .any(|e| e.actions.contains(&FieldAction::L3Switch(egress)));
        if in_use {
            return Err(BcmError::new(
                BcmStatus::Busy,
                format!("egress {} still used by a redirect", egress),
            ));
        }
        st.hw
            .egresses
            .remove(&egress)
            .map(|_| ())
            .ok_or_else(|| BcmError::new(BcmStatus::NotFound, format!("egress {}", egress)))
    }

    fn drop_egress_id(&self) -> EgressId {
        EgressId::from_raw_unchecked(DROP_EGRESS_RAW)
    }

    fn egress_traverse(
        &self,
        visitor: &mut dyn FnMut(EgressId, &[EgressPath]),
    ) -> BcmResult<()> {
        let egresses: Vec<_> = self
            .lock()
            .hw
            .egresses
            .iter()
            .map(|(e, p)| (*e, p.clone()))
            .collect();
        egresses.iter().for_each(|(e, p)| visitor(*e, p));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::flex_counter::DEFAULT_COUNTER_ACTION_INDEX;
    use crate::types::port_gport;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_entry_destroy_requires_stat_detach() {
        let sdk = FakeSdk::new();
        let entry = sdk.entry_create(128).unwrap();
        let stat = sdk.stat_create(128, &[StatType::Packets]).unwrap();
        sdk.stat_attach(entry, stat).unwrap();

        let err = sdk.entry_destroy(entry).unwrap_err();
        assert_eq!(err.status(), BcmStatus::Busy);
        let err = sdk.stat_destroy(stat).unwrap_err();
        assert_eq!(err.status(), BcmStatus::Busy);

        sdk.stat_detach(entry, stat).unwrap();
        sdk.stat_destroy(stat).unwrap();
        sdk.entry_destroy(entry).unwrap();
        assert_eq!(sdk.entry_count(128), 0);
        assert_eq!(sdk.stat_count(), 0);
    }

    #[test]
    fn test_second_counter_attach_is_rejected() {
        let sdk = FakeSdk::new();
        let entry = sdk.entry_create(128).unwrap();
        let stat = sdk.stat_create(128, &[StatType::Packets]).unwrap();
        sdk.stat_attach(entry, stat).unwrap();
        let err = sdk.stat_attach(entry, stat).unwrap_err();
        assert_eq!(err.status(), BcmStatus::Exists);

        let other = sdk.entry_create(128).unwrap();
        let ctr = sdk.flexctr_create(128, &[StatType::Bytes]).unwrap();
        sdk.flexctr_attach(other, ctr, DEFAULT_COUNTER_ACTION_INDEX)
            .unwrap();
        let err = sdk
            .flexctr_attach(other, ctr, DEFAULT_COUNTER_ACTION_INDEX)
            .unwrap_err();
        assert_eq!(err.status(), BcmStatus::Exists);
        assert_eq!(
            sdk.entry_destroy(other).unwrap_err().status(),
            BcmStatus::Busy
        );
    }

    #[test]
    fn test_counter_attach_to_unknown_entry() {
        let sdk = FakeSdk::new();
        let stat = sdk.stat_create(128, &[StatType::Packets]).unwrap();
        let missing = FieldEntryHandle::from_raw(999).unwrap();
        assert_eq!(
            sdk.stat_attach(missing, stat).unwrap_err().status(),
            BcmStatus::NotFound
        );
        assert_eq!(
            sdk.entry_destroy(missing).unwrap_err().status(),
            BcmStatus::NotFound
        );
    }

    #[test]
    fn test_fail_next_is_consumed_once() {
        let sdk = FakeSdk::new();
        sdk.fail_next("entry_create", BcmStatus::Internal);
        assert!(sdk.entry_create(1).is_err());
        assert!(sdk.entry_create(1).is_ok());
        assert_eq!(sdk.ops(), vec!["entry_create", "entry_create"]);
    }

    #[test]
    fn test_limits_report_table_full() {
        let sdk = FakeSdk::with_limits(FakeLimits {
            mirrors: Some(1),
            ..Default::default()
        });
        let dest = MirrorDestination {
            gport: port_gport(1),
            tunnel: None,
            dscp: 0,
            truncate: false,
        };
        sdk.mirror_destination_create(&dest).unwrap();
        let err = sdk.mirror_destination_create(&dest).unwrap_err();
        assert!(err.is_resource_exhausted());
    }

    #[test]
    fn test_zero_class_qualifier_reads_back_unset() {
        let sdk = FakeSdk::new();
        let entry = sdk.entry_create(1).unwrap();
        sdk.qualify(
            entry,
            Qualifier::new(QualifierField::DstClassL3, QualifierData::exact(0, 8)),
        )
        .unwrap();
        assert!(sdk
            .qualifier_get(entry, QualifierField::DstClassL3)
            .unwrap()
            .is_unset());
    }

    #[test]
    fn test_mirror_destroy_blocked_by_port_association() {
        let sdk = FakeSdk::new();
        let dest = MirrorDestination {
            gport: port_gport(3),
            tunnel: None,
            dscp: 0,
            truncate: false,
        };
        let mirror = sdk.mirror_destination_create(&dest).unwrap();
        sdk.mirror_port_dest_add(port_gport(1), 1, mirror).unwrap();
        assert_eq!(
            sdk.mirror_destination_destroy(mirror).unwrap_err().status(),
            BcmStatus::Busy
        );
        sdk.mirror_port_dest_delete(port_gport(1), 1, mirror).unwrap();
        sdk.mirror_destination_destroy(mirror).unwrap();
    }

    #[test]
    fn test_dump_restores_hardware() {
        let sdk = FakeSdk::new();
        let entry = sdk.entry_create(7).unwrap();
        sdk.entry_prio_set(entry, 99_000).unwrap();

        let restored = FakeSdk::from_dump(sdk.dump());
        let mut seen = Vec::new();
        restored
            .entry_traverse(7, &mut |snap| seen.push((snap.handle, snap.priority)))
            .unwrap();
        assert_eq!(seen, vec![(entry, 99_000)]);
        assert!(restored.calls().is_empty());
    }
}
