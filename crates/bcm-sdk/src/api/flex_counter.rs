//! Flex counter adapter surface used for exact-match (TeFlow) entry stats.

use serde::{Deserialize, Serialize};

use crate::api::field::StatType;
use crate::error::BcmResult;
use crate::types::{FieldEntryHandle, GroupId, TeFlowStatHandle};

/// Counter index within a flex counter action.
pub type CounterActionIndex = u32;

/// Default counter index used when attaching a flex counter to an entry.
pub const DEFAULT_COUNTER_ACTION_INDEX: CounterActionIndex = 0;

/// A flex counter attached to a field entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexCounterAttachment {
    pub stat: TeFlowStatHandle,
    pub action_index: CounterActionIndex,
}

/// Flex counter calls.
pub trait FlexCounterApi: Send + Sync {
    fn flexctr_create(&self, group: GroupId, types: &[StatType]) -> BcmResult<TeFlowStatHandle>;
    fn flexctr_destroy(&self, stat: TeFlowStatHandle) -> BcmResult<()>;
    fn flexctr_attach(
        &self,
        entry: FieldEntryHandle,
        stat: TeFlowStatHandle,
        action_index: CounterActionIndex,
    ) -> BcmResult<()>;
    fn flexctr_detach(&self, entry: FieldEntryHandle, stat: TeFlowStatHandle) -> BcmResult<()>;
    /// Returns the flex counter attached to `entry`, if any.
    fn entry_flexctr_get(&self, entry: FieldEntryHandle)
        -> BcmResult<Option<FlexCounterAttachment>>;
    fn flexctr_config_get(&self, stat: TeFlowStatHandle) -> BcmResult<Vec<StatType>>;
    fn flexctr_stat_get(&self, stat: TeFlowStatHandle, stat_type: StatType) -> BcmResult<u64>;
}
