//! Persisted warm-boot state.
//!
//! Facts the SDK cannot give back by traversal are written out on graceful
//! exit and read again before the warm-boot cache is populated.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use bcm_sdk::api::StatType;
use bcm_sdk::AclStatHandle;
use serde::{Deserialize, Serialize};

use crate::error::HalResult;
use crate::info_log;

pub const WARM_BOOT_STATE_VERSION: u32 = 1;

/// Exact-match group settings TeFlow entries were programmed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeFlowGroupState {
    pub dst_prefix_length: u8,
    pub hint_id: u32,
}

/// A named ACL stat as it was when the agent exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclStatRecord {
    pub handle: AclStatHandle,
    pub types: Vec<StatType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmBootState {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teflow: Option<TeFlowGroupState>,
    /// Counter name to stat.
    #[serde(default)]
    pub acl_stats: BTreeMap<String, AclStatRecord>,
}

impl Default for WarmBootState {
    fn default() -> Self {
        Self {
            version: WARM_BOOT_STATE_VERSION,
            teflow: None,
            acl_stats: BTreeMap::new(),
        }
    }
}

impl WarmBootState {
    /// Reads the state file. A missing file means a cold boot.
    pub fn load(path: impl AsRef<Path>) -> HalResult<Option<Self>> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: WarmBootState = serde_json::from_str(&content)?;
        info_log!(
            "WarmBootState",
            path = %path.display(),
            acl_stats = state.acl_stats.len(),
            "loaded warm boot state"
        );
        Ok(Some(state))
    }

    /// Writes the state file, replacing any previous one.
    pub fn save(&self, path: impl AsRef<Path>) -> HalResult<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        info_log!("WarmBootState", path = %path.display(), "saved warm boot state");
        Ok(())
    }

    /// Name the stat was created under, if recorded.
    pub fn stat_name(&self, handle: AclStatHandle) -> Option<&str> {
        self.acl_stats
            .iter()
            .find(|(_, record)| record.handle == handle)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> WarmBootState {
        let mut state = WarmBootState {
            teflow: Some(TeFlowGroupState {
                dst_prefix_length: 56,
                hint_id: 3,
            }),
            ..Default::default()
        };
        state.acl_stats.insert(
            "stat0".to_string(),
            AclStatRecord {
                handle: AclStatHandle::from_raw_unchecked(4),
                types: vec![StatType::Packets, StatType::Bytes],
            },
        );
        state
    }

    #[test]
    fn test_missing_file_is_cold_boot() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = WarmBootState::load(dir.path().join("hw_switch_state.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hw_switch_state.json");

        sample().save(&path).unwrap();
        let loaded = WarmBootState::load(&path).unwrap().unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hw_switch_state.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            WarmBootState::load(&path),
            Err(crate::error::HalError::WarmBootState(_))
        ));
    }

    #[test]
    fn test_stat_name_lookup() {
        let state = sample();
        assert_eq!(
            state.stat_name(AclStatHandle::from_raw_unchecked(4)),
            Some("stat0")
        );
        assert_eq!(state.stat_name(AclStatHandle::from_raw_unchecked(5)), None);
    }
}
