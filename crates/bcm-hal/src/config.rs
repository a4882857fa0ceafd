//! Hardware layer configuration.
//!
//! Loaded from YAML or JSON (by file extension), every field optional.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bcm_sdk::GroupId;
use serde::{Deserialize, Serialize};

use crate::acl::StatEquivalence;
use crate::error::{HalError, HalResult};

/// ASIC family of the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsicFamily {
    Trident2,
    #[default]
    Tomahawk,
    Tomahawk3,
    Tomahawk4,
}

impl AsicFamily {
    /// How an existing stat's counter types are compared with the configured
    /// ones on warm boot.
    ///
    /// Trident2 hardware reports every counter type the stat was created
    /// with, plus extras it allocates on its own, so only inclusion can be
    /// checked there.
    pub fn stat_equivalence(&self) -> StatEquivalence {
        match self {
            AsicFamily::Trident2 => StatEquivalence::Includes,
            AsicFamily::Tomahawk | AsicFamily::Tomahawk3 | AsicFamily::Tomahawk4 => {
                StatEquivalence::Exact
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalConfig {
    /// Field processor group of ACL entries.
    #[serde(default = "default_acl_group_id")]
    pub acl_group_id: GroupId,

    /// Exact-match group of TeFlow entries.
    #[serde(default = "default_teflow_group_id")]
    pub teflow_group_id: GroupId,

    #[serde(default)]
    pub asic: AsicFamily,

    #[serde(default = "default_stat_poll_interval_ms")]
    pub stat_poll_interval_ms: u64,

    /// Destination prefix length TeFlow entries match on. A warm boot keeps
    /// the length recorded in the warm-boot state instead.
    #[serde(default = "default_teflow_dst_prefix_length")]
    pub teflow_dst_prefix_length: u8,

    #[serde(default)]
    pub teflow_hint_id: u32,

    #[serde(default = "default_warm_boot_dir")]
    pub warm_boot_dir: PathBuf,

    /// Mirror destination capacity of the hardware.
    #[serde(default = "default_max_mirrors")]
    pub max_mirrors: usize,
}

fn default_acl_group_id() -> GroupId {
    128
}

fn default_teflow_group_id() -> GroupId {
    24
}

fn default_stat_poll_interval_ms() -> u64 {
    1000
}

fn default_teflow_dst_prefix_length() -> u8 {
    64
}

fn default_warm_boot_dir() -> PathBuf {
    PathBuf::from("/dev/shm/fboss/warm_boot")
}

fn default_max_mirrors() -> usize {
    4
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            acl_group_id: default_acl_group_id(),
            teflow_group_id: default_teflow_group_id(),
            asic: AsicFamily::default(),
            stat_poll_interval_ms: default_stat_poll_interval_ms(),
            teflow_dst_prefix_length: default_teflow_dst_prefix_length(),
            teflow_hint_id: 0,
            warm_boot_dir: default_warm_boot_dir(),
            max_mirrors: default_max_mirrors(),
        }
    }
}

impl HalConfig {
    /// Loads a config file. `.json` files are parsed as JSON, anything else
    /// as YAML.
    pub fn load(path: impl AsRef<Path>) -> HalResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            HalError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;

        let config: HalConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| {
                HalError::InvalidConfig(format!("failed to parse {}: {}", path.display(), e))
            })?,
            _ => serde_yaml::from_str(&content).map_err(|e| {
                HalError::InvalidConfig(format!("failed to parse {}: {}", path.display(), e))
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn stat_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stat_poll_interval_ms)
    }

    /// Location of the warm-boot state blob.
    pub fn warm_boot_state_file(&self) -> PathBuf {
        self.warm_boot_dir.join("hw_switch_state.json")
    }

    pub fn validate(&self) -> HalResult<()> {
        if self.acl_group_id == self.teflow_group_id {
            return Err(HalError::InvalidConfig(format!(
                "acl and teflow entries cannot share group {}",
                self.acl_group_id
            )));
        }
        if self.teflow_dst_prefix_length > 128 {
            return Err(HalError::InvalidConfig(format!(
                "teflow_dst_prefix_length {} exceeds 128",
                self.teflow_dst_prefix_length
            )));
        }
        if self.stat_poll_interval_ms == 0 {
            return Err(HalError::InvalidConfig(
                "stat_poll_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HalConfig::default();
        assert_eq!(config.acl_group_id, 128);
        assert_eq!(config.teflow_group_id, 24);
        assert_eq!(config.asic, AsicFamily::Tomahawk);
        assert_eq!(config.teflow_dst_prefix_length, 64);
        assert_eq!(config.max_mirrors, 4);
        assert_eq!(config.stat_poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml_with_partial_fields() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "asic: trident2\nteflow_dst_prefix_length: 56").unwrap();

        let config = HalConfig::load(file.path()).unwrap();
        assert_eq!(config.asic, AsicFamily::Trident2);
        assert_eq!(config.teflow_dst_prefix_length, 56);
        assert_eq!(config.acl_group_id, 128);
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"acl_group_id": 1, "warm_boot_dir": "/tmp/wb"}}"#).unwrap();

        let config = HalConfig::load(file.path()).unwrap();
        assert_eq!(config.acl_group_id, 1);
        assert_eq!(
            config.warm_boot_state_file(),
            PathBuf::from("/tmp/wb/hw_switch_state.json")
        );
    }

    #[test]
    fn test_validate_rejects_shared_group() {
        let config = HalConfig {
            teflow_group_id: 128,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(HalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_stat_equivalence_per_family() {
        assert_eq!(
            AsicFamily::Trident2.stat_equivalence(),
            StatEquivalence::Includes
        );
        assert_eq!(
            AsicFamily::Tomahawk3.stat_equivalence(),
            StatEquivalence::Exact
        );
    }
}
