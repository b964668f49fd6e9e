//! Orchestrator configuration
//!
//! Every section has defaults matching a stock appliance install, so an
//! empty or partial YAML file is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Executor Configuration
// =============================================================================

/// How privileged programs are started
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Prefix every command with the sudo program
    pub use_sudo: bool,
    /// Program used for privilege escalation
    pub sudo_program: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            use_sudo: true,
            sudo_program: "sudo".to_string(),
        }
    }
}

// =============================================================================
// Volume Manager Configuration
// =============================================================================

/// Volume manager conventions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LvmConfig {
    /// Directory logical volume paths live under
    pub device_dir: String,
    /// Mount points that mark a volume group as the host's own storage
    pub system_mount_points: Vec<String>,
    /// Mount prefix that marks a logical volume as a storage pool
    pub pool_mount_prefix: String,
    /// Filesystem written onto LUN logical volumes
    pub filesystem: String,
}

impl Default for LvmConfig {
    fn default() -> Self {
        Self {
            device_dir: "/dev".to_string(),
            system_mount_points: ["/", "/boot", "/home", "/usr", "/var"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            pool_mount_prefix: "/srv/".to_string(),
            filesystem: "ext4".to_string(),
        }
    }
}

impl LvmConfig {
    /// Device path of a logical volume
    pub fn lv_path(&self, vg: &str, lv: &str) -> String {
        format!("{}/{}/{}", self.device_dir.trim_end_matches('/'), vg, lv)
    }

    /// Split a logical volume device path into volume group and name
    pub fn split_lv_path<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let prefix = format!("{}/", self.device_dir.trim_end_matches('/'));
        let rest = path.strip_prefix(prefix.as_str())?;
        let (vg, lv) = rest.split_once('/')?;
        if vg.is_empty() || lv.is_empty() || lv.contains('/') {
            return None;
        }
        Some((vg, lv))
    }

    /// Whether a mount point belongs to the host's own storage
    pub fn is_system_mount(&self, mount_point: &str) -> bool {
        self.system_mount_points.iter().any(|sys| {
            mount_point == sys
                || (sys != "/" && mount_point.starts_with(&format!("{}/", sys)))
        })
    }
}

// =============================================================================
// Target Configuration
// =============================================================================

/// iSCSI target settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// The single target all LUNs are exported through
    pub iqn: String,
    /// Portal group name
    pub tpg: String,
    /// Root of the target subsystem's configfs tree
    pub configfs_root: String,
    /// FirstBurstLength written to the portal group
    pub first_burst_length: u32,
    /// MaxBurstLength written to the portal group
    pub max_burst_length: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            iqn: "iqn.2024-01.com.nas:storage".to_string(),
            tpg: "tpg1".to_string(),
            configfs_root: "/sys/kernel/config/target".to_string(),
            first_burst_length: 32768,
            max_burst_length: 65536,
        }
    }
}

impl TargetConfig {
    /// Portal group tag number (`tpg1` -> 1)
    pub fn tpg_tag(&self) -> &str {
        self.tpg.trim_start_matches("tpg")
    }
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// Backing store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Directory holding fileio backing files
    pub backstore_dir: String,
    /// Length cap applied when sanitizing names
    pub max_name_len: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backstore_dir: "/var/lib/arcanas/iscsi".to_string(),
            max_name_len: 32,
        }
    }
}

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub executor: ExecutorConfig,
    pub lvm: LvmConfig,
    pub target: TargetConfig,
    pub backends: BackendConfig,
}

impl OrchestratorConfig {
    /// Parse configuration from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Reject settings that would produce malformed commands
    pub fn validate(&self) -> Result<()> {
        if self.target.iqn.trim().is_empty() {
            return Err(Error::Configuration("target.iqn must not be empty".into()));
        }
        if !self.target.tpg.starts_with("tpg") {
            return Err(Error::Configuration(format!(
                "target.tpg must look like tpgN, got {}",
                self.target.tpg
            )));
        }
        if !self.backends.backstore_dir.starts_with('/') {
            return Err(Error::Configuration(
                "backends.backstore_dir must be absolute".into(),
            ));
        }
        if !matches!(self.lvm.filesystem.as_str(), "ext2" | "ext3" | "ext4") {
            return Err(Error::Configuration(format!(
                "lvm.filesystem must be ext2, ext3 or ext4 (resized with resize2fs), got {}",
                self.lvm.filesystem
            )));
        }
        if self.backends.max_name_len == 0 {
            return Err(Error::Configuration(
                "backends.max_name_len must be positive".into(),
            ));
        }
        Ok(())
    }
}
