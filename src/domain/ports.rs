//! Domain Ports - Core type and trait definitions for the LUN orchestrator
//!
//! These traits define the boundaries between the provisioning logic and the
//! host's storage stack. Adapters implement them to provide concrete
//! functionality; tests substitute scripted implementations.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bytes per gigabyte at the interface boundary
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Convert a gigabyte size to the megabyte figure passed to the tools
pub fn gb_to_mb(size_gb: f64) -> u64 {
    (size_gb * 1024.0) as u64
}

/// Bytes allocated for a gigabyte size, in whole megabytes.
///
/// `None` when the size does not fit in a `u64`.
pub fn gb_to_bytes(size_gb: f64) -> Option<u64> {
    gb_to_mb(size_gb).checked_mul(1024 * 1024)
}

// =============================================================================
// Command Execution
// =============================================================================

/// Captured result of an external program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if terminated by a signal
    pub status: Option<i32>,
    /// Combined stdout and stderr
    pub output: String,
}

impl CommandOutput {
    /// Successful output with the given text
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            output: output.into(),
        }
    }

    /// Failed output with the given exit code and text
    pub fn failure(status: i32, output: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            output: output.into(),
        }
    }

    /// Whether the program exited with status zero
    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// Exit status formatted for error messages
    pub fn status_text(&self) -> String {
        match self.status {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        }
    }
}

/// Render a program and its arguments as a single line
pub fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Port for running privileged external programs
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a program, optionally feeding `stdin`, and capture its output.
    ///
    /// A non-zero exit status is not an error at this level; only a failure
    /// to start the program is.
    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<CommandOutput>;

    /// Run a program and capture its output
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.execute(program, args, None).await
    }

    /// Run a program and fail on a non-zero exit status
    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<String> {
        let out = self.execute(program, args, None).await?;
        check_output(program, args, out)
    }

    /// Run a program with `stdin` and fail on a non-zero exit status
    async fn run_with_input_checked(
        &self,
        program: &str,
        args: &[&str],
        stdin: &str,
    ) -> Result<String> {
        let out = self.execute(program, args, Some(stdin)).await?;
        check_output(program, args, out)
    }
}

fn check_output(program: &str, args: &[&str], out: CommandOutput) -> Result<String> {
    if out.is_success() {
        Ok(out.output)
    } else {
        Err(Error::CommandFailed {
            command: command_line(program, args),
            status: out.status_text(),
            output: out.output.trim().to_string(),
        })
    }
}

// =============================================================================
// Backend Kinds
// =============================================================================

/// Storage object a LUN is layered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Freshly created, formatted logical volume
    Lvm,
    /// Existing raw block device used as-is
    Block,
    /// Sparse file under the backstore directory
    Fileio,
}

impl BackendKind {
    /// All kinds in presentation order
    pub const ALL: [BackendKind; 3] = [BackendKind::Lvm, BackendKind::Block, BackendKind::Fileio];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Lvm => "lvm",
            BackendKind::Block => "block",
            BackendKind::Fileio => "fileio",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lvm" => Ok(BackendKind::Lvm),
            "block" => Ok(BackendKind::Block),
            "fileio" => Ok(BackendKind::Fileio),
            other => Err(Error::InvalidBackend(other.to_string())),
        }
    }
}

// =============================================================================
// LUN Types
// =============================================================================

/// Lifecycle status of a LUN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LunStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for LunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LunStatus::Active => write!(f, "active"),
            LunStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// An exported unit of block storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lun {
    /// LUN number within the portal group
    pub number: u32,
    /// Display name
    pub name: String,
    /// Requested size in GB (informational)
    pub size_gb: f64,
    /// Backend kind
    pub backend_kind: BackendKind,
    /// Device or file the export maps onto
    pub backend_path: String,
    /// Target subsystem backstore object (e.g. `/backstores/block/bs_lun0`)
    pub backstore: String,
    /// Underlying logical volume, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lv_path: Option<String>,
    /// Owning volume group for LVM-backed LUNs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_group: Option<String>,
    /// Logical volume size in bytes for LVM-backed LUNs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lv_size_bytes: Option<u64>,
    /// Logical volume data percent for LVM-backed LUNs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lv_data_percent: Option<f64>,
    /// Initiators allowed to access this LUN (empty = unrestricted)
    pub allowed_initiators: Vec<String>,
    pub status: LunStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Request to create a LUN
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LunCreateRequest {
    /// Display name, also the source of the LV or file name
    pub name: String,
    /// Size in GB (fractions allowed)
    pub size_gb: f64,
    /// `lvm`, `block` or `fileio`
    pub backend_type: String,
    /// Volume group for the LVM backend
    #[serde(default)]
    pub volume_group: Option<String>,
    /// Device for the block backend
    #[serde(default)]
    pub device_path: Option<String>,
    /// File for the fileio backend, generated when absent
    #[serde(default)]
    pub file_path: Option<String>,
    /// Initiators to grant access to
    #[serde(default)]
    pub allowed_initiators: Vec<String>,
}

impl LunCreateRequest {
    /// Validate the request and resolve its backend kind
    pub fn validate(&self) -> Result<BackendKind> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("name is required".into()));
        }
        if !self.size_gb.is_finite() || self.size_gb <= 0.0 {
            return Err(Error::Validation("size_gb must be greater than 0".into()));
        }

        let kind: BackendKind = self.backend_type.parse()?;
        match kind {
            BackendKind::Lvm if is_blank(&self.volume_group) => Err(Error::Validation(
                "volume_group is required for lvm backend".into(),
            )),
            BackendKind::Block if is_blank(&self.device_path) => Err(Error::Validation(
                "device_path is required for block backend".into(),
            )),
            _ => Ok(kind),
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

/// A backing store created for a LUN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackingStore {
    pub kind: BackendKind,
    /// Device or file handed to the target subsystem
    pub path: String,
    /// Logical volume to remove on destruction
    pub lv_path: Option<String>,
}

/// Caller-facing description of a backend kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub name: String,
    pub description: String,
    pub available: bool,
    /// Volume groups, device paths, or the backstore directory
    pub resources: Vec<String>,
}

/// Initiator access-control entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub initiator: String,
    pub mapped_luns: Vec<AclMapping>,
}

impl AclEntry {
    /// Whether this ACL exposes the given target LUN
    pub fn maps_lun(&self, lun: u32) -> bool {
        self.mapped_luns.iter().any(|m| m.target_lun == Some(lun))
    }
}

/// One mapped LUN inside an ACL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclMapping {
    /// Number the initiator sees
    pub mapped_lun: u32,
    /// Target LUN it resolves to, if reported
    pub target_lun: Option<u32>,
}

// =============================================================================
// Volume Manager Types
// =============================================================================

/// LVM volume group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeGroup {
    pub name: String,
    /// Total size in bytes
    pub size: u64,
    /// Free size in bytes
    pub free: u64,
    /// Physical volumes
    pub devices: Vec<String>,
    /// Number of logical volumes
    pub lv_count: usize,
}

/// Request to create a volume group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeGroupCreateRequest {
    pub name: String,
    pub devices: Vec<String>,
}

/// Current use of a logical volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LvUsage {
    Available,
    Mounted,
    Pool,
}

impl std::fmt::Display for LvUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LvUsage::Available => write!(f, "available"),
            LvUsage::Mounted => write!(f, "mounted"),
            LvUsage::Pool => write!(f, "pool"),
        }
    }
}

/// LVM logical volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub name: String,
    /// Device path (`<device dir>/<vg>/<name>`)
    pub path: String,
    pub volume_group: String,
    /// Size in bytes
    pub size: u64,
    /// Mount point, empty when unmounted
    pub mount_point: String,
    pub used_for: LvUsage,
}

/// Request to create a logical volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogicalVolumeCreateRequest {
    pub name: String,
    pub volume_group: String,
    pub size_gb: f64,
}

/// Device that may join a new volume group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCandidate {
    pub path: String,
    /// `disk` or `raid`
    pub device_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
}

// =============================================================================
// Volume Group Registry Port
// =============================================================================

/// Port for describing existing volume groups
#[async_trait]
pub trait VolumeGroupRegistry: Send + Sync {
    /// User-facing volume groups (system groups excluded)
    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroup>>;

    /// Describe a volume group by name, system groups included
    async fn volume_group(&self, name: &str) -> Result<Option<VolumeGroup>>;
}

// =============================================================================
// Backing Store Provisioner Port
// =============================================================================

/// Port for creating and destroying the storage behind a LUN
#[async_trait]
pub trait BackingStoreProvisioner: Send + Sync {
    /// Backend kind served by this provisioner
    fn kind(&self) -> BackendKind;

    /// Create the backing store for a validated request
    async fn create(&self, request: &LunCreateRequest) -> Result<BackingStore>;

    /// Destroy a backing store; errors are surfaced, never swallowed
    async fn destroy(&self, store: &BackingStore) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CommandExecutorRef = Arc<dyn CommandExecutor>;
pub type VolumeGroupRegistryRef = Arc<dyn VolumeGroupRegistry>;
pub type BackingStoreProvisionerRef = Arc<dyn BackingStoreProvisioner>;
