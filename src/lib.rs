//! LUN Orchestrator - iSCSI provisioning control plane
//!
//! Provisions block storage for export over iSCSI on a single host. A LUN is
//! layered on one of three backing stores (a new LVM logical volume, an
//! existing block device, or a sparse file) and bound into a LIO target
//! through `targetcli`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     REST API (axum)                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                  Provisioning Orchestrator                       │
//! │   guard → backing store → number → bind → ACLs   (saga rollback) │
//! ├───────────────────────────────┬──────────────────────────────────┤
//! │  Backends (lvm/block/fileio)  │  Target (guard/allocator/        │
//! │  Volume Group Manager         │  binding/acl) via targetcli      │
//! ├───────────────────────────────┴──────────────────────────────────┤
//! │          Command executor (sudo, captured output)                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The host is the only source of truth: nothing is persisted, and every
//! listing is re-derived from `lvs`, `vgs` and `targetcli` output.
//!
//! # Modules
//!
//! - [`controlplane`]: orchestrator, backends, saga and REST API
//! - [`lvm`]: volume group and logical volume management
//! - [`target`]: iSCSI target, LUN binding and ACLs
//! - [`host`]: command execution and tool output parsers
//! - [`domain`]: core domain types and traits
//! - [`config`]: configuration tree
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: error types and classification

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod host;
pub mod lvm;
pub mod metrics;
pub mod target;

#[cfg(test)]
pub mod testing;

// Re-export commonly used types
pub use config::{BackendConfig, ExecutorConfig, LvmConfig, OrchestratorConfig, TargetConfig};

pub use controlplane::{
    ApiServer, ApiServerConfig, BackendFactory, BackendRegistry, Orchestrator,
    OrchestratorStatus, ProvisionStage, RestRouter,
};

pub use domain::ports::{
    AclEntry, BackendInfo, BackendKind, BackingStore, BackingStoreProvisioner, CommandExecutor,
    CommandOutput, LogicalVolume, Lun, LunCreateRequest, LunStatus, VolumeGroup,
    VolumeGroupRegistry,
};

pub use error::{Error, ErrorClass, Result};

pub use host::SystemExecutor;
pub use lvm::LvmManager;
pub use metrics::ProvisionerMetrics;
pub use target::{AclManager, TargetCli};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
