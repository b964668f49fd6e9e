//! Backing Store Provisioners
//!
//! One provisioner per backend kind:
//! - LVM: a new logical volume, formatted
//! - Block: an existing device, used as-is
//! - Fileio: a sparse file under the backstore directory

pub mod block;
pub mod fileio;
pub mod lvm;
pub mod registry;

pub use block::BlockBackingStore;
pub use fileio::FileBackingStore;
pub use lvm::LvmBackingStore;
pub use registry::BackendRegistry;

use crate::config::{BackendConfig, LvmConfig};
use crate::domain::ports::{BackendKind, BackingStoreProvisionerRef, CommandExecutorRef};
use crate::lvm::LvmManager;
use std::sync::Arc;

/// Reduce a display name to `[a-z0-9_]`, capped at `max_len` characters
pub fn sanitize_name(name: &str, max_len: usize) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' | '-' | '.' | ':' => '_',
            other => other,
        })
        .take(max_len)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Shared handles the provisioners are built from
#[derive(Clone)]
pub struct BackendContext {
    pub executor: CommandExecutorRef,
    pub lvm: Arc<LvmManager>,
    pub lvm_config: LvmConfig,
    pub backends: BackendConfig,
}

/// Factory for backing store provisioners
pub struct BackendFactory;

impl BackendFactory {
    /// Create the provisioner for a backend kind
    pub fn create(kind: BackendKind, ctx: &BackendContext) -> BackingStoreProvisionerRef {
        match kind {
            BackendKind::Lvm => Arc::new(LvmBackingStore::new(
                ctx.lvm.clone(),
                ctx.executor.clone(),
                ctx.lvm_config.filesystem.clone(),
                ctx.backends.max_name_len,
            )),
            BackendKind::Block => Arc::new(BlockBackingStore::new(ctx.lvm.clone())),
            BackendKind::Fileio => Arc::new(FileBackingStore::new(
                ctx.executor.clone(),
                ctx.backends.clone(),
            )),
        }
    }
}
