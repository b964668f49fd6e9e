//! LVM backing store
//!
//! Carves a logical volume out of the requested volume group and formats it.
//! If formatting fails the volume is removed before the error is returned.

use super::sanitize_name;
use crate::domain::ports::{
    BackendKind, BackingStore, BackingStoreProvisioner, CommandExecutorRef,
    LogicalVolumeCreateRequest, LunCreateRequest,
};
use crate::error::{Error, Result};
use crate::lvm::LvmManager;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct LvmBackingStore {
    lvm: Arc<LvmManager>,
    executor: CommandExecutorRef,
    filesystem: String,
    max_name_len: usize,
}

impl LvmBackingStore {
    pub fn new(
        lvm: Arc<LvmManager>,
        executor: CommandExecutorRef,
        filesystem: String,
        max_name_len: usize,
    ) -> Self {
        Self {
            lvm,
            executor,
            filesystem,
            max_name_len,
        }
    }
}

#[async_trait]
impl BackingStoreProvisioner for LvmBackingStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Lvm
    }

    async fn create(&self, request: &LunCreateRequest) -> Result<BackingStore> {
        let volume_group = request
            .volume_group
            .as_deref()
            .map(str::trim)
            .filter(|vg| !vg.is_empty())
            .ok_or_else(|| Error::Validation("volume_group is required for lvm backend".into()))?;
        let name = sanitize_name(&request.name, self.max_name_len);
        if name.is_empty() {
            return Err(Error::Validation(format!(
                "name '{}' has no usable characters for a logical volume",
                request.name
            )));
        }

        let lv = self
            .lvm
            .create_logical_volume(&LogicalVolumeCreateRequest {
                name,
                volume_group: volume_group.to_string(),
                size_gb: request.size_gb,
            })
            .await?;

        let mkfs = format!("mkfs.{}", self.filesystem);
        if let Err(e) = self.executor.run_checked(&mkfs, &["-F", &lv.path]).await {
            warn!("Formatting {} failed, removing it: {}", lv.path, e);
            if let Err(cleanup) = self.lvm.remove_logical_volume(&lv.path).await {
                warn!("Rollback: failed to remove {}: {}", lv.path, cleanup);
            }
            return Err(e);
        }

        info!("Provisioned logical volume {} ({})", lv.path, self.filesystem);
        Ok(BackingStore {
            kind: BackendKind::Lvm,
            path: lv.path.clone(),
            lv_path: Some(lv.path),
        })
    }

    async fn destroy(&self, store: &BackingStore) -> Result<()> {
        match &store.lv_path {
            Some(path) => self.lvm.remove_logical_volume(path).await,
            None => Ok(()),
        }
    }
}
