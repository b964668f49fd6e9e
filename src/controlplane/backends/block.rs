//! Raw block device backing store
//!
//! The device already exists, so creation only validates the path and
//! destruction only touches the device when it is itself a logical volume.

use crate::domain::ports::{BackendKind, BackingStore, BackingStoreProvisioner, LunCreateRequest};
use crate::error::{Error, Result};
use crate::lvm::LvmManager;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct BlockBackingStore {
    lvm: Arc<LvmManager>,
}

impl BlockBackingStore {
    pub fn new(lvm: Arc<LvmManager>) -> Self {
        Self { lvm }
    }
}

#[async_trait]
impl BackingStoreProvisioner for BlockBackingStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Block
    }

    async fn create(&self, request: &LunCreateRequest) -> Result<BackingStore> {
        let device = request
            .device_path
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| Error::Validation("device_path is required for block backend".into()))?;
        if !device.starts_with('/') {
            return Err(Error::Validation(format!(
                "device_path must be absolute: {}",
                device
            )));
        }

        debug!("Using block device {} as-is", device);
        Ok(BackingStore {
            kind: BackendKind::Block,
            path: device.to_string(),
            lv_path: None,
        })
    }

    async fn destroy(&self, store: &BackingStore) -> Result<()> {
        match &store.lv_path {
            Some(path) => self.lvm.remove_logical_volume(path).await,
            None => {
                debug!("Leaving block device {} in place", store.path);
                Ok(())
            }
        }
    }
}
