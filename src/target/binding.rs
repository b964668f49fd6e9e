//! Target binding
//!
//! Wraps a backing store in a backstore object and exposes it as a numbered
//! LUN in the portal group. A bind that fails halfway removes the backstore
//! object it created.

use super::{backstore_name, lun_name, BackstoreType, TargetCli};
use crate::domain::ports::BackendKind;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Creates and removes LUN bindings
pub struct TargetBinder {
    targetcli: Arc<TargetCli>,
}

impl TargetBinder {
    pub fn new(targetcli: Arc<TargetCli>) -> Self {
        Self { targetcli }
    }

    /// Bind `backend_path` as LUN `number`, returning the backstore object path
    pub async fn bind(&self, number: u32, backend_path: &str, kind: BackendKind) -> Result<String> {
        let backstore = BackstoreType::for_kind(kind);
        let name = backstore_name(number);
        let object = backstore.object_path(number);

        self.targetcli
            .run(&backstore.root(), &["create", &name, backend_path])
            .await?;
        debug!("Created backstore {} -> {}", object, backend_path);

        if backstore == BackstoreType::Block {
            if let Err(e) = self.disable_unmap_emulation(&name).await {
                warn!("Could not disable emulate_tpu on {}: {}", name, e);
            }
        }

        let lun_arg = format!("lun={}", number);
        let created = self
            .targetcli
            .run(
                &self.targetcli.luns_path(),
                &["create", &object, &lun_arg, "add_mapped_luns=false"],
            )
            .await;

        if let Err(e) = created {
            warn!("Binding LUN {} failed, removing backstore {}", number, object);
            if let Err(cleanup) = self.delete_backstore(&object).await {
                warn!("Rollback: failed to delete backstore {}: {}", object, cleanup);
            }
            return Err(e);
        }

        info!("Bound {} as LUN {}", backend_path, number);
        Ok(object)
    }

    /// Remove the LUN entry only; the backstore object stays
    pub async fn unbind(&self, number: u32) -> Result<()> {
        self.targetcli
            .run(&self.targetcli.luns_path(), &["delete", &lun_name(number)])
            .await?;
        debug!("Removed LUN {}", number);
        Ok(())
    }

    /// Delete a backstore object by its full path
    pub async fn delete_backstore(&self, object: &str) -> Result<()> {
        let (parent, name) = object
            .rsplit_once('/')
            .filter(|(parent, name)| parent.starts_with("/backstores/") && !name.is_empty())
            .ok_or_else(|| Error::Validation(format!("not a backstore object: {}", object)))?;
        self.targetcli.run(parent, &["delete", name]).await?;
        debug!("Deleted backstore {}", object);
        Ok(())
    }

    /// Turn off thin-provisioning emulation on a block backstore.
    ///
    /// The attribute lives under `core/iblock_<N>/<name>/attrib` where `N` is
    /// assigned by the kernel, so the directory is found by glob.
    async fn disable_unmap_emulation(&self, name: &str) -> Result<()> {
        let config = self.targetcli.config();
        let pattern = format!(
            "{}/core/iblock_*/{}/attrib",
            config.configfs_root.trim_end_matches('/'),
            name
        );
        let attrib = glob::glob(&pattern)
            .map_err(|e| Error::Internal(format!("bad configfs pattern {}: {}", pattern, e)))?
            .filter_map(|entry| entry.ok())
            .next()
            .ok_or_else(|| Error::not_found("configfs attrib", name))?;

        let path = attrib.join("emulate_tpu");
        let path = path.to_string_lossy();
        self.targetcli
            .executor()
            .run_with_input_checked("tee", &[path.as_ref()], "0\n")
            .await?;
        debug!("Disabled emulate_tpu on {}", name);
        Ok(())
    }
}
