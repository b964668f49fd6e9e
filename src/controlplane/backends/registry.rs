//! Backend availability
//!
//! Describes each backend kind with the resources a caller could use for it
//! right now. Read-only; a resource that cannot be inspected makes its
//! backend unavailable rather than failing the query.

use crate::config::{BackendConfig, LvmConfig};
use crate::domain::ports::{BackendInfo, BackendKind, CommandExecutorRef, VolumeGroupRegistry};
use crate::error::Result;
use crate::host::parse;
use crate::lvm::LvmManager;
use crate::target::TargetCli;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

pub struct BackendRegistry {
    executor: CommandExecutorRef,
    lvm: Arc<LvmManager>,
    targetcli: Arc<TargetCli>,
    lvm_config: LvmConfig,
    backends: BackendConfig,
}

impl BackendRegistry {
    pub fn new(
        executor: CommandExecutorRef,
        lvm: Arc<LvmManager>,
        targetcli: Arc<TargetCli>,
        lvm_config: LvmConfig,
        backends: BackendConfig,
    ) -> Self {
        Self {
            executor,
            lvm,
            targetcli,
            lvm_config,
            backends,
        }
    }

    /// One entry per backend kind, in presentation order
    pub async fn list_backends(&self) -> Vec<BackendInfo> {
        let mut infos = Vec::with_capacity(BackendKind::ALL.len());
        for kind in BackendKind::ALL {
            let resources = match kind {
                BackendKind::Lvm => self.volume_groups_with_space().await,
                BackendKind::Block => self.unused_block_devices().await,
                BackendKind::Fileio => Ok(vec![self.backends.backstore_dir.clone()]),
            };
            let resources = resources.unwrap_or_else(|e| {
                warn!("Could not inspect resources for {} backend: {}", kind, e);
                Vec::new()
            });
            infos.push(describe(kind, resources));
        }
        infos
    }

    async fn volume_groups_with_space(&self) -> Result<Vec<String>> {
        Ok(self
            .lvm
            .list_volume_groups()
            .await?
            .into_iter()
            .filter(|vg| vg.free > 0)
            .map(|vg| vg.name)
            .collect())
    }

    /// Whole disks and RAID arrays with no mount, no filesystem, no
    /// partitions, and no existing LUN or physical volume on them
    async fn unused_block_devices(&self) -> Result<Vec<String>> {
        let text = self
            .executor
            .run_checked("lsblk", parse::lsblk::LSBLK_ARGS)
            .await?;
        let devices = parse::parse_lsblk(&text);

        let mut in_use: BTreeSet<String> = self
            .targetcli
            .list_luns()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(|binding| binding.device)
            .collect();
        in_use.extend(
            self.lvm
                .report_physical_volumes()
                .await?
                .into_iter()
                .map(|pv| pv.device),
        );

        let dev_dir = self.lvm_config.device_dir.trim_end_matches('/');
        let mut seen = BTreeSet::new();
        let mut paths = Vec::new();
        for dev in &devices {
            let has_children = devices
                .iter()
                .any(|other| other.parent.as_deref() == Some(dev.name.as_str()));
            let eligible = (dev.is_disk() || dev.is_raid())
                && dev.mount_point.is_none()
                && dev.fstype.is_none()
                && !has_children;
            let path = format!("{}/{}", dev_dir, dev.name);
            if eligible && !in_use.contains(&path) && seen.insert(path.clone()) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

fn describe(kind: BackendKind, resources: Vec<String>) -> BackendInfo {
    let (name, description) = match kind {
        BackendKind::Lvm => (
            "LVM Logical Volume",
            "Creates a new formatted logical volume in a volume group",
        ),
        BackendKind::Block => (
            "Block Device",
            "Exports an existing unused disk or RAID array directly",
        ),
        BackendKind::Fileio => (
            "File Backed",
            "Creates a sparse image file in the backstore directory",
        ),
    };
    BackendInfo {
        kind,
        name: name.to_string(),
        description: description.to_string(),
        available: !resources.is_empty(),
        resources,
    }
}
