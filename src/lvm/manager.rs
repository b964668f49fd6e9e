//! Volume Group Manager
//!
//! Creates, lists and destroys volume groups and logical volumes through the
//! LVM command-line tools. Volume groups holding the host's own mounts are
//! hidden from listings and refused for mutation. Mutations are serialized
//! per volume group so name and capacity checks cannot race.

use crate::config::LvmConfig;
use crate::domain::ports::{
    gb_to_bytes, gb_to_mb, CommandExecutorRef, DeviceCandidate, LogicalVolume, LogicalVolumeCreateRequest,
    LvUsage, VolumeGroup, VolumeGroupCreateRequest, VolumeGroupRegistry,
};
use crate::error::{Error, Result};
use crate::host::parse::{self, lvm::LVS_ARGS, lvm::PVS_ARGS, lvm::VGS_ARGS, LvRow, PvRow, VgRow};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Validate a volume group or logical volume name
fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation(format!("{} name is required", kind)));
    }
    if name.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(Error::Validation(format!(
            "{} name cannot contain spaces or slashes: {}",
            kind, name
        )));
    }
    if name.starts_with('-') {
        return Err(Error::Validation(format!(
            "{} name cannot start with '-': {}",
            kind, name
        )));
    }
    Ok(())
}

/// Exclusive access to one volume group.
///
/// The lock entry is removed when its last holder releases it, so the map
/// only ever holds groups with operations in flight.
struct VgGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    vg: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for VgGuard<'_> {
    fn drop(&mut self) {
        // One handle in the map, one in our guard; more means waiters.
        self.locks
            .remove_if(&self.vg, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

/// LVM-backed volume manager
pub struct LvmManager {
    executor: CommandExecutorRef,
    config: LvmConfig,
    /// Per-volume-group mutation locks
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LvmManager {
    /// Create a new manager
    pub fn new(executor: CommandExecutorRef, config: LvmConfig) -> Arc<Self> {
        Arc::new(Self {
            executor,
            config,
            locks: DashMap::new(),
        })
    }

    /// Volume manager conventions in use
    pub fn config(&self) -> &LvmConfig {
        &self.config
    }

    async fn lock_vg(&self, vg: &str) -> VgGuard<'_> {
        let lock = self.locks.entry(vg.to_string()).or_default().clone();
        VgGuard {
            locks: &self.locks,
            vg: vg.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    // =========================================================================
    // Reports
    // =========================================================================

    /// Raw `vgs` report, empty when LVM is not installed
    pub async fn report_volume_groups(&self) -> Result<Vec<VgRow>> {
        match self.executor.run_checked("vgs", VGS_ARGS).await {
            Ok(text) => parse::parse_vgs(&text),
            Err(Error::ToolUnavailable { tool }) => {
                debug!("{} not available, reporting no volume groups", tool);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Raw `lvs` report, optionally limited to one volume group
    pub async fn report_logical_volumes(&self, vg: Option<&str>) -> Result<Vec<LvRow>> {
        let mut args = LVS_ARGS.to_vec();
        if let Some(vg) = vg {
            args.push(vg);
        }
        match self.executor.run_checked("lvs", &args).await {
            Ok(text) => parse::parse_lvs(&text),
            Err(Error::ToolUnavailable { .. }) if vg.is_none() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Raw `pvs` report
    pub async fn report_physical_volumes(&self) -> Result<Vec<PvRow>> {
        match self.executor.run_checked("pvs", PVS_ARGS).await {
            Ok(text) => Ok(parse::parse_pvs(&text)),
            Err(Error::ToolUnavailable { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Current mount point of a device, if mounted
    pub async fn mount_point(&self, device: &str) -> Result<Option<String>> {
        let out = self
            .executor
            .run("findmnt", &["-n", "-o", "TARGET", "--source", device])
            .await?;
        if !out.is_success() {
            return Ok(None);
        }
        Ok(out
            .output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string))
    }

    async fn is_system_vg(&self, vg: &str, lvs: &[LvRow]) -> Result<bool> {
        for lv in lvs.iter().filter(|lv| lv.vg == vg) {
            let path = self.config.lv_path(&lv.vg, &lv.name);
            if let Some(mount) = self.mount_point(&path).await? {
                if self.config.is_system_mount(&mount) {
                    debug!("Volume group {} holds system mount {}", vg, mount);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn describe(&self, row: &VgRow, lvs: &[LvRow], pvs: &[PvRow]) -> VolumeGroup {
        VolumeGroup {
            name: row.name.clone(),
            size: row.size,
            free: row.free,
            devices: pvs
                .iter()
                .filter(|pv| pv.vg.as_deref() == Some(row.name.as_str()))
                .map(|pv| pv.device.clone())
                .collect(),
            lv_count: lvs.iter().filter(|lv| lv.vg == row.name).count(),
        }
    }

    // =========================================================================
    // Volume Groups
    // =========================================================================

    /// Create a volume group from raw devices
    ///
    /// Each device is wiped of prior LVM signatures and registered as a
    /// physical volume. If any later step fails, the physical volumes created
    /// so far are unregistered again.
    pub async fn create_volume_group(&self, request: &VolumeGroupCreateRequest) -> Result<VolumeGroup> {
        validate_name("volume group", &request.name)?;
        if request.devices.is_empty() {
            return Err(Error::Validation("at least one device is required".into()));
        }

        let _guard = self.lock_vg(&request.name).await;

        if self.volume_group(&request.name).await?.is_some() {
            return Err(Error::exists("VolumeGroup", &request.name));
        }

        info!(
            "Creating volume group {} from {}",
            request.name,
            request.devices.join(", ")
        );

        for device in &request.devices {
            let out = self.executor.run("pvremove", &["-ff", "-y", device]).await?;
            if !out.is_success() && !out.output.contains("No physical volume label") {
                return Err(Error::CommandFailed {
                    command: format!("pvremove -ff -y {}", device),
                    status: out.status_text(),
                    output: out.output.trim().to_string(),
                });
            }
        }

        let mut registered: Vec<&str> = Vec::new();
        for device in &request.devices {
            if let Err(e) = self.executor.run_checked("pvcreate", &["-ff", "-y", device]).await {
                self.unregister_physical_volumes(&registered).await;
                return Err(e);
            }
            registered.push(device);
        }

        let mut args = vec![request.name.as_str()];
        args.extend(request.devices.iter().map(String::as_str));
        if let Err(e) = self.executor.run_checked("vgcreate", &args).await {
            self.unregister_physical_volumes(&registered).await;
            return Err(e);
        }

        info!("Created volume group {}", request.name);
        self.volume_group(&request.name).await?.ok_or_else(|| {
            Error::Internal(format!("volume group {} missing after create", request.name))
        })
    }

    async fn unregister_physical_volumes(&self, devices: &[&str]) {
        for device in devices.iter().rev() {
            if let Err(e) = self.executor.run_checked("pvremove", &["-ff", "-y", device]).await {
                warn!("Rollback: failed to remove physical volume {}: {}", device, e);
            }
        }
    }

    /// Delete a volume group and every logical volume in it
    pub async fn delete_volume_group(&self, name: &str) -> Result<()> {
        validate_name("volume group", name)?;
        let _guard = self.lock_vg(name).await;

        if self.volume_group(name).await?.is_none() {
            return Err(Error::not_found("VolumeGroup", name));
        }

        let lvs = self.report_logical_volumes(Some(name)).await?;
        if self.is_system_vg(name, &lvs).await? {
            return Err(Error::SystemVolumeGroup {
                name: name.to_string(),
            });
        }

        info!("Deleting volume group {} ({} logical volumes)", name, lvs.len());
        for lv in &lvs {
            self.remove_lv_unlocked(&self.config.lv_path(name, &lv.name)).await?;
        }

        self.executor.run_checked("vgremove", &["-ff", "-y", name]).await?;
        info!("Deleted volume group {}", name);
        Ok(())
    }

    /// Devices eligible for a new volume group
    ///
    /// Active md arrays and wholly unused physical disks: no parent, no
    /// partitions, no filesystem other than swap, not a RAID member, not
    /// already a physical volume and not mounted.
    pub async fn available_devices(&self) -> Result<Vec<DeviceCandidate>> {
        let mdstat = self.executor.run("cat", &["/proc/mdstat"]).await?;
        let arrays = if mdstat.is_success() {
            parse::parse_mdstat(&mdstat.output)
        } else {
            Vec::new()
        };
        let raid_members: BTreeSet<&str> = arrays
            .iter()
            .flat_map(|a| a.members.iter().map(String::as_str))
            .collect();
        let md_names: BTreeSet<&str> = arrays.iter().map(|a| a.name.as_str()).collect();

        let devices = parse::parse_lsblk(
            &self
                .executor
                .run_checked("lsblk", parse::lsblk::LSBLK_ARGS)
                .await?,
        );
        let physical: BTreeSet<String> = self
            .report_physical_volumes()
            .await?
            .into_iter()
            .map(|pv| pv.device)
            .collect();

        let dev_dir = self.config.device_dir.trim_end_matches('/');
        let mut seen = BTreeSet::new();
        let mut candidates = Vec::new();

        for dev in &devices {
            let path = format!("{}/{}", dev_dir, dev.name);
            let is_md = md_names.contains(dev.name.as_str());
            let has_children = devices
                .iter()
                .any(|other| other.parent.as_deref() == Some(dev.name.as_str()));
            let is_free_disk = dev.is_disk()
                && dev.parent.is_none()
                && !has_children
                && !raid_members.contains(dev.name.as_str())
                && matches!(dev.fstype.as_deref(), None | Some("swap"));

            if !(is_md || is_free_disk) || physical.contains(&path) {
                continue;
            }
            if matches!(dev.mount_point.as_deref(), Some(mp) if mp != "[SWAP]") {
                continue;
            }
            if !seen.insert(path.clone()) {
                continue;
            }

            candidates.push(DeviceCandidate {
                path,
                device_type: if is_md { "raid" } else { "disk" }.to_string(),
                mount_point: dev.mount_point.clone(),
            });
        }

        Ok(candidates)
    }

    // =========================================================================
    // Logical Volumes
    // =========================================================================

    fn usage_for(&self, mount_point: &str) -> LvUsage {
        if mount_point.is_empty() {
            LvUsage::Available
        } else if mount_point.starts_with(&self.config.pool_mount_prefix) {
            LvUsage::Pool
        } else {
            LvUsage::Mounted
        }
    }

    async fn to_logical_volume(&self, row: &LvRow) -> Result<LogicalVolume> {
        let path = self.config.lv_path(&row.vg, &row.name);
        let mount_point = self.mount_point(&path).await?.unwrap_or_default();
        Ok(LogicalVolume {
            name: row.name.clone(),
            volume_group: row.vg.clone(),
            size: row.size,
            used_for: self.usage_for(&mount_point),
            mount_point,
            path,
        })
    }

    /// Logical volumes in user-facing volume groups
    pub async fn list_logical_volumes(&self) -> Result<Vec<LogicalVolume>> {
        let visible: BTreeSet<String> = self
            .list_volume_groups()
            .await?
            .into_iter()
            .map(|vg| vg.name)
            .collect();

        let mut volumes = Vec::new();
        for row in self.report_logical_volumes(None).await? {
            if visible.contains(&row.vg) {
                volumes.push(self.to_logical_volume(&row).await?);
            }
        }
        Ok(volumes)
    }

    /// Create a logical volume, enforcing name uniqueness and free capacity
    pub async fn create_logical_volume(
        &self,
        request: &LogicalVolumeCreateRequest,
    ) -> Result<LogicalVolume> {
        validate_name("logical volume", &request.name)?;
        validate_name("volume group", &request.volume_group)?;
        if !request.size_gb.is_finite() || request.size_gb <= 0.0 {
            return Err(Error::Validation("size_gb must be greater than 0".into()));
        }
        let size_mb = gb_to_mb(request.size_gb);
        if size_mb == 0 {
            return Err(Error::Validation("size must be at least 1 MB".into()));
        }

        let vg_name = request.volume_group.as_str();
        let _guard = self.lock_vg(vg_name).await;

        let vg = self
            .volume_group(vg_name)
            .await?
            .ok_or_else(|| Error::not_found("VolumeGroup", vg_name))?;

        let existing = self.report_logical_volumes(Some(vg_name)).await?;
        if existing.iter().any(|lv| lv.name == request.name) {
            return Err(Error::exists(
                "LogicalVolume",
                format!("{}/{}", vg_name, request.name),
            ));
        }
        if self.is_system_vg(vg_name, &existing).await? {
            return Err(Error::SystemVolumeGroup {
                name: vg_name.to_string(),
            });
        }

        let required = gb_to_bytes(request.size_gb).unwrap_or(u64::MAX);
        if required > vg.free {
            return Err(Error::InsufficientCapacity {
                requested: required,
                available: vg.free,
            });
        }

        info!(
            "Creating logical volume {}/{} ({} MB)",
            vg_name, request.name, size_mb
        );
        let size_arg = format!("{}M", size_mb);
        self.executor
            .run_checked(
                "lvcreate",
                &["-y", "-W", "y", "-L", &size_arg, "-n", &request.name, vg_name],
            )
            .await?;

        let created = self
            .report_logical_volumes(Some(vg_name))
            .await?
            .into_iter()
            .find(|lv| lv.name == request.name);
        let size = created.map(|lv| lv.size).unwrap_or(required);

        Ok(LogicalVolume {
            name: request.name.clone(),
            path: self.config.lv_path(vg_name, &request.name),
            volume_group: vg_name.to_string(),
            size,
            mount_point: String::new(),
            used_for: LvUsage::Available,
        })
    }

    /// Delete a logical volume by volume group and name
    pub async fn delete_logical_volume(&self, vg: &str, name: &str) -> Result<()> {
        validate_name("volume group", vg)?;
        validate_name("logical volume", name)?;
        if self.volume_group(vg).await?.is_none() {
            return Err(Error::not_found("VolumeGroup", vg));
        }
        let _guard = self.lock_vg(vg).await;

        let exists = self
            .report_logical_volumes(Some(vg))
            .await?
            .iter()
            .any(|lv| lv.name == name);
        if !exists {
            return Err(Error::not_found("LogicalVolume", format!("{}/{}", vg, name)));
        }

        self.remove_lv_unlocked(&self.config.lv_path(vg, name)).await
    }

    /// Remove a logical volume by device path
    pub async fn remove_logical_volume(&self, path: &str) -> Result<()> {
        let (vg, _) = self.config.split_lv_path(path).ok_or_else(|| {
            Error::Validation(format!("not a logical volume path: {}", path))
        })?;
        let _guard = self.lock_vg(vg).await;
        self.remove_lv_unlocked(path).await
    }

    /// Unmount (plain, then lazy) if needed and remove
    async fn remove_lv_unlocked(&self, path: &str) -> Result<()> {
        if let Some(mount) = self.mount_point(path).await? {
            info!("Logical volume {} is mounted at {}, unmounting", path, mount);
            if let Err(e) = self.executor.run_checked("umount", &[&mount]).await {
                warn!("umount {} failed ({}), trying lazy unmount", mount, e);
                self.executor.run_checked("umount", &["-l", &mount]).await?;
            }
        }

        self.executor.run_checked("lvremove", &["-f", "-y", path]).await?;
        info!("Removed logical volume {}", path);
        Ok(())
    }

    /// Resize a logical volume and the ext filesystem on it
    ///
    /// Growing extends the volume first; shrinking shrinks the filesystem
    /// first so no data lives past the new end.
    pub async fn resize_logical_volume(&self, vg: &str, name: &str, size_gb: f64) -> Result<u64> {
        if !size_gb.is_finite() || size_gb <= 0.0 {
            return Err(Error::Validation("size_gb must be greater than 0".into()));
        }
        let size_mb = gb_to_mb(size_gb);
        if size_mb == 0 {
            return Err(Error::Validation("size must be at least 1 MB".into()));
        }
        if self.volume_group(vg).await?.is_none() {
            return Err(Error::not_found("VolumeGroup", vg));
        }

        let _guard = self.lock_vg(vg).await;

        let lv = self
            .report_logical_volumes(Some(vg))
            .await?
            .into_iter()
            .find(|lv| lv.name == name)
            .ok_or_else(|| Error::not_found("LogicalVolume", format!("{}/{}", vg, name)))?;
        let group = self
            .volume_group(vg)
            .await?
            .ok_or_else(|| Error::not_found("VolumeGroup", vg))?;

        let target = gb_to_bytes(size_gb).unwrap_or(u64::MAX);
        if target > lv.size && target - lv.size > group.free {
            return Err(Error::InsufficientCapacity {
                requested: target - lv.size,
                available: group.free,
            });
        }

        let path = self.config.lv_path(vg, name);
        let size_arg = format!("{}M", size_mb);
        let lv_arg = format!("{}/{}", vg, name);

        info!("Resizing {} from {} to {} bytes", path, lv.size, target);
        if target >= lv.size {
            self.executor
                .run_checked("lvresize", &["-f", "-L", &size_arg, &lv_arg])
                .await?;
            self.executor.run_checked("resize2fs", &[&path]).await?;
        } else {
            self.executor
                .run_checked("resize2fs", &["-f", &path, &size_arg])
                .await?;
            self.executor
                .run_checked("lvresize", &["-f", "-L", &size_arg, &lv_arg])
                .await?;
        }
        Ok(target)
    }
}

#[async_trait]
impl VolumeGroupRegistry for LvmManager {
    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroup>> {
        let rows = self.report_volume_groups().await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let lvs = self.report_logical_volumes(None).await?;
        let pvs = self.report_physical_volumes().await?;

        let mut groups = Vec::new();
        for row in &rows {
            if self.is_system_vg(&row.name, &lvs).await? {
                continue;
            }
            groups.push(self.describe(row, &lvs, &pvs));
        }
        Ok(groups)
    }

    async fn volume_group(&self, name: &str) -> Result<Option<VolumeGroup>> {
        let Some(row) = self
            .report_volume_groups()
            .await?
            .into_iter()
            .find(|vg| vg.name == name)
        else {
            return Ok(None);
        };
        let lvs = self.report_logical_volumes(Some(name)).await?;
        let pvs = self.report_physical_volumes().await?;
        Ok(Some(self.describe(&row, &lvs, &pvs)))
    }
}
