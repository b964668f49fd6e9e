//! Provisioning Orchestrator
//!
//! Coordinates the full LUN lifecycle:
//! - Target readiness before every create and delete
//! - Backing store creation per backend kind
//! - LUN number allocation and binding under a per-target lock
//! - Initiator ACL grants
//! - Compensating rollback when any hard step fails
//!
//! The host's volume manager and target subsystem are the only source of
//! truth; listings are re-derived from them on every call.

use crate::config::OrchestratorConfig;
use crate::controlplane::backends::{BackendContext, BackendFactory, BackendRegistry};
use crate::controlplane::saga::Saga;
use crate::domain::ports::{
    BackendInfo, BackendKind, BackingStore, BackingStoreProvisionerRef, CommandExecutorRef, Lun,
    gb_to_bytes, LunCreateRequest, LunStatus, VolumeGroupRegistry, BYTES_PER_GB,
};
use crate::error::{Error, Result};
use crate::host::parse::{LunBinding, LvRow};
use crate::lvm::LvmManager;
use crate::metrics::ProvisionerMetrics;
use crate::target::{
    AclManager, BackstoreType, LunAllocator, TargetBinder, TargetCli, TargetGuard,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

// =============================================================================
// Provision Stages
// =============================================================================

/// Stages a single LUN provisioning attempt moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProvisionStage {
    Absent,
    Guarded,
    BackendProvisioned,
    Numbered,
    Bound,
    AclConfigured,
    Active,
}

impl std::fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProvisionStage::Absent => "absent",
            ProvisionStage::Guarded => "guarded",
            ProvisionStage::BackendProvisioned => "backend-provisioned",
            ProvisionStage::Numbered => "numbered",
            ProvisionStage::Bound => "bound",
            ProvisionStage::AclConfigured => "acl-configured",
            ProvisionStage::Active => "active",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Orchestrates LUN provisioning against the host storage stack
pub struct Orchestrator {
    config: OrchestratorConfig,
    lvm: Arc<LvmManager>,
    targetcli: Arc<TargetCli>,
    guard: TargetGuard,
    allocator: LunAllocator,
    binder: TargetBinder,
    acls: AclManager,
    registry: BackendRegistry,
    backend_ctx: BackendContext,
    metrics: Arc<ProvisionerMetrics>,
    /// Serializes number allocation through binding and ACL setup
    target_lock: Mutex<()>,
}

impl Orchestrator {
    /// Create a new orchestrator over a command executor
    pub fn new(
        config: OrchestratorConfig,
        executor: CommandExecutorRef,
        metrics: Arc<ProvisionerMetrics>,
    ) -> Arc<Self> {
        let lvm = LvmManager::new(executor.clone(), config.lvm.clone());
        let targetcli = TargetCli::new(executor.clone(), config.target.clone());
        let registry = BackendRegistry::new(
            executor.clone(),
            lvm.clone(),
            targetcli.clone(),
            config.lvm.clone(),
            config.backends.clone(),
        );
        let backend_ctx = BackendContext {
            executor,
            lvm: lvm.clone(),
            lvm_config: config.lvm.clone(),
            backends: config.backends.clone(),
        };

        Arc::new(Self {
            guard: TargetGuard::new(targetcli.clone()),
            allocator: LunAllocator::new(targetcli.clone()),
            binder: TargetBinder::new(targetcli.clone()),
            acls: AclManager::new(targetcli.clone()),
            config,
            lvm,
            targetcli,
            registry,
            backend_ctx,
            metrics,
            target_lock: Mutex::new(()),
        })
    }

    /// Prepare the target at startup
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing orchestrator for target {}", self.config.target.iqn);
        self.guard.ensure_ready().await?;
        info!("Orchestrator initialized successfully");
        Ok(())
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Volume group and logical volume operations
    pub fn lvm(&self) -> &Arc<LvmManager> {
        &self.lvm
    }

    /// Initiator ACL operations
    pub fn acls(&self) -> &AclManager {
        &self.acls
    }

    pub fn metrics(&self) -> &Arc<ProvisionerMetrics> {
        &self.metrics
    }

    fn provisioner(&self, kind: BackendKind) -> BackingStoreProvisionerRef {
        BackendFactory::create(kind, &self.backend_ctx)
    }

    /// Backend kinds and their currently usable resources
    pub async fn list_backends(&self) -> Vec<BackendInfo> {
        self.registry.list_backends().await
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a LUN: backing store, number, binding and ACLs.
    ///
    /// Either the LUN ends up active or everything created for it is
    /// removed again. ACL grant failures are logged and leave the LUN active.
    ///
    /// Provisioning runs in its own task. If the caller stops waiting, the
    /// task rolls back at its next step instead of leaving a half-built LUN.
    pub async fn create_lun(self: &Arc<Self>, request: LunCreateRequest) -> Result<Lun> {
        let kind = request.validate()?;
        for initiator in &request.allowed_initiators {
            crate::target::acl::validate_initiator(initiator)?;
        }

        info!(
            "Creating LUN '{}' ({} GB, {} backend)",
            request.name, request.size_gb, kind
        );
        let (_waiting, mut caller) = oneshot::channel::<()>();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let started = Instant::now();
            let result = this.provision(kind, &request, &mut caller).await;
            this.metrics
                .record_provision(kind, result.is_ok(), started.elapsed());

            match &result {
                Ok(lun) => info!(
                    "Created LUN {} '{}' on {}",
                    lun.number, lun.name, lun.backend_path
                ),
                Err(e) => error!("Failed to create LUN '{}': {}", request.name, e),
            }
            result
        });

        task.await
            .map_err(|e| Error::Internal(format!("LUN create task failed: {}", e)))?
    }

    async fn provision(
        &self,
        kind: BackendKind,
        request: &LunCreateRequest,
        caller: &mut oneshot::Receiver<()>,
    ) -> Result<Lun> {
        let mut stage = ProvisionStage::Absent;

        self.guard.ensure_ready().await?;
        advance(&mut stage, ProvisionStage::Guarded, &request.name);
        if abandoned(caller) {
            return Err(caller_gone());
        }

        let provisioner = self.provisioner(kind);
        let store = provisioner.create(request).await?;
        advance(&mut stage, ProvisionStage::BackendProvisioned, &request.name);

        let mut saga = Saga::new(format!("LUN '{}'", request.name));
        {
            let provisioner = provisioner.clone();
            let store = store.clone();
            saga.push("destroy backing store", async move {
                provisioner.destroy(&store).await
            });
        }

        if abandoned(caller) {
            return Err(self.unwind(saga, stage, caller_gone()).await);
        }

        let _target = self.target_lock.lock().await;
        if abandoned(caller) {
            return Err(self.unwind(saga, stage, caller_gone()).await);
        }

        let number = match self.allocator.next_lun_number().await {
            Ok(number) => number,
            Err(e) => return Err(self.unwind(saga, stage, e).await),
        };
        advance(&mut stage, ProvisionStage::Numbered, &request.name);

        let backstore = match self.binder.bind(number, &store.path, kind).await {
            Ok(backstore) => backstore,
            Err(e) => return Err(self.unwind(saga, stage, e).await),
        };
        advance(&mut stage, ProvisionStage::Bound, &request.name);

        if abandoned(caller) {
            let binder = &self.binder;
            let object = backstore.clone();
            saga.push("unbind LUN", async move {
                binder.unbind(number).await?;
                binder.delete_backstore(&object).await
            });
            return Err(self.unwind(saga, stage, caller_gone()).await);
        }
        saga.commit();

        for initiator in &request.allowed_initiators {
            if let Err(e) = self.acls.set_lun_acl(number, initiator).await {
                warn!(
                    "LUN {} is active but ACL for {} failed: {}",
                    number, initiator, e
                );
                self.metrics.record_acl_failure();
            }
        }
        advance(&mut stage, ProvisionStage::AclConfigured, &request.name);
        advance(&mut stage, ProvisionStage::Active, &request.name);

        let (volume_group, lv_size_bytes) = match (&store.lv_path, &request.volume_group) {
            (Some(_), Some(vg)) => (Some(vg.trim().to_string()), gb_to_bytes(request.size_gb)),
            _ => (None, None),
        };

        Ok(Lun {
            number,
            name: request.name.clone(),
            size_gb: request.size_gb,
            backend_kind: kind,
            backend_path: store.path.clone(),
            backstore,
            lv_path: store.lv_path.clone(),
            volume_group,
            lv_size_bytes,
            lv_data_percent: None,
            allowed_initiators: request.allowed_initiators.clone(),
            status: LunStatus::Active,
            created_at: chrono::Utc::now(),
        })
    }

    async fn unwind(&self, saga: Saga<'_>, stage: ProvisionStage, error: Error) -> Error {
        warn!("Provisioning failed after stage {}: {}", stage, error);
        let report = saga.rollback().await;
        self.metrics.record_rollback(report.is_complete());
        if !report.is_complete() {
            error!(
                "Rollback incomplete, manual cleanup needed for: {}",
                report.failed.join(", ")
            );
        }
        error
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a LUN: unbind, delete its backstore, destroy its backing store.
    ///
    /// Stops at the first failing step so a backing store still referenced by
    /// the target is never destroyed. Runs to completion in its own task even
    /// if the caller stops waiting.
    pub async fn delete(self: &Arc<Self>, lun: &Lun) -> Result<()> {
        info!("Deleting LUN {} '{}'", lun.number, lun.name);
        let this = Arc::clone(self);
        let lun = lun.clone();
        let task = tokio::spawn(async move {
            let result = this.teardown(&lun).await;
            this.metrics.record_deletion(result.is_ok());
            match &result {
                Ok(()) => info!("Deleted LUN {}", lun.number),
                Err(e) => error!("Failed to delete LUN {}: {}", lun.number, e),
            }
            result
        });

        task.await
            .map_err(|e| Error::Internal(format!("LUN delete task failed: {}", e)))?
    }

    async fn teardown(&self, lun: &Lun) -> Result<()> {
        self.guard.ensure_ready().await?;

        {
            let _target = self.target_lock.lock().await;
            self.binder.unbind(lun.number).await?;

            let backstore = if lun.backstore.is_empty() {
                BackstoreType::for_kind(lun.backend_kind).object_path(lun.number)
            } else {
                lun.backstore.clone()
            };
            self.binder.delete_backstore(&backstore).await?;
        }

        let store = BackingStore {
            kind: lun.backend_kind,
            path: lun.backend_path.clone(),
            lv_path: lun.lv_path.clone(),
        };
        self.provisioner(lun.backend_kind).destroy(&store).await
    }

    /// Delete a LUN by number, re-deriving it from live state
    pub async fn delete_lun(self: &Arc<Self>, number: u32) -> Result<()> {
        let lun = self
            .get_lun(number)
            .await?
            .ok_or_else(|| Error::not_found("Lun", number.to_string()))?;
        self.delete(&lun).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Every LUN bound in the portal group
    pub async fn list_luns(&self) -> Result<Vec<Lun>> {
        let bindings = self.targetcli.list_luns().await?;
        if bindings.is_empty() {
            return Ok(Vec::new());
        }

        let lvs = self.lvm.report_logical_volumes(None).await?;
        let acls = self.acls.list_acls().await.unwrap_or_else(|e| {
            warn!("Could not list ACLs: {}", e);
            Vec::new()
        });

        let mut luns = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            let mut lun = self.describe_binding(binding, &lvs).await;
            lun.allowed_initiators = acls
                .iter()
                .filter(|acl| acl.maps_lun(binding.number))
                .map(|acl| acl.initiator.clone())
                .collect();
            luns.push(lun);
        }
        Ok(luns)
    }

    /// One LUN by number
    pub async fn get_lun(&self, number: u32) -> Result<Option<Lun>> {
        Ok(self
            .list_luns()
            .await?
            .into_iter()
            .find(|lun| lun.number == number))
    }

    async fn describe_binding(&self, binding: &LunBinding, lvs: &[LvRow]) -> Lun {
        let device = binding.device.clone().unwrap_or_default();
        let lv = lvs.iter().find(|lv| {
            !device.is_empty()
                && (lv.path == device || self.config.lvm.lv_path(&lv.vg, &lv.name) == device)
        });

        let (kind, name, size_bytes) = if binding.backstore_type == "fileio" {
            let stem = std::path::Path::new(&device)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| device.clone());
            (BackendKind::Fileio, stem, self.size_of("stat", &["-c", "%s"], &device).await)
        } else if let Some(lv) = lv {
            (BackendKind::Lvm, lv.name.clone(), Some(lv.size))
        } else {
            (
                BackendKind::Block,
                device.clone(),
                self.size_of("blockdev", &["--getsize64"], &device).await,
            )
        };

        Lun {
            number: binding.number,
            name,
            size_gb: size_bytes.map(|b| b as f64 / BYTES_PER_GB as f64).unwrap_or(0.0),
            backend_kind: kind,
            backend_path: device.clone(),
            backstore: binding.backstore_path(),
            lv_path: lv.map(|_| device.clone()),
            volume_group: lv.map(|lv| lv.vg.clone()),
            lv_size_bytes: lv.map(|lv| lv.size),
            lv_data_percent: lv.and_then(|lv| lv.data_percent),
            allowed_initiators: Vec::new(),
            status: LunStatus::Active,
            created_at: chrono::Utc::now(),
        }
    }

    /// Size in bytes reported by a stat-like tool; informational only
    async fn size_of(&self, program: &str, args: &[&str], path: &str) -> Option<u64> {
        if path.is_empty() {
            return None;
        }
        let mut argv = args.to_vec();
        argv.push(path);
        match self.backend_ctx.executor.run_checked(program, &argv).await {
            Ok(text) => text.trim().parse().ok(),
            Err(e) => {
                debug!("Could not size {}: {}", path, e);
                None
            }
        }
    }

    // =========================================================================
    // Resize
    // =========================================================================

    /// Resize an LVM-backed LUN's volume and filesystem
    pub async fn resize_lun(&self, number: u32, size_gb: f64) -> Result<Lun> {
        let lun = self
            .get_lun(number)
            .await?
            .ok_or_else(|| Error::not_found("Lun", number.to_string()))?;
        if lun.backend_kind != BackendKind::Lvm {
            return Err(Error::Validation(format!(
                "LUN {} is {}-backed; only lvm LUNs can be resized",
                number, lun.backend_kind
            )));
        }
        let path = lun.lv_path.as_deref().unwrap_or(&lun.backend_path);
        let (vg, lv) = self
            .config
            .lvm
            .split_lv_path(path)
            .ok_or_else(|| Error::Internal(format!("cannot split logical volume path {}", path)))?;

        info!("Resizing LUN {} to {} GB", number, size_gb);
        self.lvm.resize_logical_volume(vg, lv, size_gb).await?;

        self.get_lun(number)
            .await?
            .ok_or_else(|| Error::not_found("Lun", number.to_string()))
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Summary of target and volume state
    pub async fn status(&self) -> OrchestratorStatus {
        let target_ready = self.targetcli.target_exists().await.unwrap_or(false);
        let lun_count = match self.targetcli.list_luns().await {
            Ok(luns) => luns.len(),
            Err(_) => 0,
        };
        let volume_group_count = match self.lvm.list_volume_groups().await {
            Ok(groups) => groups.len(),
            Err(_) => 0,
        };

        OrchestratorStatus {
            healthy: target_ready,
            target_iqn: self.config.target.iqn.clone(),
            target_ready,
            lun_count: lun_count as u64,
            volume_group_count: volume_group_count as u64,
        }
    }
}

fn advance(stage: &mut ProvisionStage, next: ProvisionStage, name: &str) {
    debug!("LUN '{}': {} -> {}", name, stage, next);
    *stage = next;
}

/// The caller dropped its side of the create
fn abandoned(caller: &mut oneshot::Receiver<()>) -> bool {
    matches!(caller.try_recv(), Err(TryRecvError::Closed))
}

fn caller_gone() -> Error {
    Error::Internal("LUN create abandoned by caller".into())
}

/// Orchestrator status summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub healthy: bool,
    pub target_iqn: String,
    pub target_ready: bool,
    pub lun_count: u64,
    pub volume_group_count: u64,
}
