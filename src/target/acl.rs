//! Initiator access control
//!
//! The portal group runs with `generate_node_acls=0`, so an initiator only
//! sees LUNs explicitly mapped into its ACL. targetcli auto-maps every
//! existing LUN into a freshly created ACL; those mappings are swept away so
//! that access is only what was asked for.

use super::{is_missing_path, TargetCli};
use crate::domain::ports::AclEntry;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Passes made over a new ACL to remove auto-mapped LUNs
const SWEEP_PASSES: usize = 3;

/// Validate an initiator IQN or EUI name
pub fn validate_initiator(initiator: &str) -> Result<()> {
    let valid = (initiator.starts_with("iqn.") || initiator.starts_with("eui."))
        && !initiator.chars().any(|c| c.is_whitespace() || c == '/');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInitiator(initiator.to_string()))
    }
}

fn is_already_exists(output: &str) -> bool {
    output.contains("already exists")
}

fn is_missing_mapping(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("not found") || lower.contains("cannot find") || lower.contains("no such")
}

/// Manages initiator ACLs and their LUN mappings
pub struct AclManager {
    targetcli: Arc<TargetCli>,
}

impl AclManager {
    pub fn new(targetcli: Arc<TargetCli>) -> Self {
        Self { targetcli }
    }

    /// All ACLs in the portal group
    pub async fn list_acls(&self) -> Result<Vec<AclEntry>> {
        self.targetcli.list_acls().await
    }

    /// One ACL by initiator name
    pub async fn acl(&self, initiator: &str) -> Result<Option<AclEntry>> {
        Ok(self
            .list_acls()
            .await?
            .into_iter()
            .find(|acl| acl.initiator == initiator))
    }

    /// ACLs that expose the given LUN
    pub async fn acls_for_lun(&self, lun: u32) -> Result<Vec<AclEntry>> {
        Ok(self
            .list_acls()
            .await?
            .into_iter()
            .filter(|acl| acl.maps_lun(lun))
            .collect())
    }

    /// Create a new, empty ACL; an existing ACL is an error
    pub async fn create_acl(&self, initiator: &str) -> Result<AclEntry> {
        validate_initiator(initiator)?;
        if self.acl(initiator).await?.is_some() {
            return Err(Error::exists("Acl", initiator));
        }
        self.targetcli
            .run(&self.targetcli.acls_path(), &["create", initiator])
            .await?;
        info!("Created ACL for {}", initiator);
        self.sweep_auto_mappings(initiator).await?;

        Ok(AclEntry {
            initiator: initiator.to_string(),
            mapped_luns: Vec::new(),
        })
    }

    /// Create the ACL if missing; returns whether it was created
    pub async fn ensure_acl(&self, initiator: &str) -> Result<bool> {
        validate_initiator(initiator)?;
        let out = self
            .targetcli
            .exec(&self.targetcli.acls_path(), &["create", initiator])
            .await?;
        if out.is_success() {
            info!("Created ACL for {}", initiator);
            self.sweep_auto_mappings(initiator).await?;
            return Ok(true);
        }
        if is_already_exists(&out.output) {
            debug!("ACL for {} already exists", initiator);
            return Ok(false);
        }
        Err(Error::CommandFailed {
            command: format!("targetcli {} create {}", self.targetcli.acls_path(), initiator),
            status: out.status_text(),
            output: out.output.trim().to_string(),
        })
    }

    /// Remove every mapping targetcli added when the ACL was created
    async fn sweep_auto_mappings(&self, initiator: &str) -> Result<()> {
        let path = self.targetcli.acl_path(initiator);
        for pass in 0..SWEEP_PASSES {
            let listing = self.targetcli.run(&path, &["ls"]).await?;
            let mapped: Vec<u32> = crate::host::parse::parse_acl_listing(&listing)
                .into_iter()
                .flat_map(|acl| acl.mapped_luns)
                .map(|m| m.mapped_lun)
                .collect();
            if mapped.is_empty() {
                return Ok(());
            }
            debug!(
                "Sweep {} for {}: removing {} auto-mapped LUNs",
                pass + 1,
                initiator,
                mapped.len()
            );
            for mapped_lun in mapped {
                self.unmap_lun(initiator, mapped_lun).await?;
            }
        }
        Ok(())
    }

    /// Delete an ACL
    pub async fn delete_acl(&self, initiator: &str) -> Result<()> {
        validate_initiator(initiator)?;
        let out = self
            .targetcli
            .exec(&self.targetcli.acls_path(), &["delete", initiator])
            .await?;
        if out.is_success() {
            info!("Deleted ACL for {}", initiator);
            return Ok(());
        }
        if is_missing_mapping(&out.output) || is_missing_path(&out.output) {
            return Err(Error::not_found("Acl", initiator));
        }
        Err(Error::CommandFailed {
            command: format!("targetcli {} delete {}", self.targetcli.acls_path(), initiator),
            status: out.status_text(),
            output: out.output.trim().to_string(),
        })
    }

    /// Map `lun` into an initiator's ACL as `mapped_lun` (defaults to `lun`).
    ///
    /// An identical mapping is left alone; a mapping slot that points at a
    /// different LUN is replaced.
    pub async fn map_lun(&self, initiator: &str, lun: u32, mapped_lun: Option<u32>) -> Result<()> {
        validate_initiator(initiator)?;
        let mapped_lun = mapped_lun.unwrap_or(lun);
        let acl = self
            .acl(initiator)
            .await?
            .ok_or_else(|| Error::not_found("Acl", initiator))?;

        if let Some(existing) = acl.mapped_luns.iter().find(|m| m.mapped_lun == mapped_lun) {
            if existing.target_lun == Some(lun) {
                debug!("{} already maps LUN {} as {}", initiator, lun, mapped_lun);
                return Ok(());
            }
            warn!(
                "{} mapped LUN {} points at {:?}, replacing with LUN {}",
                initiator, mapped_lun, existing.target_lun, lun
            );
            self.unmap_lun(initiator, mapped_lun).await?;
        }

        let mapped_arg = format!("mapped_lun={}", mapped_lun);
        let target_arg = format!("tpg_lun_or_backstore=lun{}", lun);
        self.targetcli
            .run(
                &self.targetcli.acl_path(initiator),
                &["create", &mapped_arg, &target_arg],
            )
            .await?;
        info!("Mapped LUN {} to {} as {}", lun, initiator, mapped_lun);
        Ok(())
    }

    /// Remove a mapped LUN from an ACL; a mapping that is already gone is fine
    pub async fn unmap_lun(&self, initiator: &str, mapped_lun: u32) -> Result<()> {
        let mapped = mapped_lun.to_string();
        let path = self.targetcli.acl_path(initiator);
        let out = self.targetcli.exec(&path, &["delete", &mapped]).await?;
        if out.is_success() || is_missing_mapping(&out.output) {
            return Ok(());
        }
        Err(Error::CommandFailed {
            command: format!("targetcli {} delete {}", path, mapped),
            status: out.status_text(),
            output: out.output.trim().to_string(),
        })
    }

    /// Grant an initiator access to a LUN, creating its ACL when needed
    pub async fn set_lun_acl(&self, lun: u32, initiator: &str) -> Result<()> {
        self.ensure_acl(initiator).await?;
        self.map_lun(initiator, lun, None).await
    }
}
