//! iSCSI target subsystem
//!
//! Everything the orchestrator does to the kernel target goes through the
//! `targetcli` shell, wrapped here by [`TargetCli`]. The submodules build the
//! target lifecycle on top of it:
//!
//! - [`guard`]: target existence and portal group security attributes
//! - [`allocator`]: LUN number selection
//! - [`binding`]: backstore objects and LUN entries
//! - [`acl`]: initiator access control

pub mod acl;
pub mod allocator;
pub mod binding;
pub mod guard;

pub use acl::AclManager;
pub use allocator::LunAllocator;
pub use binding::TargetBinder;
pub use guard::TargetGuard;

use crate::config::TargetConfig;
use crate::domain::ports::{command_line, AclEntry, BackendKind, CommandExecutorRef, CommandOutput};
use crate::error::{Error, Result};
use crate::host::parse::{self, LunBinding};
use std::sync::Arc;

/// Backstore object name for a LUN number
pub fn backstore_name(number: u32) -> String {
    format!("bs_lun{}", number)
}

/// LUN node name for a LUN number
pub fn lun_name(number: u32) -> String {
    format!("lun{}", number)
}

/// Kind of backstore object a LUN is bound through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackstoreType {
    Block,
    Fileio,
}

impl BackstoreType {
    /// Volume-backed and raw-block LUNs both use block backstores
    pub fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Lvm | BackendKind::Block => BackstoreType::Block,
            BackendKind::Fileio => BackstoreType::Fileio,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackstoreType::Block => "block",
            BackstoreType::Fileio => "fileio",
        }
    }

    /// Parent node, e.g. `/backstores/block`
    pub fn root(&self) -> String {
        format!("/backstores/{}", self.as_str())
    }

    /// Backstore object path for a LUN number
    pub fn object_path(&self, number: u32) -> String {
        format!("{}/{}", self.root(), backstore_name(number))
    }
}

/// Whether targetcli output reports a missing node
pub(crate) fn is_missing_path(output: &str) -> bool {
    output.contains("No such path") || output.contains("does not exist")
}

/// Thin wrapper around the `targetcli` shell for one target
pub struct TargetCli {
    executor: CommandExecutorRef,
    config: TargetConfig,
}

impl TargetCli {
    pub fn new(executor: CommandExecutorRef, config: TargetConfig) -> Arc<Self> {
        Arc::new(Self { executor, config })
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn executor(&self) -> &CommandExecutorRef {
        &self.executor
    }

    pub fn iqn(&self) -> &str {
        &self.config.iqn
    }

    /// `/iscsi/<iqn>/<tpg>`
    pub fn tpg_path(&self) -> String {
        format!("/iscsi/{}/{}", self.config.iqn, self.config.tpg)
    }

    pub fn luns_path(&self) -> String {
        format!("{}/luns", self.tpg_path())
    }

    pub fn acls_path(&self) -> String {
        format!("{}/acls", self.tpg_path())
    }

    pub fn acl_path(&self, initiator: &str) -> String {
        format!("{}/{}", self.acls_path(), initiator)
    }

    /// Run a command against a node and capture output without checking status
    pub async fn exec(&self, path: &str, args: &[&str]) -> Result<CommandOutput> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(path);
        argv.extend_from_slice(args);
        self.executor.run("targetcli", &argv).await
    }

    /// Run a command against a node, failing on a non-zero exit status
    pub async fn run(&self, path: &str, args: &[&str]) -> Result<String> {
        let out = self.exec(path, args).await?;
        if out.is_success() {
            return Ok(out.output);
        }
        let mut argv = vec![path];
        argv.extend_from_slice(args);
        Err(Error::CommandFailed {
            command: command_line("targetcli", &argv),
            status: out.status_text(),
            output: out.output.trim().to_string(),
        })
    }

    /// Whether the configured target exists
    pub async fn target_exists(&self) -> Result<bool> {
        let text = self.run("/iscsi", &["ls"]).await?;
        Ok(parse::target_exists(&text, &self.config.iqn))
    }

    /// Current LUN bindings; empty when the target does not exist yet
    pub async fn list_luns(&self) -> Result<Vec<LunBinding>> {
        let luns = self.luns_path();
        let out = self.exec(&luns, &["ls"]).await?;
        if out.is_success() {
            return Ok(parse::parse_lun_listing(&out.output));
        }
        if is_missing_path(&out.output) {
            return Ok(Vec::new());
        }
        Err(Error::CommandFailed {
            command: command_line("targetcli", &[luns.as_str(), "ls"]),
            status: out.status_text(),
            output: out.output.trim().to_string(),
        })
    }

    /// Current ACLs; empty when the target does not exist yet
    pub async fn list_acls(&self) -> Result<Vec<AclEntry>> {
        let acls = self.acls_path();
        let out = self.exec(&acls, &["ls"]).await?;
        if out.is_success() {
            return Ok(parse::parse_acl_listing(&out.output));
        }
        if is_missing_path(&out.output) {
            return Ok(Vec::new());
        }
        Err(Error::CommandFailed {
            command: command_line("targetcli", &[acls.as_str(), "ls"]),
            status: out.status_text(),
            output: out.output.trim().to_string(),
        })
    }
}
