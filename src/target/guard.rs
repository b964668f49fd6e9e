//! Target readiness
//!
//! Makes sure the single configured target exists and that its portal group
//! enforces explicit initiator ACLs before any LUN is created or deleted.

use super::TargetCli;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Portal group attributes every provisioning run re-applies.
///
/// Authentication off, writes allowed, and no implicit ACLs for unknown
/// initiators.
const SECURITY_ATTRIBUTES: &[&str] = &[
    "authentication=0",
    "demo_mode_write_protect=0",
    "generate_node_acls=0",
];

/// Idempotently prepares the target
pub struct TargetGuard {
    targetcli: Arc<TargetCli>,
}

impl TargetGuard {
    pub fn new(targetcli: Arc<TargetCli>) -> Self {
        Self { targetcli }
    }

    /// Create the target if missing, enforce security attributes and tune
    /// burst lengths.
    ///
    /// A failure to list, create or secure the target is returned; burst
    /// tuning is best-effort.
    pub async fn ensure_ready(&self) -> Result<()> {
        let iqn = self.targetcli.iqn().to_string();

        if self.targetcli.target_exists().await? {
            debug!("Target {} already exists", iqn);
        } else {
            info!("Creating iSCSI target {}", iqn);
            self.targetcli.run("/iscsi", &["create", &iqn]).await?;
        }

        let mut args = vec!["set", "attribute"];
        args.extend_from_slice(SECURITY_ATTRIBUTES);
        self.targetcli.run(&self.targetcli.tpg_path(), &args).await?;

        self.tune_burst_lengths().await;
        Ok(())
    }

    async fn tune_burst_lengths(&self) {
        let config = self.targetcli.config();
        let params = [
            ("FirstBurstLength", config.first_burst_length),
            ("MaxBurstLength", config.max_burst_length),
        ];
        for (param, value) in params {
            let path = format!(
                "{}/iscsi/{}/tpgt_{}/param/{}",
                config.configfs_root.trim_end_matches('/'),
                config.iqn,
                config.tpg_tag(),
                param
            );
            let input = format!("{}\n", value);
            match self
                .targetcli
                .executor()
                .run_with_input_checked("tee", &[&path], &input)
                .await
            {
                Ok(_) => debug!("Set {} = {}", param, value),
                Err(e) => warn!("Could not set {} on {}: {}", param, config.iqn, e),
            }
        }
    }
}
