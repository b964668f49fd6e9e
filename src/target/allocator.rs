//! LUN number allocation

use super::TargetCli;
use crate::error::Result;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Lowest number not present in `used`
pub fn lowest_free(used: impl IntoIterator<Item = u32>) -> u32 {
    let used: BTreeSet<u32> = used.into_iter().collect();
    let mut candidate = 0;
    while used.contains(&candidate) {
        candidate += 1;
    }
    candidate
}

/// Picks the number for the next LUN in the portal group.
///
/// Callers must hold the target lock from allocation until the LUN is bound,
/// otherwise two allocations can return the same number.
pub struct LunAllocator {
    targetcli: Arc<TargetCli>,
}

impl LunAllocator {
    pub fn new(targetcli: Arc<TargetCli>) -> Self {
        Self { targetcli }
    }

    /// Lowest unused LUN number; 0 when the target does not exist yet
    pub async fn next_lun_number(&self) -> Result<u32> {
        let luns = self.targetcli.list_luns().await?;
        Ok(lowest_free(luns.iter().map(|b| b.number)))
    }
}
