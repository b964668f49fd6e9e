//! File backing store
//!
//! Sparse image files, generated under the backstore directory unless the
//! caller names a path.

use super::sanitize_name;
use crate::config::BackendConfig;
use crate::domain::ports::{
    gb_to_mb, BackendKind, BackingStore, BackingStoreProvisioner, CommandExecutorRef,
    LunCreateRequest,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::{info, warn};

pub struct FileBackingStore {
    executor: CommandExecutorRef,
    config: BackendConfig,
}

impl FileBackingStore {
    pub fn new(executor: CommandExecutorRef, config: BackendConfig) -> Self {
        Self { executor, config }
    }

    /// `<dir>/lun_<sanitized name>_<unix seconds>.img`
    pub fn generated_path(&self, name: &str, timestamp: i64) -> String {
        format!(
            "{}/lun_{}_{}.img",
            self.config.backstore_dir.trim_end_matches('/'),
            sanitize_name(name, self.config.max_name_len),
            timestamp
        )
    }

    fn resolve_path(&self, request: &LunCreateRequest) -> Result<String> {
        let path = match request.file_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => self.generated_path(&request.name, chrono::Utc::now().timestamp()),
        };
        if !path.starts_with('/') || path.ends_with('/') {
            return Err(Error::Validation(format!(
                "file_path must be an absolute file path: {}",
                path
            )));
        }
        Ok(path)
    }
}

#[async_trait]
impl BackingStoreProvisioner for FileBackingStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Fileio
    }

    async fn create(&self, request: &LunCreateRequest) -> Result<BackingStore> {
        let path = self.resolve_path(request)?;
        let size_mb = gb_to_mb(request.size_gb);
        if size_mb == 0 {
            return Err(Error::Validation("size must be at least 1 MB".into()));
        }

        if self.executor.run("test", &["-e", &path]).await?.is_success() {
            return Err(Error::exists("File", &path));
        }

        let dir = path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .filter(|dir| !dir.is_empty())
            .unwrap_or("/");
        self.executor.run_checked("mkdir", &["-p", dir]).await?;

        let of = format!("of={}", path);
        let seek = format!("seek={}", size_mb);
        if let Err(e) = self
            .executor
            .run_checked("dd", &["if=/dev/zero", &of, "bs=1M", "count=0", &seek])
            .await
        {
            if let Err(cleanup) = self.executor.run_checked("rm", &["-f", &path]).await {
                warn!("Rollback: failed to remove {}: {}", path, cleanup);
            }
            return Err(e);
        }

        info!("Created sparse file {} ({} MB)", path, size_mb);
        Ok(BackingStore {
            kind: BackendKind::Fileio,
            path,
            lv_path: None,
        })
    }

    async fn destroy(&self, store: &BackingStore) -> Result<()> {
        self.executor.run_checked("rm", &["-f", &store.path]).await?;
        info!("Removed file {}", store.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimulatedHost;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn store(host: &Arc<SimulatedHost>) -> FileBackingStore {
        FileBackingStore::new(host.clone(), BackendConfig::default())
    }

    fn request(name: &str, file_path: Option<&str>) -> LunCreateRequest {
        LunCreateRequest {
            name: name.into(),
            size_gb: 2.0,
            backend_type: "fileio".into(),
            file_path: file_path.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_path() {
        let host = Arc::new(SimulatedHost::new());
        assert_eq!(
            store(&host).generated_path("Test Disk!", 1700000000),
            "/var/lib/arcanas/iscsi/lun_test_disk_1700000000.img"
        );
    }

    #[tokio::test]
    async fn test_create_generated_sparse_file() {
        let host = Arc::new(SimulatedHost::new());
        let backing = store(&host).create(&request("Test Disk!", None)).await.unwrap();

        assert!(backing.path.starts_with("/var/lib/arcanas/iscsi/lun_test_disk_"));
        assert!(backing.path.ends_with(".img"));
        assert_eq!(host.file_size(&backing.path), Some(2 * 1024 * 1024 * 1024));
        assert!(host.has_command("mkdir -p /var/lib/arcanas/iscsi"));

        store(&host).destroy(&backing).await.unwrap();
        assert!(host.files().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_path_must_not_exist() {
        let host = Arc::new(SimulatedHost::new());
        let first = store(&host)
            .create(&request("a", Some("/data/images/a.img")))
            .await
            .unwrap();
        assert_eq!(first.path, "/data/images/a.img");
        assert!(host.has_command("mkdir -p /data/images"));

        assert_matches!(
            store(&host).create(&request("a", Some("/data/images/a.img"))).await,
            Err(Error::ResourceExists { .. })
        );
        assert_matches!(
            store(&host).create(&request("a", Some("images/a.img"))).await,
            Err(Error::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_dd_failure_removes_partial_file() {
        let host = Arc::new(SimulatedHost::new());
        host.fail_on("dd ");
        assert!(store(&host).create(&request("x", None)).await.is_err());
        assert_eq!(host.count_commands("rm -f /var/lib/arcanas/iscsi/lun_x_"), 1);
    }
}
