//! Physical backup and restore
//!
//! Backups are consistent block-level snapshots taken with xtrabackup,
//! prepared to a crash-consistent state, tarred with a `mysql/` root
//! and uploaded to the bucket. Restore unpacks the newest artifact and
//! copies it back into an emptied data dir. Only the replication leader
//! takes backups; a backup's wall time can exceed the lease TTL, so it
//! runs on its own task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::cluster::ConsulClient;
use crate::db::server::{DbError, MysqlServer, SENTINEL_FILE, XTRABACKUP_BINARY};
use crate::store::BackupStore;

const TAR_BINARY: &str = "/bin/tar";
const CHOWN_BINARY: &str = "chown";
/// Directory name at the root of every backup tarball.
const ARCHIVE_ROOT: &str = "mysql";
/// Owner of the restored data dir.
const DATA_OWNER: &str = "mysql:mysql";

/// Backups older than this trigger a new one.
pub fn default_backup_max_age() -> chrono::Duration {
    chrono::Duration::hours(6)
}

impl MysqlServer {
    /// Take a physical backup and upload it to the bucket.
    ///
    /// Staging data and the local tarball are removed whether or not
    /// the run succeeds.
    pub async fn backup(&self, store: &BackupStore) -> Result<(), DbError> {
        store.setup().await?;

        let epoch = unix_epoch();
        let staging = PathBuf::from(format!("/tmp/mysql_backup_{epoch}"));
        let target = staging.join(ARCHIVE_ROOT);
        let tarball = PathBuf::from(format!("/tmp/mysql_backup_{epoch}.tgz"));

        info!(dir = %target.display(), "backing up mysql");
        let result = self.run_backup(store, &staging, &target, &tarball).await;

        if staging.exists() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        if tarball.exists() {
            let _ = std::fs::remove_file(&tarball);
        }

        result.map_err(|error| DbError::BackupFailed(error.to_string()))?;
        info!("backup was successfully created");
        Ok(())
    }

    async fn run_backup(
        &self,
        store: &BackupStore,
        staging: &Path,
        target: &Path,
        tarball: &Path,
    ) -> Result<(), DbError> {
        let backup = self.backup_account()?;
        std::fs::create_dir_all(target)?;

        crate::process::run(
            XTRABACKUP_BINARY,
            [
                format!("--user={}", backup.user),
                format!("--password={}", backup.password),
                "--backup".to_string(),
                format!("--target-dir={}", target.display()),
            ],
        )
        .await?;

        crate::process::run(
            XTRABACKUP_BINARY,
            [
                "--prepare".to_string(),
                format!("--target-dir={}", target.display()),
            ],
        )
        .await?;

        // Tarball root must be `mysql/` so restore can verify it.
        crate::process::run(
            TAR_BINARY,
            [
                "zcf".to_string(),
                tarball.display().to_string(),
                "-C".to_string(),
                staging.display().to_string(),
                ARCHIVE_ROOT.to_string(),
            ],
        )
        .await?;

        store.upload(tarball).await?;
        Ok(())
    }

    /// Whether this node should take a backup now: it is the leader and
    /// the newest artifact is missing or older than `max_age`.
    pub async fn backup_due(
        &self,
        consul: &Arc<ConsulClient>,
        store: &BackupStore,
        max_age: chrono::Duration,
    ) -> Result<bool, DbError> {
        debug!("checking for backups");

        if !consul.is_leader().await? {
            debug!("not the replication leader, skipping backup check");
            return Ok(false);
        }

        let latest = match store.latest_backup().await {
            Ok(latest) => latest,
            Err(error) => {
                // Treat an unreadable bucket like a missing backup; the
                // upload path will surface a real storage failure.
                error!(%error, "backup listing failed, forcing a new backup");
                None
            }
        };

        if !backup_is_due(latest.as_ref().map(|a| a.modified), max_age, Utc::now()) {
            return Ok(false);
        }

        info!(
            latest = latest.as_ref().map(|a| a.name.as_str()).unwrap_or("none"),
            "backup is outdated, creating a new one"
        );
        Ok(true)
    }

    /// Spawn a backup when one is due.
    ///
    /// Returns whether a backup was started. The backup itself runs on
    /// a separate task because its wall time can exceed the lease TTL;
    /// its failure is logged, not returned.
    pub async fn backup_if_due(
        &self,
        consul: &Arc<ConsulClient>,
        store: &BackupStore,
        max_age: chrono::Duration,
    ) -> Result<bool, DbError> {
        if !self.backup_due(consul, store, max_age).await? {
            return Ok(false);
        }

        let db = self.clone();
        let store = store.clone();
        tokio::spawn(async move {
            if let Err(error) = db.backup(&store).await {
                error!(%error, "background backup failed");
            }
        });

        Ok(true)
    }

    /// Restore the newest bucket artifact into the data dir.
    ///
    /// Pre-existing data is preserved next to the data dir; the archive
    /// is verified to be a database backup before copy-back runs.
    pub async fn restore(&self, store: &BackupStore) -> Result<(), DbError> {
        info!("restoring mysql backup");
        let epoch = unix_epoch();

        // copy-back requires an empty data dir; anything present is
        // preserved in a sibling directory, not deleted.
        if dir_non_empty(&self.data_dir)? {
            let old_dir = move_aside(&self.data_dir, epoch)?;
            info!(dir = %old_dir.display(), "old mysql data moved aside");
        }

        let artifact = store
            .latest_backup()
            .await?
            .ok_or_else(|| DbError::RestoreFailed("no backup found in bucket".to_string()))?;

        let staging = PathBuf::from(format!("/tmp/mysql_restore_{epoch}"));
        let result = self.run_restore(store, &artifact.name, &staging).await;

        if staging.exists() {
            let _ = std::fs::remove_dir_all(&staging);
        }

        match result {
            Ok(()) => {
                info!(artifact = %artifact.name, "backup restored");
                Ok(())
            }
            Err(DbError::RestoreInvalid) => Err(DbError::RestoreInvalid),
            Err(error) => Err(DbError::RestoreFailed(error.to_string())),
        }
    }

    async fn run_restore(
        &self,
        store: &BackupStore,
        artifact: &str,
        staging: &Path,
    ) -> Result<(), DbError> {
        std::fs::create_dir_all(staging)?;
        store.download(artifact, staging).await?;

        crate::process::run(
            TAR_BINARY,
            [
                "zxf".to_string(),
                staging.join(artifact).display().to_string(),
                "-C".to_string(),
                staging.display().to_string(),
            ],
        )
        .await?;

        if !verify_unpacked(staging) {
            error!("unpacked archive is not a mysql backup");
            return Err(DbError::RestoreInvalid);
        }

        crate::process::run(
            XTRABACKUP_BINARY,
            [
                "--copy-back".to_string(),
                format!("--target-dir={}", staging.join(ARCHIVE_ROOT).display()),
            ],
        )
        .await?;

        crate::process::run(
            CHOWN_BINARY,
            [
                DATA_OWNER.to_string(),
                "-R".to_string(),
                self.data_dir.display().to_string(),
            ],
        )
        .await?;

        Ok(())
    }
}

/// Whether a new backup is needed given the newest artifact's age.
fn backup_is_due(
    last: Option<DateTime<Utc>>,
    max_age: chrono::Duration,
    now: DateTime<Utc>,
) -> bool {
    match last {
        None => true,
        Some(modified) => now - modified > max_age,
    }
}

fn dir_non_empty(dir: &Path) -> std::io::Result<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

/// Move every data-dir entry into a sibling `<data_dir>_old_<epoch>`.
///
/// Entry-by-entry because the data dir itself can be a mount point that
/// cannot be renamed.
fn move_aside(data_dir: &Path, epoch: u64) -> std::io::Result<PathBuf> {
    let old_dir = PathBuf::from(format!("{}_old_{epoch}", data_dir.display()));

    std::fs::create_dir(&old_dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&old_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        let dest = old_dir.join(entry.file_name());
        debug!(from = %entry.path().display(), to = %dest.display(), "moving");
        std::fs::rename(entry.path(), dest)?;
    }

    Ok(old_dir)
}

/// An unpacked archive must carry the transaction-log sentinel under
/// its `mysql/` root to count as a database backup.
fn verify_unpacked(staging: &Path) -> bool {
    staging.join(ARCHIVE_ROOT).join(SENTINEL_FILE).is_file()
}

fn unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "backup_test.rs"]
mod tests;
