//! MinIO-backed backup store, driven through the `mc` CLI
//!
//! Artifacts live under `backup/mysqlbackup/` and are named
//! `mysql_backup_<epoch>.tgz`. The bucket carries a server-side expiry
//! rule, so old artifacts disappear without any cleanup here; the
//! newest artifact is always the restore candidate.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::StoreSettings;
use crate::process::{self, ProcessError};

const MC_BINARY: &str = "mc";
/// Alias registered with the mc CLI for the configured endpoint.
const BUCKET_ALIAS: &str = "backup";
/// Alias-qualified bucket path holding all artifacts.
const BUCKET_PATH: &str = "backup/mysqlbackup";
const BACKUP_PATTERN: &str = "mysql*.tgz";
const RETENTION_DAYS: &str = "7";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("unparseable listing line: {0:?}")]
    Listing(String),
}

/// One backup object in the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub name: String,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    url: String,
    access_key: String,
    secret_key: String,
}

impl BackupStore {
    pub fn new(settings: &StoreSettings) -> Self {
        Self {
            url: settings.url.clone(),
            access_key: settings.access_key.clone(),
            secret_key: settings.secret_key.clone(),
        }
    }

    /// Ensure the alias, bucket and retention policy exist.
    ///
    /// Called before every listing and upload; all three steps are
    /// idempotent against an already-configured endpoint.
    pub async fn setup(&self) -> Result<(), StoreError> {
        info!(url = %self.url, "configuring object-store connection");

        process::run(
            MC_BINARY,
            [
                "alias",
                "set",
                BUCKET_ALIAS,
                self.url.as_str(),
                self.access_key.as_str(),
                self.secret_key.as_str(),
            ],
        )
        .await?;

        process::run(MC_BINARY, ["mb", BUCKET_PATH, "-p"]).await?;

        // Re-adding an existing rule fails; that just means the policy
        // is already in place.
        if let Err(error) = process::run(
            MC_BINARY,
            ["ilm", "rule", "add", "--expire-days", RETENTION_DAYS, BUCKET_PATH],
        )
        .await
        {
            debug!(%error, "retention rule not added, assuming it exists");
        }

        Ok(())
    }

    /// The newest backup artifact in the bucket, if any.
    pub async fn latest_backup(&self) -> Result<Option<BackupArtifact>, StoreError> {
        self.setup().await?;
        debug!("searching for the latest backup");

        let bucket = format!("{BUCKET_PATH}/");
        let listing = process::output(
            MC_BINARY,
            [
                "find",
                bucket.as_str(),
                "--name",
                BACKUP_PATTERN,
                "-print",
                "{time} # {base}",
            ],
        )
        .await?;

        let artifacts = parse_backup_listing(&listing)?;
        Ok(newest(artifacts))
    }

    pub async fn backup_exists(&self) -> Result<bool, StoreError> {
        Ok(self.latest_backup().await?.is_some())
    }

    /// Upload a local tarball into the bucket.
    pub async fn upload(&self, file: &Path) -> Result<(), StoreError> {
        let file = file.to_string_lossy();
        let dest = format!("{BUCKET_PATH}/");
        process::run(MC_BINARY, ["cp", &*file, dest.as_str()]).await?;
        Ok(())
    }

    /// Download a named artifact into the given directory.
    pub async fn download(&self, name: &str, dest_dir: &Path) -> Result<(), StoreError> {
        let source = format!("{BUCKET_PATH}/{name}");
        let dest = dest_dir.to_string_lossy();
        process::run(MC_BINARY, ["cp", source.as_str(), &*dest]).await?;
        Ok(())
    }
}

/// Parse `mc find -print "{time} # {base}"` output.
///
/// Lines look like `2020-11-08 08:42:12 UTC # mysql_backup_1604824911.tgz`.
fn parse_backup_listing(listing: &str) -> Result<Vec<BackupArtifact>, StoreError> {
    let mut artifacts = Vec::new();

    for line in listing.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (time, name) = line
            .split_once('#')
            .ok_or_else(|| StoreError::Listing(line.to_string()))?;
        let time = time.trim().trim_end_matches(" UTC");
        let modified = NaiveDateTime::parse_from_str(time, "%Y-%m-%d %H:%M:%S")
            .map_err(|_| StoreError::Listing(line.to_string()))?
            .and_utc();

        artifacts.push(BackupArtifact {
            name: name.trim().to_string(),
            modified,
        });
    }

    Ok(artifacts)
}

fn newest(artifacts: Vec<BackupArtifact>) -> Option<BackupArtifact> {
    artifacts.into_iter().max_by_key(|artifact| artifact.modified)
}

#[cfg(test)]
#[path = "minio_test.rs"]
mod tests;
