//! Backup artifact storage

pub mod minio;

pub use minio::{BackupArtifact, BackupStore, StoreError};
