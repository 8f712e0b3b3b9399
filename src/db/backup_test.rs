//! Tests for backup scheduling and restore filesystem handling
#![allow(clippy::unwrap_used)]

use super::*;
use chrono::TimeZone;

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Backup age gate
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_backup_due_when_none_exists() {
    assert!(backup_is_due(
        None,
        default_backup_max_age(),
        utc(2020, 11, 8, 12, 0, 0)
    ));
}

#[test]
fn test_backup_not_due_when_fresh() {
    let now = utc(2020, 11, 8, 12, 0, 0);
    let modified = utc(2020, 11, 8, 9, 0, 0); // 3h old
    assert!(!backup_is_due(Some(modified), default_backup_max_age(), now));
}

#[test]
fn test_backup_due_when_stale() {
    let now = utc(2020, 11, 8, 12, 0, 0);
    let modified = utc(2020, 11, 8, 1, 0, 0); // 11h old
    assert!(backup_is_due(Some(modified), default_backup_max_age(), now));
}

#[test]
fn test_backup_age_boundary_is_not_due() {
    let now = utc(2020, 11, 8, 12, 0, 0);
    let modified = utc(2020, 11, 8, 6, 0, 0); // exactly 6h
    assert!(!backup_is_due(Some(modified), default_backup_max_age(), now));
}

// ─────────────────────────────────────────────────────────────────────────────
// Data-dir move-aside
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_dir_non_empty() {
    let base = tempfile::tempdir().unwrap();

    // Missing directory counts as empty
    assert!(!dir_non_empty(&base.path().join("missing")).unwrap());

    let dir = base.path().join("data");
    std::fs::create_dir(&dir).unwrap();
    assert!(!dir_non_empty(&dir).unwrap());

    std::fs::write(dir.join("auto.cnf"), b"x").unwrap();
    assert!(dir_non_empty(&dir).unwrap());
}

#[test]
fn test_move_aside_preserves_entries() {
    let base = tempfile::tempdir().unwrap();
    let data_dir = base.path().join("data");
    std::fs::create_dir(&data_dir).unwrap();
    std::fs::write(data_dir.join("ibdata1"), b"tables").unwrap();
    std::fs::write(data_dir.join("ib_logfile0"), b"log").unwrap();
    std::fs::create_dir(data_dir.join("mysql")).unwrap();
    std::fs::write(data_dir.join("mysql").join("user.ibd"), b"users").unwrap();

    let old_dir = move_aside(&data_dir, 1604824911).unwrap();

    // The data dir itself survives, empty
    assert!(data_dir.is_dir());
    assert_eq!(std::fs::read_dir(&data_dir).unwrap().count(), 0);

    // Everything landed in the sibling, nested content intact
    assert_eq!(
        old_dir,
        base.path().join("data_old_1604824911"),
    );
    assert_eq!(
        std::fs::read(old_dir.join("ibdata1")).unwrap(),
        b"tables"
    );
    assert_eq!(
        std::fs::read(old_dir.join("mysql").join("user.ibd")).unwrap(),
        b"users"
    );
}

#[cfg(unix)]
#[test]
fn test_move_aside_restricts_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let base = tempfile::tempdir().unwrap();
    let data_dir = base.path().join("data");
    std::fs::create_dir(&data_dir).unwrap();

    let old_dir = move_aside(&data_dir, 1).unwrap();
    let mode = std::fs::metadata(&old_dir).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o700);
}

// ─────────────────────────────────────────────────────────────────────────────
// Unpacked archive verification
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_verify_unpacked_requires_sentinel() {
    let staging = tempfile::tempdir().unwrap();

    // Nothing unpacked
    assert!(!verify_unpacked(staging.path()));

    // An archive with a mysql/ root but no transaction log is not a
    // database backup
    std::fs::create_dir(staging.path().join("mysql")).unwrap();
    std::fs::write(staging.path().join("mysql").join("README"), b"?").unwrap();
    assert!(!verify_unpacked(staging.path()));

    std::fs::write(staging.path().join("mysql").join("ib_logfile0"), b"log").unwrap();
    assert!(verify_unpacked(staging.path()));
}

#[test]
fn test_sentinel_outside_archive_root_does_not_count() {
    let staging = tempfile::tempdir().unwrap();
    std::fs::write(staging.path().join("ib_logfile0"), b"log").unwrap();
    assert!(!verify_unpacked(staging.path()));
}
