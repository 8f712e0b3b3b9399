//! Tests for settings loading
#![allow(clippy::unwrap_used)]

use super::*;

const ALL_VARS: &[&str] = &[
    "MCM_BIND_INTERFACE",
    "CONSUL_BIND_INTERFACE",
    "CONSUL_BOOTSTRAP_SERVER",
    "MINIO_URL",
    "MINIO_ACCESS_KEY",
    "MINIO_SECRET_KEY",
    "MYSQL_ROOT_PASSWORD",
    "MYSQL_BACKUP_USER",
    "MYSQL_BACKUP_PASSWORD",
    "MYSQL_REPLICATION_USER",
    "MYSQL_REPLICATION_PASSWORD",
    "MYSQL_APPLICATION_USER",
    "MYSQL_APPLICATION_PASSWORD",
];

fn clear_all() {
    for var in ALL_VARS {
        std::env::remove_var(var);
    }
}

/// Environment mutation is process-global, so every phase lives in one
/// test function to keep the harness from interleaving them.
#[test]
fn test_settings_from_env() {
    clear_all();

    // The bind interface always has a default
    assert_eq!(bind_interface(), DEFAULT_BIND_INTERFACE);
    std::env::set_var("MCM_BIND_INTERFACE", "bond0");
    assert_eq!(bind_interface(), "bond0");

    // Agent settings name the first missing variable
    let err = AgentSettings::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::MissingEnv("CONSUL_BIND_INTERFACE")));
    assert!(err.to_string().contains("CONSUL_BIND_INTERFACE"));

    std::env::set_var("CONSUL_BIND_INTERFACE", "eth0");
    std::env::set_var("CONSUL_BOOTSTRAP_SERVER", "10.0.0.1");
    let agent = AgentSettings::from_env().unwrap();
    assert_eq!(agent.bind_interface, "eth0");
    assert_eq!(agent.bootstrap_server, "10.0.0.1");

    // Store settings require the full endpoint triple
    std::env::set_var("MINIO_URL", "http://minio:9000");
    std::env::set_var("MINIO_ACCESS_KEY", "minio");
    let err = StoreSettings::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::MissingEnv("MINIO_SECRET_KEY")));

    std::env::set_var("MINIO_SECRET_KEY", "secret");
    let store = StoreSettings::from_env().unwrap();
    assert_eq!(store.url, "http://minio:9000");

    // The lazy database loader needs only the root password; the
    // per-purpose accounts stay unset until an operation needs them
    std::env::set_var("MYSQL_ROOT_PASSWORD", "root-pw");
    let db = DbSettings::from_env().unwrap();
    assert_eq!(db.root_password, "root-pw");
    assert!(db.backup.is_none());
    assert!(db.replication.is_none());
    assert!(db.application.is_none());

    // The strict loader refuses to start a cluster without the full
    // account set
    let err = DbSettings::cluster_from_env().unwrap_err();
    assert!(matches!(err, ConfigError::MissingEnv("MYSQL_BACKUP_USER")));

    std::env::set_var("MYSQL_BACKUP_USER", "backup");
    std::env::set_var("MYSQL_BACKUP_PASSWORD", "backup-pw");
    std::env::set_var("MYSQL_REPLICATION_USER", "repl");
    let err = DbSettings::cluster_from_env().unwrap_err();
    assert!(matches!(
        err,
        ConfigError::MissingEnv("MYSQL_REPLICATION_PASSWORD")
    ));

    std::env::set_var("MYSQL_REPLICATION_PASSWORD", "repl-pw");
    let db = DbSettings::cluster_from_env().unwrap();
    assert_eq!(db.backup.as_ref().unwrap().user, "backup");
    assert_eq!(db.replication.as_ref().unwrap().password, "repl-pw");
    assert!(db.application.is_none());

    // A lone application user without its password is not a credential
    // pair, under either loader
    std::env::set_var("MYSQL_APPLICATION_USER", "app");
    assert!(DbSettings::from_env().unwrap().application.is_none());

    std::env::set_var("MYSQL_APPLICATION_PASSWORD", "app-pw");
    let app = DbSettings::cluster_from_env().unwrap().application.unwrap();
    assert_eq!(app.user, "app");
    assert_eq!(app.password, "app-pw");

    clear_all();
}
