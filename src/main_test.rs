//! Tests for CLI-level mappings

use super::*;
use clap::CommandFactory;

#[test]
fn test_cli_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn test_log_level_directives() {
    assert_eq!(LogLevel::Debug.directive(), "debug");
    assert_eq!(LogLevel::Info.directive(), "info");
    assert_eq!(LogLevel::Warning.directive(), "warn");
    assert_eq!(LogLevel::Error.directive(), "error");
    // Tracing has no critical level; it collapses onto error
    assert_eq!(LogLevel::Critical.directive(), "error");
}

#[test]
fn test_log_level_value_names_are_uppercase() {
    let cli = Cli::parse_from(["mcm", "mysql_stop", "--log-level", "WARNING"]);
    assert!(matches!(cli.log_level, Some(LogLevel::Warning)));

    // Lowercase spellings are rejected
    let result = Cli::try_parse_from(["mcm", "mysql_stop", "--log-level", "warning"]);
    assert!(result.is_err());
}

#[test]
fn test_operation_is_positional() {
    let cli = Cli::parse_from(["mcm", "join_or_bootstrap"]);
    assert_eq!(cli.operation, "join_or_bootstrap");
    assert!(cli.log_level.is_none());
}

#[test]
fn test_unknown_operation_is_parsed_but_unmapped() {
    // The CLI accepts any operation string; rejection (exit 1) happens
    // in main after Operation::parse fails.
    let cli = Cli::parse_from(["mcm", "frobnicate"]);
    assert!(Operation::parse(&cli.operation).is_none());
}
