//! Tests for apps, check, fingerprint, status.

use super::parse;
use crate::cli::CliCommand;
use droidup_core::apps::App;
use std::path::Path;

#[test]
fn cli_parse_apps() {
    match parse(&["droidup", "apps"]) {
        CliCommand::Apps => {}
        _ => panic!("expected Apps"),
    }
}

#[test]
fn cli_parse_check_all() {
    match parse(&["droidup", "check"]) {
        CliCommand::Check { app, refresh } => {
            assert!(app.is_none());
            assert!(!refresh);
        }
        _ => panic!("expected Check"),
    }
}

#[test]
fn cli_parse_check_one_refresh() {
    match parse(&["droidup", "check", "bromite", "--refresh"]) {
        CliCommand::Check { app, refresh } => {
            assert_eq!(app, Some(App::Bromite));
            assert!(refresh);
        }
        _ => panic!("expected Check with app"),
    }
}

#[test]
fn cli_parse_fingerprint() {
    match parse(&["droidup", "fingerprint", "/tmp/brave.apk"]) {
        CliCommand::Fingerprint { path } => assert_eq!(path, Path::new("/tmp/brave.apk")),
        _ => panic!("expected Fingerprint"),
    }
}

#[test]
fn cli_parse_status() {
    match parse(&["droidup", "status"]) {
        CliCommand::Status => {}
        _ => panic!("expected Status"),
    }
}
