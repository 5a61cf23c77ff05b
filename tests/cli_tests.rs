//! Integration tests for the Tether CLI
//!
//! These tests run the actual CLI binary and verify output.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get the binary to test
fn tether_cmd() -> Command {
    Command::cargo_bin("tether").unwrap()
}

#[test]
fn test_help_flag() {
    tether_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("live-binding template engine"));
}

#[test]
fn test_render_help() {
    tether_cmd()
        .args(["render", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--data"))
        .stdout(predicate::str::contains("--engine"));
}

// ============================================================================
// Render
// ============================================================================

#[test]
fn test_render_with_data_file() {
    let temp_dir = TempDir::new().unwrap();
    let template = temp_dir.path().join("list.stache");
    let data = temp_dir.path().join("data.json");
    fs::write(
        &template,
        "<ul>{{#each items}}<li>{{name}}</li>{{/each}}</ul>",
    )
    .unwrap();
    fs::write(&data, r#"{"items": [{"name": "a"}, {"name": "b"}]}"#).unwrap();

    tether_cmd()
        .args([
            "render",
            template.to_str().unwrap(),
            "--data",
            data.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("<ul><li>a</li><li>b</li></ul>"));
}

#[test]
fn test_render_relative_to_root() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("views")).unwrap();
    fs::write(temp_dir.path().join("views/hi.mustache"), "<p>hi</p>").unwrap();

    tether_cmd()
        .args([
            "render",
            "views/hi.mustache",
            "--root",
            temp_dir.path().to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("<p>hi</p>"));
}

#[test]
fn test_render_engine_override() {
    let temp_dir = TempDir::new().unwrap();
    let template = temp_dir.path().join("card.ejs");
    fs::write(&template, "<b>card</b>").unwrap();

    tether_cmd()
        .args(["render", template.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("TETHER-012"))
        .stderr(predicate::str::contains("Fix:"));

    tether_cmd()
        .args(["render", template.to_str().unwrap(), "--engine", "stache"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<b>card</b>"));
}

#[test]
fn test_render_extensionless_uses_default_engine() {
    let temp_dir = TempDir::new().unwrap();
    let template = temp_dir.path().join("card");
    fs::write(&template, "<b>plain</b>").unwrap();

    tether_cmd()
        .args(["render", template.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("<b>plain</b>"));
}

#[test]
fn test_render_missing_template() {
    let temp_dir = TempDir::new().unwrap();
    let template = temp_dir.path().join("missing.stache");

    tether_cmd()
        .args(["render", template.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("TETHER-020"));
}

#[test]
fn test_render_with_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("tether.yaml");
    fs::write(&config, "extensions: [tpl]\ndefault_engine: tpl\n").unwrap();
    let template = temp_dir.path().join("page.tpl");
    fs::write(&template, "<h1>page</h1>").unwrap();

    tether_cmd()
        .args([
            "render",
            template.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("<h1>page</h1>"));
}

// ============================================================================
// Check
// ============================================================================

#[test]
fn test_check_valid_templates() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("a.stache"), "<p>{{a}}</p>").unwrap();
    fs::write(temp_dir.path().join("b.stache"), "{{#if b}}b{{/if}}").unwrap();
    let pattern = temp_dir.path().join("*.stache");

    tether_cmd()
        .args(["check", pattern.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 templates ok"));
}

#[test]
fn test_check_reports_parse_errors() {
    let temp_dir = TempDir::new().unwrap();
    let bad = temp_dir.path().join("bad.stache");
    fs::write(&bad, "<div>\n  {{#each items}}\n</div>").unwrap();

    tether_cmd()
        .args(["check", bad.to_str().unwrap()])
        .assert()
        .failure()
        .stdout(predicate::str::contains("TETHER-010"))
        .stdout(predicate::str::contains("Fix:"))
        .stderr(predicate::str::contains("1 of 1 templates failed"));
}

#[test]
fn test_check_unmatched_pattern() {
    let temp_dir = TempDir::new().unwrap();
    let pattern = temp_dir.path().join("*.nothing");

    tether_cmd()
        .args(["check", pattern.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no templates match"));
}
