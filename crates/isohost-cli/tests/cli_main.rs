//! Basic CLI tests for the isohost command-line interface.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use isohost_core::sdk::semver::{Version, VersionReq};
use isohost_core::sdk::{DeclaredType, DependencyRef, ModuleManifest, TypeDescriptor};
use predicates::prelude::*;
use tempfile::TempDir;

const CONTRACT: &str = "Widgets.Contract.IWidget";

fn write_module(root: &Path, dir: &str, file: &str, manifest: &ModuleManifest) -> PathBuf {
    let dir = root.join(dir);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(file);
    std::fs::write(&path, b"\x7fELF").unwrap();
    manifest.write_sidecar(&path).unwrap();
    path
}

fn widget_manifest(name: &str) -> ModuleManifest {
    ModuleManifest::new(name, Version::new(1, 0, 0))
        .with_type(
            DeclaredType::new(TypeDescriptor::new(name, "Widget"))
                .implementing(TypeDescriptor::parse(CONTRACT).unwrap()),
        )
        .with_dependency(DependencyRef::new("fmtlib", VersionReq::parse("^1").unwrap()))
}

fn isohost() -> Command {
    let mut cmd = Command::cargo_bin("isohost").unwrap();
    for var in [
        "ISOHOST_PLUGIN_ROOT",
        "ISOHOST_FILE_TYPES",
        "ISOHOST_STREAM_MODE",
        "ISOHOST_ENUM_FALLBACK",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_cli_help() {
    isohost()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("probe"));
}

#[test]
fn test_scan_requires_contract() {
    isohost()
        .args(["scan", "--root", "/tmp"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--contract"));
}

#[test]
fn test_scan_lists_plugins() {
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "pluginA", "pluginA.so", &widget_manifest("pluginA"));
    write_module(dir.path(), "pluginB", "pluginB.so", &widget_manifest("pluginB"));

    isohost()
        .arg("scan")
        .arg("--contract")
        .arg(CONTRACT)
        .arg("--root")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("pluginA.Widget"))
        .stdout(predicate::str::contains("pluginB.Widget"))
        .stdout(predicate::str::contains("Total: 2 plugin(s)"));
}

#[test]
fn test_scan_json_output() {
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "pluginA", "pluginA.so", &widget_manifest("pluginA"));

    let output = isohost()
        .arg("scan")
        .arg("--contract")
        .arg(CONTRACT)
        .arg("--root")
        .arg(dir.path())
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["module_name"], "pluginA.so");
}

#[test]
fn test_scan_pattern_override() {
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "pluginA", "pluginA.so", &widget_manifest("pluginA"));

    isohost()
        .arg("scan")
        .arg("--contract")
        .arg(CONTRACT)
        .arg("--root")
        .arg(dir.path())
        .args(["--pattern", "*.dll"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No plugins found"));
}

#[test]
fn test_scan_rejects_relative_root() {
    isohost()
        .args(["scan", "--contract", CONTRACT, "--root", "plugins"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absolute"));
}

#[test]
fn test_scan_root_from_config() {
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "pluginA", "pluginA.so", &widget_manifest("pluginA"));
    let config = dir.path().join("isohost.toml");
    std::fs::write(
        &config,
        format!("plugin_root = {:?}\n", dir.path().display().to_string()),
    )
    .unwrap();

    isohost()
        .arg("--config")
        .arg(&config)
        .args(["scan", "--contract", CONTRACT])
        .assert()
        .success()
        .stdout(predicate::str::contains("pluginA.Widget"));
}

#[test]
fn test_inspect_shows_manifest() {
    let dir = TempDir::new().unwrap();
    let module = write_module(dir.path(), "pluginA", "pluginA.so", &widget_manifest("pluginA"));

    isohost()
        .arg("inspect")
        .arg(&module)
        .assert()
        .success()
        .stdout(predicate::str::contains("Name:            pluginA"))
        .stdout(predicate::str::contains("pluginA.Widget -> Widgets.Contract.IWidget"))
        .stdout(predicate::str::contains("fmtlib ^1"));
}

#[test]
fn test_inspect_missing_metadata() {
    let dir = TempDir::new().unwrap();
    let module = dir.path().join("native.so");
    std::fs::write(&module, b"\x7fELF").unwrap();

    isohost().arg("inspect").arg(&module).assert().failure();
}

#[test]
fn test_probe_missing_module() {
    let dir = TempDir::new().unwrap();

    isohost()
        .arg("probe")
        .arg(dir.path().join("pluginA").join("pluginA.so"))
        .args(["--contract", CONTRACT])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Module not found"));
}
