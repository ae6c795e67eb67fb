use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn overmount() -> Command {
    Command::cargo_bin("overmount").unwrap()
}

#[test]
fn test_help_output() {
    overmount()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("render"))
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("decompress"));
}

#[test]
fn test_version_output() {
    overmount()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.3.1"));
}

#[test]
fn test_no_subcommand_fails_with_usage() {
    overmount()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_subcommand() {
    overmount()
        .arg("unknown")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_render_without_config_env_fails() {
    overmount()
        .arg("render")
        .env_remove("RENDER_CONFIG")
        .assert()
        .failure()
        .stderr(predicate::str::contains("RENDER_CONFIG"))
        .stderr(predicate::str::contains("missing"));
}

#[test]
fn test_render_with_malformed_config_fails() {
    overmount()
        .arg("render")
        .env("RENDER_CONFIG", "{not json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot parse"));
}

#[test]
fn test_watch_without_view_config_fails() {
    overmount()
        .arg("watch")
        .env_remove("RENDER_CONFIG")
        .assert()
        .failure()
        .stderr(predicate::str::contains("RENDER_CONFIG"));
}

#[test]
fn test_decompress_requires_a_path() {
    overmount()
        .arg("decompress")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--path"));
}

#[test]
#[cfg(unix)]
fn test_render_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("base");
    let view = tmp.path().join("view");
    fs::create_dir_all(&base).unwrap();
    fs::write(base.join("motd.txt"), "welcome").unwrap();

    let config = serde_json::json!({
        "basePath": base,
        "targetBase": view,
        "targetContent": view.join("game"),
    });

    overmount()
        .arg("render")
        .env("RENDER_CONFIG", config.to_string())
        .assert()
        .success();

    let rendered = view.join("motd.txt");
    assert!(fs::symlink_metadata(&rendered).unwrap().is_symlink());
    assert_eq!(fs::read_to_string(&rendered).unwrap(), "welcome");
}

#[test]
#[cfg(unix)]
fn test_render_honors_custom_env_name() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("base");
    let view = tmp.path().join("view");
    fs::create_dir_all(&base).unwrap();
    fs::write(base.join("a.txt"), "a").unwrap();

    let config = serde_json::json!({
        "basePath": base,
        "targetBase": view,
        "targetContent": view,
    });

    overmount()
        .args(["render", "--config-env", "MY_VIEW"])
        .env_remove("RENDER_CONFIG")
        .env("MY_VIEW", config.to_string())
        .assert()
        .success();

    assert!(view.join("a.txt").exists());
}

#[test]
fn test_decompress_end_to_end_with_cache() {
    use bzip2::write::BzEncoder;
    use bzip2::Compression;
    use std::io::Write;

    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("content");
    fs::create_dir_all(&root).unwrap();

    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(b"payload").unwrap();
    fs::write(root.join("file.txt.bz2"), encoder.finish().unwrap()).unwrap();

    let cache = tmp.path().join("cache.json");
    overmount()
        .args(["decompress", "--path"])
        .arg(&root)
        .arg("--cache")
        .arg(&cache)
        .assert()
        .success();

    assert_eq!(fs::read(root.join("file.txt")).unwrap(), b"payload");
    assert!(!root.join("file.txt.bz2").exists());
    let cache_doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&cache).unwrap()).unwrap();
    assert!(cache_doc["entries"]
        .as_object()
        .unwrap()
        .keys()
        .any(|k| k.ends_with("file.txt")));
}

#[test]
fn test_decompress_missing_root_is_not_fatal() {
    let tmp = TempDir::new().unwrap();
    overmount()
        .args(["decompress", "--path"])
        .arg(tmp.path().join("absent"))
        .assert()
        .success();
}
