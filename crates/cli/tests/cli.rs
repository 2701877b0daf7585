#![allow(deprecated)]
//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

// `Command::cargo_bin` is deprecated in favor of `assert_cmd::cargo::cargo_bin`
// in newer assert_cmd releases but still the documented entry point for the
// pinned version here.

use std::fs;

use assert_cmd::prelude::*;
use predicates::str::contains;
use std::process::Command;
use tempfile::TempDir;

fn write_input(dir: &TempDir, name: &str, json: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, json).unwrap();
    path
}

/// Runs `keys generate --out-dir <keys_dir>` and returns the fingerprint
/// printed on success.
fn generate_key(keys_dir: &std::path::Path) -> String {
    let output = Command::cargo_bin("vault")
        .unwrap()
        .args(["keys", "generate", "--out-dir"])
        .arg(keys_dir)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    stdout
        .trim()
        .strip_prefix("generated key ")
        .and_then(|s| s.split(' ').next())
        .expect("unexpected keys generate output")
        .to_string()
}

#[test]
fn acceptance_save_then_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let keys_dir = dir.path().join("keys");
    let fingerprint = generate_key(&keys_dir);

    let input = write_input(&dir, "input.json", r#"{"hello":"world"}"#);
    let archive = dir.path().join("out.vault");

    Command::cargo_bin("vault")
        .unwrap()
        .arg("save")
        .arg("--in")
        .arg(&input)
        .arg("--out")
        .arg(&archive)
        .arg("--signing-key")
        .arg(keys_dir.join(format!("{fingerprint}.key")))
        .arg("--passphrase")
        .arg("correct horse battery staple")
        .assert()
        .success()
        .stdout(contains(fingerprint.clone()));

    Command::cargo_bin("vault")
        .unwrap()
        .arg("load")
        .arg("--in")
        .arg(&archive)
        .arg("--keys-dir")
        .arg(&keys_dir)
        .assert()
        .success()
        .stdout(contains("world"));
}

#[test]
fn acceptance_save_rejects_invalid_json() {
    let dir = TempDir::new().unwrap();
    let keys_dir = dir.path().join("keys");
    let fingerprint = generate_key(&keys_dir);

    let input = write_input(&dir, "input.json", "{not json");
    let archive = dir.path().join("out.vault");

    Command::cargo_bin("vault")
        .unwrap()
        .arg("save")
        .arg("--in")
        .arg(&input)
        .arg("--out")
        .arg(&archive)
        .arg("--signing-key")
        .arg(keys_dir.join(format!("{fingerprint}.key")))
        .arg("--passphrase")
        .arg("pw")
        .assert()
        .failure()
        .stderr(contains("not valid JSON"));
}

#[test]
fn acceptance_load_rejects_untrusted_signer() {
    let dir = TempDir::new().unwrap();
    let signing_keys_dir = dir.path().join("keys");
    let fingerprint = generate_key(&signing_keys_dir);

    let input = write_input(&dir, "input.json", r#"{"hello":"world"}"#);
    let archive = dir.path().join("out.vault");

    Command::cargo_bin("vault")
        .unwrap()
        .arg("save")
        .arg("--in")
        .arg(&input)
        .arg("--out")
        .arg(&archive)
        .arg("--signing-key")
        .arg(signing_keys_dir.join(format!("{fingerprint}.key")))
        .arg("--passphrase")
        .arg("pw")
        .assert()
        .success();

    let empty_keys_dir = dir.path().join("no-such-keys");
    fs::create_dir_all(&empty_keys_dir).unwrap();

    Command::cargo_bin("vault")
        .unwrap()
        .arg("load")
        .arg("--in")
        .arg(&archive)
        .arg("--keys-dir")
        .arg(&empty_keys_dir)
        .assert()
        .failure()
        .stderr(contains("not present in the trusted keyring"));
}

#[test]
fn acceptance_load_rejects_tampered_archive() {
    let dir = TempDir::new().unwrap();
    let keys_dir = dir.path().join("keys");
    let fingerprint = generate_key(&keys_dir);

    let input = write_input(&dir, "input.json", r#"{"hello":"world"}"#);
    let archive = dir.path().join("out.vault");

    Command::cargo_bin("vault")
        .unwrap()
        .arg("save")
        .arg("--in")
        .arg(&input)
        .arg("--out")
        .arg(&archive)
        .arg("--signing-key")
        .arg(keys_dir.join(format!("{fingerprint}.key")))
        .arg("--passphrase")
        .arg("pw")
        .assert()
        .success();

    let mut bytes = fs::read(&archive).unwrap();
    let flip_at = bytes.len() - 5;
    bytes[flip_at] ^= 0xff;
    fs::write(&archive, bytes).unwrap();

    Command::cargo_bin("vault")
        .unwrap()
        .arg("load")
        .arg("--in")
        .arg(&archive)
        .arg("--keys-dir")
        .arg(&keys_dir)
        .assert()
        .failure();
}

#[test]
fn acceptance_keys_expiring_reports_none_when_fresh() {
    let dir = TempDir::new().unwrap();
    let keys_dir = dir.path().join("keys");
    generate_key(&keys_dir);

    Command::cargo_bin("vault")
        .unwrap()
        .arg("keys")
        .arg("expiring")
        .arg("--keys-dir")
        .arg(&keys_dir)
        .assert()
        .success()
        .stdout(contains("no trusted keys expire"));
}

#[test]
fn acceptance_keys_expiring_fails_when_key_within_window() {
    let dir = TempDir::new().unwrap();
    let keys_dir = dir.path().join("keys");
    let fingerprint = generate_key(&keys_dir);

    let soon = chrono::Utc::now() + chrono::Duration::days(1);
    fs::write(
        keys_dir.join(format!("{fingerprint}.meta.json")),
        serde_json::json!({
            "trust": "ultimate",
            "expires_at": soon.to_rfc3339(),
        })
        .to_string(),
    )
    .unwrap();

    Command::cargo_bin("vault")
        .unwrap()
        .arg("keys")
        .arg("expiring")
        .arg("--keys-dir")
        .arg(&keys_dir)
        .arg("--days-before-warning")
        .arg("30")
        .assert()
        .failure()
        .stderr(contains("expire within"));
}
