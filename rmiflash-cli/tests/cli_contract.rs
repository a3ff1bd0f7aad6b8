//! Integration tests for core CLI contract behavior.

use {
    predicates::prelude::*,
    std::{fs, path::PathBuf},
    tempfile::{TempDir, tempdir},
};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rmiflash");
    for var in [
        "RMIFLASH_BUS",
        "RMIFLASH_ADDRESS",
        "RMIFLASH_ATTN_GPIO",
        "RMIFLASH_NON_INTERACTIVE",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Minimal format 6 image: 64 firmware bytes, config, then display config.
fn synthetic_image() -> Vec<u8> {
    let mut image = vec![0u8; 0x180];
    image[0x07] = 6;
    image[0x08..0x0C].copy_from_slice(&0x40u32.to_le_bytes());
    image[0x10..0x16].copy_from_slice(b"PLG626");
    image[0x1E] = 1;
    image[0x40..0x44].copy_from_slice(&0x160u32.to_le_bytes());
    image
}

fn write_image(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, data).expect("write image");
    path
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("rmiflash"))
        .stdout(predicate::str::contains("upgrade"))
        .stdout(predicate::str::contains("recover"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rmiflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn completions_bash_exits_zero() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stdout(predicate::str::contains("image-info"));
}

#[test]
fn image_info_json_describes_header() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "PLG626.img", &synthetic_image());

    let output = cli_cmd()
        .arg("image-info")
        .arg("--json")
        .arg(&image)
        .output()
        .expect("command should execute");
    assert!(output.status.success());

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["ok"], true);
    let data = &parsed["data"];
    assert_eq!(data["product_id"], "PLG626");
    assert_eq!(data["format_version"], 6);
    assert_eq!(data["total_size"], 0x180);
    assert_eq!(data["firmware"]["size"], 0x40);
    assert_eq!(data["config_offset"], "0x000140");
    assert_eq!(data["display_config_offset"], "0x000160");
    assert_eq!(data["lockdown"]["blocks"], 5);
    assert!(data["image_version"].is_null());
}

#[test]
fn image_info_human_output_goes_to_stderr() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "PLG626.img", &synthetic_image());

    cli_cmd()
        .arg("image-info")
        .arg(&image)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("PLG626"));
}

#[test]
fn image_info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("not_exists.img");

    cli_cmd()
        .arg("image-info")
        .arg("--json")
        .arg(&nonexistent)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn truncated_image_is_rejected() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "short.img", &synthetic_image()[..0x80]);

    cli_cmd()
        .arg("image-info")
        .arg(&image)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Invalid image"));
}

#[test]
fn upgrade_without_bus_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "PLG626.img", &synthetic_image());

    cli_cmd()
        .current_dir(dir.path())
        .arg("upgrade")
        .arg("--yes")
        .arg(&image)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--bus"));
}

#[test]
fn non_interactive_upgrade_without_yes_fails_fast() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "PLG626.img", &synthetic_image());

    cli_cmd()
        .current_dir(dir.path())
        .args(["--non-interactive", "--bus", "/dev/i2c-does-not-exist"])
        .arg("upgrade")
        .arg(&image)
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn upgrade_rejects_invalid_image_before_touching_device() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "garbage.img", b"not an image");

    cli_cmd()
        .current_dir(dir.path())
        .args(["--bus", "/dev/i2c-does-not-exist", "upgrade", "--yes"])
        .arg(&image)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Invalid image"));
}

#[test]
fn missing_adapter_is_config_error() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "PLG626.img", &synthetic_image());

    cli_cmd()
        .current_dir(dir.path())
        .args(["--bus", "/dev/i2c-does-not-exist", "upgrade", "--yes"])
        .arg(&image)
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("i2c-does-not-exist"));
}

#[test]
fn empty_recovery_image_is_rejected() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "empty.img", &[]);

    cli_cmd()
        .current_dir(dir.path())
        .args(["--bus", "/dev/i2c-does-not-exist", "recover", "--yes"])
        .arg(&image)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("empty"));
}

#[test]
fn bus_from_local_config_file_is_used() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "PLG626.img", &synthetic_image());
    fs::write(
        dir.path().join("rmiflash.toml"),
        "[device]\nbus = \"/dev/i2c-from-config\"\n",
    )
    .expect("write config");

    cli_cmd()
        .current_dir(dir.path())
        .args(["upgrade", "--yes"])
        .arg(&image)
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("i2c-from-config"));
}

#[test]
fn invalid_config_file_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "PLG626.img", &synthetic_image());
    fs::write(dir.path().join("rmiflash.toml"), "invalid toml [[[").expect("write config");

    cli_cmd()
        .current_dir(dir.path())
        .arg("image-info")
        .arg(&image)
        .assert()
        .success()
        .stderr(predicate::str::contains("TOML"));
}

#[test]
fn explicit_config_file_must_parse() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "PLG626.img", &synthetic_image());
    let config = dir.path().join("board.toml");
    fs::write(&config, "invalid toml [[[").expect("write config");

    cli_cmd()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("image-info")
        .arg(&image)
        .assert()
        .failure()
        .code(3)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("board.toml"));
}

#[test]
fn explicit_config_file_must_exist() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(&dir, "PLG626.img", &synthetic_image());

    cli_cmd()
        .current_dir(dir.path())
        .arg("--config")
        .arg(dir.path().join("missing.toml"))
        .arg("image-info")
        .arg(&image)
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("missing.toml"));
}

#[test]
fn exit_code_two_for_unknown_command() {
    cli_cmd()
        .arg("reflsah")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn exit_code_two_for_invalid_address() {
    cli_cmd()
        .args(["--address", "0xZZ", "info"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Invalid hex address"));
}
