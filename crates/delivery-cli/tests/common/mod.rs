#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[allow(dead_code)]
pub const CMD_TIMEOUT: Duration = Duration::from_secs(15);

/// Create a `delivery` command isolated from the caller's environment.
#[allow(dead_code)]
pub fn delivery_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("delivery"));
    cmd.timeout(CMD_TIMEOUT);
    for var in [
        "DELIVERY_CONFIG",
        "DELIVERY_ENVIRONMENT_ID",
        "DELIVERY_API_KEY",
        "DELIVERY_BASE_URL",
        "DELIVERY_PREVIEW",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("NO_COLOR", "1");
    cmd
}

/// Write a config file pointing at `base_url` with a single attempt per request.
#[allow(dead_code)]
pub fn write_config(dir: &Path, base_url: &str) -> PathBuf {
    let path = dir.join("config.toml");
    let contents = format!(
        "environment_id = \"env-1\"\nbase_url = \"{base_url}\"\n\n[retry]\nmax_attempts = 1\nuse_jitter = false\n"
    );
    std::fs::write(&path, contents).expect("failed to write test config");
    path
}
