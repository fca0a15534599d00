//! Embeds build identification for `/build_info` and the startup log
//!
//! `PPC_BUILD_HASH` overrides the git lookup (source tarballs have no
//! repository) and `SOURCE_DATE_EPOCH` pins the timestamp for reproducible
//! builds.

use std::env;
use std::process::Command;

use chrono::{DateTime, SecondsFormat, Utc};

fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();
    (!described.is_empty()).then(|| described.to_string())
}

fn build_time() -> DateTime<Utc> {
    env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|secs| secs.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

fn main() {
    println!("cargo:rerun-if-env-changed=PPC_BUILD_HASH");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    // Pick up new commits and checkouts
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/index");

    let hash = env::var("PPC_BUILD_HASH")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(git_describe)
        .unwrap_or_else(|| "unknown".to_string());
    let timestamp = build_time().to_rfc3339_opts(SecondsFormat::Secs, true);
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    for (key, value) in [
        ("GIT_HASH", hash),
        ("BUILD_TIMESTAMP", timestamp),
        ("BUILD_PROFILE", profile),
    ] {
        println!("cargo:rustc-env={}={}", key, value);
    }
}
