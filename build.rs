//! Stamps build metadata into the binaries so startup logs and the solver
//! image tag can be traced back to a commit.

use std::process::Command;

fn main() {
    let built_at = std::env::var("BUILD_DATETIME")
        .unwrap_or_else(|_| chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());

    let git_hash = std::env::var("BUILD_GIT_HASH")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(git_revision)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=BUILD_DATETIME={built_at}");
    println!("cargo:rustc-env=BUILD_GIT_HASH={git_hash}");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=BUILD_DATETIME");
    println!("cargo:rerun-if-env-changed=BUILD_GIT_HASH");
}

/// Short commit hash, suffixed with `-dirty` when the tree has local changes.
/// Uses the git CLI rather than a git library to keep OpenSSL out of the build.
fn git_revision() -> Option<String> {
    let head = Command::new("git")
        .args(["rev-parse", "--short=12", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())?;
    let hash = String::from_utf8(head.stdout).ok()?.trim().to_string();

    let dirty = Command::new("git")
        .args(["status", "--porcelain", "--untracked-files=no"])
        .output()
        .is_ok_and(|out| out.status.success() && !out.stdout.is_empty());

    Some(if dirty { format!("{hash}-dirty") } else { hash })
}
