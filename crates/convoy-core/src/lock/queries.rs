//! Pure helpers for lock naming and owner liveness.

use sha2::{Digest, Sha256};

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub(crate) fn sanitize_branch(branch: &str) -> String {
    branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// First 8 hex chars of SHA-256 over the branch name.
pub(crate) fn branch_hash8(branch: &str) -> String {
    let digest = Sha256::digest(branch.as_bytes());
    hex::encode(digest).chars().take(8).collect()
}

/// Lock filename for a branch; distinct branches never collide even when
/// they sanitize to the same text (`feature/x` vs `feature_x`).
pub(crate) fn lock_file_name(branch: &str) -> String {
    format!("{}-{}.lock", sanitize_branch(branch), branch_hash8(branch))
}

/// Hostname of this machine, `unknown` if it cannot be read.
pub(crate) fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Check if a process is still alive.
#[cfg(target_os = "linux")]
pub(crate) fn is_process_alive(pid: u32) -> bool {
    pid != 0 && std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) fn is_process_alive(pid: u32) -> bool {
    pid != 0
        && std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(true)
}

#[cfg(not(unix))]
pub(crate) fn is_process_alive(pid: u32) -> bool {
    // No cheap liveness check; treat every recorded owner as alive.
    pid != 0
}

/// An owner is stale only when it was recorded on this host and its
/// process is gone. Owners on other hosts cannot be checked.
pub(crate) fn is_owner_stale(hostname: &str, pid: u32) -> bool {
    hostname == current_hostname() && !is_process_alive(pid)
}
