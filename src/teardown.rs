//! Idempotent container teardown. Order is load-bearing: proc must
//! unmount before the overlay (proc sits inside it); cgroups can only
//! be removed once empty (process killed and reaped); the container
//! directory goes last so a crash mid-teardown leaves enough state for
//! a later manual retry.

use std::path::Path;
use std::time::Duration;

use log::{error, trace, warn};

use crate::cgroup;
use crate::container_store::ContainerPaths;
use crate::error::PockyResult;
use crate::linux;
use crate::network;

const SIGTERM_GRACE_POLLS: u32 = 20;
const SIGTERM_GRACE_INTERVAL: Duration = Duration::from_millis(100);

/// Sends SIGTERM, then escalates to SIGKILL if the process is still
/// alive after a bounded grace period. The original source sent only
/// SIGTERM and could leak processes that ignore it.
fn kill_with_escalation(pid: libc::pid_t) {
    if pid <= 0 {
        return;
    }

    match linux::kill(pid, libc::SIGTERM) {
        Ok(()) => {}
        Err(err) => {
            trace!("pid {} already gone before SIGTERM: {}", pid, err);
            return;
        }
    }

    for _ in 0..SIGTERM_GRACE_POLLS {
        if !linux::process_alive(pid) {
            return;
        }
        std::thread::sleep(SIGTERM_GRACE_INTERVAL);
    }

    if linux::process_alive(pid) {
        warn!("pid {} ignored SIGTERM, escalating to SIGKILL", pid);
        if let Err(err) = linux::kill(pid, libc::SIGKILL) {
            trace!("SIGKILL of pid {} failed (already gone?): {}", pid, err);
        }
    }
}

fn tolerate_not_found(result: PockyResult<()>, step: &str) -> PockyResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(crate::error::PockyError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            trace!("{}: already gone", step);
            Ok(())
        }
        Err(crate::error::PockyError::SyscallFailure { message, .. }) if message.contains("No such") => {
            trace!("{}: already gone ({})", step, message);
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Runs the full teardown sequence for one container: network, kill,
/// unmount proc then overlay, remove cgroups, remove the container dir.
/// The netns id is read from the container's persisted `netns.txt`, so
/// this can be invoked standalone (`rm`) or from the post-`run` reaper
/// without the caller having to thread the id through.
///
/// When `suppress_errors` is set (the post-`run` auto-cleanup path),
/// individual step failures are logged rather than surfaced, and
/// teardown continues through the remaining steps regardless.
pub fn run_teardown(container: &ContainerPaths, suppress_errors: bool) -> PockyResult<()> {
    macro_rules! step {
        ($name:expr, $body:expr) => {
            if let Err(err) = $body {
                if suppress_errors {
                    error!("teardown step '{}' for {} failed: {}", $name, container.id, err);
                } else {
                    return Err(err);
                }
            }
        };
    }

    if let Ok(netns_id) = container.read_netns() {
        step!("teardown host network", network::teardown_host_network(netns_id));
    }

    if let Ok(pid) = container.read_pid() {
        kill_with_escalation(pid);
    }

    step!(
        "unmount proc",
        tolerate_not_found(linux::umount(&container.mnt().join("proc")), "unmount proc")
    );
    step!("unmount overlay", tolerate_not_found(linux::umount(&container.mnt()), "unmount overlay"));
    step!("remove cgroups", cgroup::teardown(&container.id));
    step!("remove container dir", remove_container_dir(&container.root));

    Ok(())
}

fn remove_container_dir(root: &Path) -> PockyResult<()> {
    match std::fs::remove_dir_all(root) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_container_dir_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("already_gone");
        assert!(remove_container_dir(&missing).is_ok());
    }
}
