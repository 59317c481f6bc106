//! Per-container cgroup v1 directories in the `cpu`, `cpuacct`,
//! `memory`, `pids` hierarchies. The contained process's pid must appear
//! in `cgroup.procs` of every hierarchy before it calls `exec`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::ResourceLimits;
use crate::container_store::PS_PREFIX;
use crate::error::{PockyError, PockyResult};

const BASE_CGROUPS: &str = "/sys/fs/cgroup";
const HIERARCHIES: [&str; 4] = ["cpuacct", "cpu", "memory", "pids"];
/// cpuacct shares its directory with cpu on most kernels; only these
/// are independently removed during teardown.
const TEARDOWN_HIERARCHIES: [&str; 3] = ["cpu", "memory", "pids"];

pub fn hierarchy_dir(hierarchy: &str, container_id: &str) -> PathBuf {
    Path::new(BASE_CGROUPS).join(hierarchy).join(format!("{}_{}", PS_PREFIX, container_id))
}

/// Creates the per-hierarchy cgroup dirs (if absent), appends `pid` to
/// each `cgroup.procs`, then writes the resolved resource limits. Must
/// run with the contained process's own pid, before it calls `exec`.
pub fn install(container_id: &str, pid: libc::pid_t, limits: &ResourceLimits) -> PockyResult<()> {
    for hierarchy in HIERARCHIES {
        let dir = hierarchy_dir(hierarchy, container_id);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }

        let mut procs = OpenOptions::new().append(true).create(true).open(dir.join("cgroup.procs"))?;
        writeln!(procs, "{}", pid)?;
    }

    write_limit(hierarchy_dir("cpu", container_id).join("cpu.shares"), limits.cpu_shares.to_string())?;
    write_limit(
        hierarchy_dir("memory", container_id).join("memory.limit_in_bytes"),
        limits.memory_bytes.to_string(),
    )?;
    // swappiness=0 forces the memory limit to apply in RAM rather than via swap
    write_limit(hierarchy_dir("memory", container_id).join("memory.swappiness"), "0".to_string())?;
    write_limit(hierarchy_dir("pids", container_id).join("pids.max"), limits.pids_max.to_string())?;

    Ok(())
}

/// Writes a resource-limit file, reclassifying `EBUSY`/`ENOSPC` as
/// `ResourceExhaustion` rather than a bare I/O error -- the cgroup
/// rejected the value, it didn't fail to reach the filesystem.
fn write_limit(path: PathBuf, value: String) -> PockyResult<()> {
    fs::write(&path, &value).map_err(|err| match err.raw_os_error() {
        Some(code) if code == libc::EBUSY || code == libc::ENOSPC => {
            PockyError::ResourceExhaustion(format!("{}: {}", path.display(), err))
        }
        _ => err.into(),
    })
}

/// Removes the per-hierarchy cgroup dirs. Tolerates a dir that is
/// already gone; any other errno is surfaced so callers can log it.
pub fn teardown(container_id: &str) -> PockyResult<()> {
    for hierarchy in TEARDOWN_HIERARCHIES {
        let dir = hierarchy_dir(hierarchy, container_id);
        match fs::remove_dir(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_dir_uses_ps_prefix() {
        let dir = hierarchy_dir("cpu", "abc123");
        assert_eq!(dir, Path::new("/sys/fs/cgroup/cpu/ps_abc123"));
    }

    #[test]
    fn write_limit_to_missing_dir_is_plain_io_error() {
        let path = Path::new("/nonexistent/pocky-test-dir/cpu.shares").to_owned();
        let err = write_limit(path, "512".to_string()).unwrap_err();
        assert!(matches!(err, PockyError::Io(_)));
    }
}
