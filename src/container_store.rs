//! On-disk container store: one `ps_<uuid>` directory per container,
//! holding the overlay upper/work/mount roots plus provenance metadata.
//! Allocation undoes itself on partial failure; metadata is write-once
//! and happens before the first fork so teardown can always locate it.

use std::path::PathBuf;

use log::error;
use uuid::Uuid;

use crate::cgroup;
use crate::config::PockyConfig;
use crate::error::PockyResult;

pub const PS_PREFIX: &str = "ps";
pub const SRC_FILE: &str = "src.txt";
pub const CMD_FILE: &str = "cmd.txt";
pub const PID_FILE: &str = "pid.txt";
pub const NETNS_FILE: &str = "netns.txt";

/// The directories that make up one container, rooted at `ps_<uuid>`.
#[derive(Debug, Clone)]
pub struct ContainerPaths {
    pub id: String,
    pub root: PathBuf,
}

impl ContainerPaths {
    pub fn mnt(&self) -> PathBuf {
        self.root.join("fs").join("mnt")
    }

    pub fn upperdir(&self) -> PathBuf {
        self.root.join("fs").join("upperdir")
    }

    pub fn workdir(&self) -> PathBuf {
        self.root.join("fs").join("workdir")
    }

    pub fn src_file(&self) -> PathBuf {
        self.root.join(SRC_FILE)
    }

    pub fn cmd_file(&self) -> PathBuf {
        self.root.join(CMD_FILE)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join(PID_FILE)
    }

    pub fn netns_file(&self) -> PathBuf {
        self.root.join(NETNS_FILE)
    }

    pub fn write_src(&self, src: &str) -> PockyResult<()> {
        Ok(std::fs::write(self.src_file(), src)?)
    }

    pub fn write_cmd(&self, cmd: &[String]) -> PockyResult<()> {
        Ok(std::fs::write(self.cmd_file(), cmd.join(" "))?)
    }

    pub fn write_pid(&self, pid: libc::pid_t) -> PockyResult<()> {
        Ok(std::fs::write(self.pid_file(), pid.to_string())?)
    }

    pub fn write_netns(&self, netns_id: u32) -> PockyResult<()> {
        Ok(std::fs::write(self.netns_file(), netns_id.to_string())?)
    }

    pub fn read_pid(&self) -> PockyResult<libc::pid_t> {
        let raw = std::fs::read_to_string(self.pid_file())?;
        Ok(raw.trim().parse().unwrap_or(0))
    }

    pub fn read_netns(&self) -> PockyResult<u32> {
        let raw = std::fs::read_to_string(self.netns_file())?;
        Ok(raw.trim().parse().unwrap_or(0))
    }
}

pub struct ContainerStore {
    config: PockyConfig,
}

impl ContainerStore {
    pub fn new(config: PockyConfig) -> Self {
        ContainerStore { config }
    }

    fn dir_name(uuid: &str) -> String {
        format!("{}_{}", PS_PREFIX, uuid)
    }

    /// Generates a fresh UUID and creates `ps_<uuid>/`, `fs/`, and
    /// `fs/{mnt,upperdir,workdir}` in that order. Any failed `mkdir`
    /// undoes everything created so far before surfacing the error.
    pub fn allocate(&self) -> PockyResult<ContainerPaths> {
        let uuid = Uuid::new_v4().to_string();
        let root = self.config.root.join(Self::dir_name(&uuid));

        let dirs = [
            root.clone(),
            root.join("fs"),
            root.join("fs").join("mnt"),
            root.join("fs").join("upperdir"),
            root.join("fs").join("workdir"),
        ];

        for (i, dir) in dirs.iter().enumerate() {
            if let Err(err) = std::fs::create_dir(dir) {
                for created in dirs[..i].iter().rev() {
                    if let Err(cleanup_err) = std::fs::remove_dir_all(created) {
                        error!("failed to undo partial container allocation at {}: {}", created.display(), cleanup_err);
                    }
                }
                return Err(err.into());
            }
        }

        Ok(ContainerPaths { id: uuid, root })
    }

    pub fn resolve(&self, short_id: &str) -> PockyResult<ContainerPaths> {
        let wanted_prefix = Self::dir_name(short_id);

        let matches: Vec<PathBuf> = std::fs::read_dir(&self.config.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with(&wanted_prefix))
                    .unwrap_or(false)
            })
            .collect();

        match matches.len() {
            0 => Err(crate::error::PockyError::NotFound(short_id.to_string())),
            1 => {
                let root = matches.into_iter().next().unwrap();
                let id = root
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(|name| name.strip_prefix(&format!("{}_", PS_PREFIX)))
                    .unwrap_or(short_id)
                    .to_string();
                Ok(ContainerPaths { id, root })
            }
            _ => Err(crate::error::PockyError::Ambiguous(short_id.to_string())),
        }
    }

    pub fn list(&self) -> PockyResult<Vec<ContainerPaths>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.config.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(id) = name.strip_prefix(&format!("{}_", PS_PREFIX)) {
                out.push(ContainerPaths {
                    id: id.to_string(),
                    root: path.clone(),
                });
            }
        }
        Ok(out)
    }

    /// A container is "running" (per `ps`) if its cpu cgroup still lists
    /// at least one task -- the cgroup hierarchy outlives SIGTERM delivery
    /// until the process is actually reaped.
    pub fn is_running(&self, id: &str) -> bool {
        let cgroup_procs = cgroup::hierarchy_dir("cpu", id).join("cgroup.procs");
        std::fs::read_to_string(cgroup_procs)
            .map(|contents| !contents.trim().is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_creates_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContainerStore::new(PockyConfig::new(dir.path().to_owned()));
        let paths = store.allocate().unwrap();

        assert!(paths.mnt().is_dir());
        assert!(paths.upperdir().is_dir());
        assert!(paths.workdir().is_dir());
    }

    #[test]
    fn metadata_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContainerStore::new(PockyConfig::new(dir.path().to_owned()));
        let paths = store.allocate().unwrap();

        paths.write_pid(42).unwrap();
        paths.write_netns(7).unwrap();
        assert_eq!(paths.read_pid().unwrap(), 42);
        assert_eq!(paths.read_netns().unwrap(), 7);
    }

    #[test]
    fn resolve_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContainerStore::new(PockyConfig::new(dir.path().to_owned()));
        let paths = store.allocate().unwrap();

        let prefix = &paths.id[..8];
        let resolved = store.resolve(prefix).unwrap();
        assert_eq!(resolved.id, paths.id);
    }
}
