#![forbid(unsafe_code)]

//! Memory and freezer sub-groups owned by one monitoring run.
//!
//! Both live in a cgroup v1 hierarchy at
//! `<mount>/{memory,freezer}/<group>/<leaf>`. Every control file is written
//! directly; the kernel serializes concurrent writers.

mod freezer;

pub use freezer::{CgroupFreezer, FreezeState, Freezer, TransitionPolicy, transition};

use crate::error::Error;
use humansize::{BINARY, format_size};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MEMORY: &str = "memory";
const FREEZER: &str = "freezer";
const TASKS: &str = "tasks";
const LIMIT_IN_BYTES: &str = "memory.limit_in_bytes";
const FREEZER_STATE: &str = "freezer.state";

/// Return the first candidate that carries a memory controller.
pub fn locate_mount<P: AsRef<Path>>(candidates: &[P]) -> Result<PathBuf, Error> {
    for candidate in candidates {
        let candidate = candidate.as_ref();
        if candidate.join(MEMORY).is_dir() {
            debug!(mount = ?candidate, "found cgroup mount");
            return Ok(candidate.to_path_buf());
        }
    }
    Err(Error::EnvironmentUnsupported {
        candidates: candidates
            .iter()
            .map(|c| c.as_ref().to_path_buf())
            .collect(),
    })
}

#[derive(Debug, Clone)]
pub struct CgroupController {
    memory: PathBuf,
    freezer: PathBuf,
}

impl CgroupController {
    pub fn new(mount: &Path, group: &str, leaf: &str) -> Self {
        Self {
            memory: mount.join(MEMORY).join(group).join(leaf),
            freezer: mount.join(FREEZER).join(group).join(leaf),
        }
    }

    pub fn memory_dir(&self) -> &Path {
        &self.memory
    }

    pub fn freezer_dir(&self) -> &Path {
        &self.freezer
    }

    /// Create both sub-groups. Existing groups are reused.
    ///
    /// The parent group must already exist under each controller. A failure
    /// removes the sub-groups created by this call again.
    pub fn create(&self) -> Result<(), Error> {
        let mut created = Vec::new();
        for dir in [&self.memory, &self.freezer] {
            match std::fs::create_dir(dir) {
                Ok(()) => {
                    debug!(path = ?dir, "cgroup created");
                    created.push(dir);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists && dir.is_dir() => {
                    info!(path = ?dir, "cgroup already exists");
                }
                Err(source) => {
                    for dir in created.into_iter().rev() {
                        if let Err(err) = std::fs::remove_dir(dir) {
                            warn!(path = ?dir, %err, "failed to roll back cgroup");
                        }
                    }
                    return Err(Error::CgroupCreate {
                        path: dir.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn set_memory_limit(&self, bytes: u64) -> Result<(), Error> {
        let path = self.memory.join(LIMIT_IN_BYTES);
        std::fs::write(&path, bytes.to_string())
            .map_err(|source| Error::MemoryLimit { path, source })?;
        info!(bytes, limit = %format_size(bytes, BINARY), "memory limit set");
        Ok(())
    }

    /// Move `pid` into the memory and the freezer sub-group.
    pub fn attach(&self, pid: u32) -> Result<(), Error> {
        for dir in [&self.memory, &self.freezer] {
            let path = dir.join(TASKS);
            std::fs::write(&path, pid.to_string())
                .map_err(|source| Error::Attach { pid, path, source })?;
        }
        debug!(pid, "attached to cgroups");
        Ok(())
    }

    pub fn freezer(&self) -> CgroupFreezer {
        CgroupFreezer::new(self.freezer.join(FREEZER_STATE))
    }

    /// Remove both sub-groups. Failures are logged and otherwise ignored.
    pub fn destroy(&self) {
        for dir in [&self.memory, &self.freezer] {
            match std::fs::remove_dir(dir) {
                Ok(()) => debug!(path = ?dir, "cgroup removed"),
                Err(err) => warn!(path = ?dir, %err, "failed to remove cgroup"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    /// Both controllers with the groups `bench` already present.
    fn fake_mount() -> TempDir {
        let dir = tempdir().unwrap();
        for controller in [MEMORY, FREEZER] {
            std::fs::create_dir_all(dir.path().join(controller).join("bench")).unwrap();
        }
        dir
    }

    #[test]
    fn locate_mount_picks_first_with_memory_controller() {
        let empty = tempdir().unwrap();
        let mount = fake_mount();
        let missing = empty.path().join("nope");

        let candidates = [
            missing,
            empty.path().to_path_buf(),
            mount.path().to_path_buf(),
        ];
        let found = locate_mount(&candidates).unwrap();
        assert_eq!(found, mount.path());
    }

    #[test]
    fn locate_mount_fails_without_candidates() {
        let empty = tempdir().unwrap();
        let err = locate_mount(&[empty.path()]).unwrap_err();
        assert!(matches!(err, Error::EnvironmentUnsupported { candidates } if candidates.len() == 1));
    }

    #[test]
    fn create_is_idempotent() {
        let mount = fake_mount();
        let cgroup = CgroupController::new(mount.path(), "bench", "heapfreeze");

        cgroup.create().unwrap();
        cgroup.attach(4242).unwrap();
        cgroup.create().unwrap();

        assert!(cgroup.memory_dir().is_dir());
        assert!(cgroup.freezer_dir().is_dir());
        let tasks = std::fs::read_to_string(cgroup.freezer_dir().join(TASKS)).unwrap();
        assert_eq!(tasks, "4242");
    }

    #[test]
    fn create_fails_when_path_is_blocked() {
        let mount = fake_mount();
        std::fs::write(mount.path().join(MEMORY).join("bench/heapfreeze"), "").unwrap();
        let cgroup = CgroupController::new(mount.path(), "bench", "heapfreeze");

        assert!(matches!(cgroup.create(), Err(Error::CgroupCreate { .. })));
    }

    #[test]
    fn create_requires_existing_group() {
        let mount = fake_mount();
        let cgroup = CgroupController::new(mount.path(), "missing", "heapfreeze");

        let err = cgroup.create().unwrap_err();
        assert!(matches!(err, Error::CgroupCreate { path, .. } if path == cgroup.memory_dir()));
        assert!(!mount.path().join(MEMORY).join("missing").exists());
    }

    #[test]
    fn create_rolls_back_on_partial_failure() {
        let mount = fake_mount();
        std::fs::remove_dir(mount.path().join(FREEZER).join("bench")).unwrap();
        let cgroup = CgroupController::new(mount.path(), "bench", "heapfreeze");

        let err = cgroup.create().unwrap_err();
        assert!(matches!(err, Error::CgroupCreate { path, .. } if path == cgroup.freezer_dir()));
        assert!(!cgroup.memory_dir().exists());
        assert!(mount.path().join(MEMORY).join("bench").is_dir());
    }

    #[test]
    fn create_keeps_reused_groups_on_failure() {
        let mount = fake_mount();
        std::fs::create_dir(mount.path().join(MEMORY).join("bench/heapfreeze")).unwrap();
        std::fs::remove_dir(mount.path().join(FREEZER).join("bench")).unwrap();
        let cgroup = CgroupController::new(mount.path(), "bench", "heapfreeze");

        assert!(cgroup.create().is_err());
        assert!(cgroup.memory_dir().is_dir());
    }

    #[test]
    fn limit_and_tasks_are_written() {
        let mount = fake_mount();
        let cgroup = CgroupController::new(mount.path(), "bench", "leaf");
        cgroup.create().unwrap();

        cgroup.set_memory_limit(1 << 30).unwrap();
        cgroup.attach(77).unwrap();

        let limit = std::fs::read_to_string(cgroup.memory_dir().join(LIMIT_IN_BYTES)).unwrap();
        assert_eq!(limit, "1073741824");
        for dir in [cgroup.memory_dir(), cgroup.freezer_dir()] {
            assert_eq!(std::fs::read_to_string(dir.join(TASKS)).unwrap(), "77");
        }
        assert_eq!(
            cgroup.freezer().path(),
            mount.path().join("freezer/bench/leaf/freezer.state")
        );
    }

    #[test]
    fn limit_failure_is_fatal() {
        let mount = fake_mount();
        let cgroup = CgroupController::new(mount.path(), "bench", "leaf");
        assert!(matches!(
            cgroup.set_memory_limit(1024),
            Err(Error::MemoryLimit { .. })
        ));
    }

    #[test]
    fn destroy_swallows_errors() {
        let mount = fake_mount();
        let cgroup = CgroupController::new(mount.path(), "bench", "leaf");
        cgroup.destroy();

        cgroup.create().unwrap();
        cgroup.destroy();
        assert!(!cgroup.memory_dir().exists());
        assert!(!cgroup.freezer_dir().exists());
    }
}
