#![forbid(unsafe_code)]

use crate::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};

/// Settled state of a freezer cgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreezeState {
    Thawed,
    Frozen,
}

impl FreezeState {
    pub fn as_str(self) -> &'static str {
        match self {
            FreezeState::Thawed => "THAWED",
            FreezeState::Frozen => "FROZEN",
        }
    }

    /// Parse the contents of `freezer.state`.
    ///
    /// `FREEZING` is reported while the kernel is still stopping tasks and
    /// maps to `None`.
    pub fn parse(raw: &str) -> Result<Option<Self>, Error> {
        match raw.trim() {
            "THAWED" => Ok(Some(FreezeState::Thawed)),
            "FROZEN" => Ok(Some(FreezeState::Frozen)),
            "FREEZING" => Ok(None),
            other => Err(Error::UnknownFreezerState(other.to_owned())),
        }
    }
}

impl fmt::Display for FreezeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The control file through which a group is frozen and thawed.
pub trait Freezer: Send + Sync {
    /// Ask the kernel to move the group into `target`.
    fn request(&self, target: FreezeState) -> Result<(), Error>;

    /// Read the state the kernel currently reports. `None` while a
    /// transition is still in flight.
    fn observe(&self) -> Result<Option<FreezeState>, Error>;
}

/// `freezer.state` of a cgroup v1 freezer group.
#[derive(Debug, Clone)]
pub struct CgroupFreezer {
    path: PathBuf,
}

impl CgroupFreezer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        Error::Freezer {
            path: self.path.clone(),
            source,
        }
    }
}

impl Freezer for CgroupFreezer {
    fn request(&self, target: FreezeState) -> Result<(), Error> {
        std::fs::write(&self.path, target.as_str()).map_err(|err| self.io_error(err))
    }

    fn observe(&self) -> Result<Option<FreezeState>, Error> {
        let raw = std::fs::read_to_string(&self.path).map_err(|err| self.io_error(err))?;
        FreezeState::parse(&raw)
    }
}

/// Bounds for confirming a freezer transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
}

impl From<&config::Cgroup> for TransitionPolicy {
    fn from(cgroup: &config::Cgroup) -> Self {
        Self {
            poll_interval: cgroup.poll_interval,
            timeout: cgroup.transition_timeout,
            retries: cgroup.retries,
        }
    }
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self::from(&config::Cgroup::default())
    }
}

/// Request `target` and wait until the kernel reports it.
///
/// State changes are asynchronous to the write requesting them, so the state
/// file is polled until it matches. Every `timeout` without convergence the
/// request is written again, at most `retries` times; after that the group is
/// considered deadlocked.
pub async fn transition(
    freezer: &dyn Freezer,
    target: FreezeState,
    policy: &TransitionPolicy,
) -> Result<(), Error> {
    freezer.request(target)?;
    let mut retries_left = policy.retries;
    let mut deadline = Instant::now() + policy.timeout;

    loop {
        time::sleep(policy.poll_interval).await;
        let observed = freezer.observe()?;
        if observed == Some(target) {
            debug!(%target, "freezer settled");
            return Ok(());
        }

        if Instant::now() >= deadline {
            if retries_left == 0 {
                error!(%target, ?observed, "cgroup ended up in a deadlock");
                return Err(Error::ControlGroupDeadlock { target });
            }
            retries_left -= 1;
            warn!(%target, ?observed, "freezer did not settle in time, requesting again");
            freezer.request(target)?;
            deadline = Instant::now() + policy.timeout;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Reports `stuck` until `honor_from` requests have been made.
    #[derive(Debug)]
    struct StubbornFreezer {
        honor_from: usize,
        stuck: Option<FreezeState>,
        inner: Mutex<(usize, Option<FreezeState>)>,
    }

    impl StubbornFreezer {
        fn new(honor_from: usize, stuck: Option<FreezeState>) -> Self {
            Self {
                honor_from,
                stuck,
                inner: Mutex::new((0, stuck)),
            }
        }

        fn requests(&self) -> usize {
            self.inner.lock().unwrap().0
        }
    }

    impl Freezer for StubbornFreezer {
        fn request(&self, target: FreezeState) -> Result<(), Error> {
            let mut inner = self.inner.lock().unwrap();
            inner.0 += 1;
            if inner.0 >= self.honor_from {
                inner.1 = Some(target);
            } else {
                inner.1 = self.stuck;
            }
            Ok(())
        }

        fn observe(&self) -> Result<Option<FreezeState>, Error> {
            Ok(self.inner.lock().unwrap().1)
        }
    }

    #[test]
    fn parses_kernel_states() {
        assert_eq!(FreezeState::parse("THAWED\n").unwrap(), Some(FreezeState::Thawed));
        assert_eq!(FreezeState::parse("FROZEN").unwrap(), Some(FreezeState::Frozen));
        assert_eq!(FreezeState::parse("FREEZING\n").unwrap(), None);
        assert!(matches!(
            FreezeState::parse("MELTING"),
            Err(Error::UnknownFreezerState(s)) if s == "MELTING"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn settles_without_retry() {
        let freezer = StubbornFreezer::new(1, Some(FreezeState::Thawed));
        transition(&freezer, FreezeState::Frozen, &TransitionPolicy::default())
            .await
            .unwrap();
        assert_eq!(freezer.requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_once_then_settles() {
        let freezer = StubbornFreezer::new(2, None);
        let policy = TransitionPolicy::default();
        let start = Instant::now();

        transition(&freezer, FreezeState::Frozen, &policy).await.unwrap();

        assert_eq!(freezer.requests(), 2);
        assert!(start.elapsed() >= policy.timeout);
        assert!(start.elapsed() < policy.timeout * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadlock_after_exactly_one_retry() {
        let freezer = StubbornFreezer::new(usize::MAX, Some(FreezeState::Thawed));
        let policy = TransitionPolicy::default();
        let start = Instant::now();

        let err = transition(&freezer, FreezeState::Frozen, &policy)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ControlGroupDeadlock {
                target: FreezeState::Frozen
            }
        ));
        assert_eq!(freezer.requests(), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= policy.timeout * 2);
        assert!(elapsed < policy.timeout * 2 + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn freeze_thaw_roundtrip_on_state_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("freezer.state");
        std::fs::write(&path, "THAWED\n").unwrap();
        let freezer = CgroupFreezer::new(&path);
        let policy = TransitionPolicy::default();

        transition(&freezer, FreezeState::Frozen, &policy).await.unwrap();
        assert_eq!(freezer.observe().unwrap(), Some(FreezeState::Frozen));

        transition(&freezer, FreezeState::Thawed, &policy).await.unwrap();
        assert_eq!(freezer.observe().unwrap(), Some(FreezeState::Thawed));
    }

    #[test]
    fn missing_state_file_is_reported() {
        let dir = tempdir().unwrap();
        let freezer = CgroupFreezer::new(dir.path().join("absent").join("freezer.state"));
        assert!(matches!(
            freezer.request(FreezeState::Frozen),
            Err(Error::Freezer { .. })
        ));
    }
}
