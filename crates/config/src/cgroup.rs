use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::path::PathBuf;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Cgroup {
    /// Directories searched, in order, for a cgroup v1 hierarchy. The first
    /// one that contains a `memory` controller directory is used.
    pub mount_candidates: Vec<PathBuf>,

    /// Name of the sub-group created below the group given on the command
    /// line, in both the memory and the freezer hierarchy.
    pub leaf: String,

    /// Pause between two reads of `freezer.state` while waiting for a
    /// transition to settle. **Measured in milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub poll_interval: Duration,

    /// How long a single freeze or thaw request may take before it is
    /// re-issued. **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub transition_timeout: Duration,

    /// Number of times a stalled request is re-issued before the group is
    /// declared deadlocked.
    ///
    /// ## Note
    ///
    /// Once the kernel and the monitor disagree about the freezer state the
    /// subject can no longer be trusted, so this should stay small.
    pub retries: u32,
}

impl Default for Cgroup {
    fn default() -> Self {
        Self {
            mount_candidates: vec![
                PathBuf::from("/sys/fs/cgroup"),
                PathBuf::from("/cgroup"),
                PathBuf::from("/mnt/cgroup"),
            ],
            leaf: "heapfreeze".into(),
            poll_interval: Duration::from_millis(1),
            transition_timeout: Duration::from_secs(10),
            retries: 1,
        }
    }
}
