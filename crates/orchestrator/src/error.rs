use crate::cgroup::FreezeState;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No cgroup memory controller found below any of {candidates:?}")]
    EnvironmentUnsupported { candidates: Vec<PathBuf> },

    #[error("Cannot find {library} in ${search_path_var}; add its directory to the search path")]
    DependencyMissing {
        library: String,
        search_path_var: String,
    },

    #[error("Failed to start `{command}`: {source}")]
    SubjectLaunchFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cgroup ended up in a deadlock: freezer never reported {target}")]
    ControlGroupDeadlock { target: FreezeState },

    #[error("Failed to create cgroup {path:?}: {source}")]
    CgroupCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set memory limit through {path:?}: {source}")]
    MemoryLimit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to attach pid {pid} to {path:?}: {source}")]
    Attach {
        pid: u32,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to access freezer state {path:?}: {source}")]
    Freezer {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Freezer reported an unknown state: {0:?}")]
    UnknownFreezerState(String),

    #[error("Invalid run configuration: {0}")]
    InvalidRunConfig(&'static str),

    #[error("Failed to write artifact {path:?}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize run summary: {0}")]
    Summary(#[from] serde_json::Error),

    #[error("Failed to read procfs info: {0}")]
    Procfs(#[from] procfs::ProcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
