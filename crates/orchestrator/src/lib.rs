#![forbid(unsafe_code)]

pub mod cgroup;
pub mod classify;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod maps;
pub mod run_config;
pub mod signals;
pub mod snapshot;
pub mod subject;
pub mod summary;

pub use cgroup::{
    CgroupController, CgroupFreezer, FreezeState, Freezer, TransitionPolicy, locate_mount,
    transition,
};
pub use classify::{PageClassifier, PageEntry, PagemapClassifier};
pub use coordinator::{ControlEvent, RunCoordinator, RunOutcome, RunReport, Services};
pub use error::Error;
pub use history::{RunHistory, Sample};
pub use maps::{HeapRange, MemoryMapSource, ProcfsMaps};
pub use run_config::{RunConfig, SamplingMode};
pub use signals::SignalForwarder;
pub use snapshot::SnapshotEngine;
pub use subject::{Environment, InterposeSettings, Subject, resolve_interposer};
pub use summary::RunSummary;
