use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Subject {
    /// File name of the heap interposition library preloaded into the
    /// subject.
    pub interposer: String,

    /// Environment variable holding the colon separated directories searched
    /// for [`Subject::interposer`].
    pub search_path_var: String,

    /// File receiving both stdout and stderr of the subject, relative to the
    /// output directory.
    pub output_file: String,

    /// How often the signal-driven loop checks whether the subject is still
    /// alive. **Measured in milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub liveness_poll: Duration,

    /// Default for `MALLOC_INTERPOSE_OUTFILE`. `%p` is replaced by the pid of
    /// the subject.
    pub outfile_template: String,

    /// Default for `MALLOC_INTERPOSE_DEPTH`, the captured call-stack depth.
    pub depth: u32,

    /// Default for `MALLOC_INTERPOSE_SHIFT`.
    pub shift: u32,
}

impl Default for Subject {
    fn default() -> Self {
        Self {
            interposer: "libMallocHook.so".into(),
            search_path_var: "LD_LIBRARY_PATH".into(),
            output_file: "output".into(),
            liveness_poll: Duration::from_secs(1),
            outfile_template: "mallocOutput_%p.fom".into(),
            depth: 100,
            shift: 10,
        }
    }
}
