#![forbid(unsafe_code)]

use crate::error::Error;
use crate::history::RunHistory;
use crate::run_config::{RunConfig, SamplingMode};
use crate::subject::InterposeSettings;
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// The record left behind by every run that got as far as launching its
/// subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    #[serde(rename = "Executed Command")]
    pub command: String,
    #[serde(rename = "Memory Limit")]
    pub memory_limit: u64,
    #[serde(rename = "Interval")]
    pub interval: SamplingMode,
    #[serde(rename = "Stacktrace Depth")]
    pub depth: String,
    #[serde(rename = "Interpose Shift")]
    pub shift: String,
    #[serde(rename = "Maximum Heapsize")]
    pub peak_pages: u64,
    #[serde(rename = "Number Of Output Files")]
    pub iterations: u32,
    #[serde(rename = "Pid")]
    pub pid: u32,
    #[serde(rename = "Malloc Output File")]
    pub malloc_output: String,
    #[serde(rename = "Heap Sizes")]
    pub heap_sizes: Vec<u64>,
    #[serde(rename = "Output Files")]
    pub artifacts: Vec<String>,
}

impl RunSummary {
    pub fn new(
        run: &RunConfig,
        interpose: &InterposeSettings,
        pid: u32,
        history: &RunHistory,
    ) -> Self {
        Self {
            command: run.command_line(),
            memory_limit: run.memory_limit,
            interval: run.mode(),
            depth: interpose.depth.clone(),
            shift: interpose.shift.clone(),
            peak_pages: history.peak_pages(),
            iterations: history.iteration(),
            pid,
            malloc_output: interpose.outfile_for(pid),
            heap_sizes: history.heap_sizes().to_vec(),
            artifacts: history.artifacts().to_vec(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let mut out = BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.write_all(b"\n")?;
        out.flush()?;
        info!(?path, iterations = self.iterations, "summary written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Sample;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    fn interpose() -> InterposeSettings {
        InterposeSettings {
            library: PathBuf::from("/lib/libMallocHook.so"),
            outfile: "/runs/mallocOutput_%p.fom".into(),
            depth: "100".into(),
            shift: "10".into(),
        }
    }

    fn run(interval: Option<Duration>) -> RunConfig {
        RunConfig {
            cgroup: "bench".into(),
            memory_limit: 4096,
            interval,
            command: vec!["./app".into(), "--fast".into()],
            directory: None,
        }
    }

    #[test]
    fn summary_uses_established_keys() {
        let mut history = RunHistory::default();
        for pages in [3, 9, 4] {
            let iteration = history.begin();
            history.record(&Sample {
                iteration,
                heap_pages: pages,
                artifact: format!("iteration{iteration:04}"),
            });
        }
        let summary = RunSummary::new(&run(Some(Duration::from_secs(5))), &interpose(), 812, &history);

        let dir = tempdir().unwrap();
        let path = dir.path().join("FOMSummary.json");
        summary.write(&path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(json["Executed Command"], "./app --fast");
        assert_eq!(json["Memory Limit"], 4096);
        assert_eq!(json["Interval"], 5);
        assert_eq!(json["Stacktrace Depth"], "100");
        assert_eq!(json["Interpose Shift"], "10");
        assert_eq!(json["Maximum Heapsize"], 9);
        assert_eq!(json["Number Of Output Files"], 3);
        assert_eq!(json["Pid"], 812);
        assert_eq!(json["Malloc Output File"], "/runs/mallocOutput_812.fom");
        assert_eq!(json["Heap Sizes"], serde_json::json!([3, 9, 4]));
        assert_eq!(
            json["Output Files"],
            serde_json::json!(["iteration0001", "iteration0002", "iteration0003"])
        );
    }

    #[test]
    fn empty_run_is_valid() {
        let summary = RunSummary::new(&run(None), &interpose(), 1, &RunHistory::default());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["Interval"], "signal-driven");
        assert_eq!(json["Maximum Heapsize"], 0);
        assert_eq!(json["Number Of Output Files"], 0);
        assert_eq!(json["Heap Sizes"], serde_json::json!([]));
        assert_eq!(json["Output Files"], serde_json::json!([]));
    }
}
