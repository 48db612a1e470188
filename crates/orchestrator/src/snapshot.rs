#![forbid(unsafe_code)]

use crate::cgroup::{FreezeState, Freezer, TransitionPolicy, transition};
use crate::classify::PageClassifier;
use crate::error::Error;
use crate::history::{RunHistory, Sample};
use crate::maps::MemoryMapSource;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// Freezes the subject, measures its heap and thaws it again.
pub struct SnapshotEngine {
    freezer: Box<dyn Freezer>,
    maps: Box<dyn MemoryMapSource>,
    classifier: Box<dyn PageClassifier>,
    policy: TransitionPolicy,
    artifact_dir: PathBuf,
    output: config::Output,
}

impl SnapshotEngine {
    pub fn new(
        freezer: Box<dyn Freezer>,
        maps: Box<dyn MemoryMapSource>,
        classifier: Box<dyn PageClassifier>,
        policy: TransitionPolicy,
        artifact_dir: PathBuf,
        output: config::Output,
    ) -> Self {
        Self {
            freezer,
            maps,
            classifier,
            policy,
            artifact_dir,
            output,
        }
    }

    pub fn freezer(&self) -> &dyn Freezer {
        self.freezer.as_ref()
    }

    /// Run one freeze, measure, thaw cycle against `pid`.
    ///
    /// Returns `Ok(None)` when the subject has no heap yet; the iteration is
    /// then handed back. A sample is recorded in `history` only after the
    /// subject has been thawed again.
    pub async fn take_snapshot(
        &self,
        pid: u32,
        history: &mut RunHistory,
    ) -> Result<Option<Sample>, Error> {
        let started = Instant::now();
        let iteration = history.begin();
        info!(iteration, pid, "freezing subject");

        if let Err(err) = transition(self.freezer.as_ref(), FreezeState::Frozen, &self.policy).await
        {
            history.rollback();
            return Err(err);
        }

        let measure_started = Instant::now();
        let measured = self.measure(pid, iteration);
        let measure_time = measure_started.elapsed();

        let thawed = transition(self.freezer.as_ref(), FreezeState::Thawed, &self.policy).await;

        let sample = match (measured, thawed) {
            (Ok(Some(sample)), Ok(())) => sample,
            (Ok(None), Ok(())) => {
                info!(iteration, "no heap yet, discarding iteration");
                history.rollback();
                return Ok(None);
            }
            (Err(err), thawed) => {
                if let Err(thaw_err) = thawed {
                    warn!(%thaw_err, "thaw failed after a failed measurement");
                }
                history.rollback();
                return Err(err);
            }
            (Ok(_), Err(err)) => {
                history.rollback();
                return Err(err);
            }
        };

        history.record(&sample);
        info!(
            iteration,
            pages = sample.heap_pages,
            snapshot_ms = started.elapsed().as_millis() as u64,
            pagemap_ms = measure_time.as_millis() as u64,
            "snapshot taken"
        );
        Ok(Some(sample))
    }

    fn measure(&self, pid: u32, iteration: u32) -> Result<Option<Sample>, Error> {
        let Some(heap) = self.maps.heap_range(pid)? else {
            return Ok(None);
        };
        let artifact = self.output.artifact_name(iteration);
        let heap_pages =
            self.classifier
                .classify(pid, iteration, &self.artifact_dir.join(&artifact), heap)?;
        Ok(Some(Sample {
            iteration,
            heap_pages,
            artifact,
        }))
    }
}
