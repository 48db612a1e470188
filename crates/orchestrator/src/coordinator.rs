#![forbid(unsafe_code)]

use crate::cgroup::{CgroupController, FreezeState, Freezer, TransitionPolicy, locate_mount};
use crate::classify::{PageClassifier, PagemapClassifier};
use crate::error::Error;
use crate::history::RunHistory;
use crate::maps::{MemoryMapSource, ProcfsMaps};
use crate::run_config::{RunConfig, SamplingMode};
use crate::snapshot::SnapshotEngine;
use crate::subject::{Environment, InterposeSettings, Subject, resolve_interposer};
use crate::summary::RunSummary;
use config::Config;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Services {
    pub maps: Box<dyn MemoryMapSource>,
    pub classifier: Box<dyn PageClassifier>,
    /// Replaces the `freezer.state` of the run's sub-group when set.
    pub freezer: Option<Box<dyn Freezer>>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            maps: Box::new(ProcfsMaps),
            classifier: Box::new(PagemapClassifier::default()),
            freezer: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Take one snapshot now. Only honored in signal-driven mode.
    SampleNow,
    /// Log the current run state.
    DumpStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    SubjectExited,
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub summary: RunSummary,
    pub summary_path: PathBuf,
}

enum Wake {
    Interrupt,
    Exited(ExitStatus),
    Control(ControlEvent),
    Timer,
}

/// Drives one monitoring run from subject launch to summary.
pub struct RunCoordinator {
    run: RunConfig,
    config: Config,
    cgroup: CgroupController,
    subject: Subject,
    interpose: InterposeSettings,
    engine: SnapshotEngine,
    history: RunHistory,
    summary_path: PathBuf,
}

impl RunCoordinator {
    /// Prepare the cgroups and launch the subject inside them.
    ///
    /// Nothing is left behind on failure: the sub-groups are removed again
    /// and no summary is written.
    pub async fn start(
        run: RunConfig,
        config: Config,
        services: Services,
        mut env: Environment,
    ) -> Result<Self, Error> {
        run.validate()?;
        let mount = locate_mount(&config.cgroup.mount_candidates)?;
        let library = resolve_interposer(
            &env,
            &config.subject.search_path_var,
            &config.subject.interposer,
        )?;
        let output_dir = output_dir(run.directory.as_deref())?;
        let interpose = InterposeSettings::apply(&mut env, library, &output_dir, &config.subject);
        debug!(?interpose, "interposer configured");

        let cgroup = CgroupController::new(&mount, &run.cgroup, &config.cgroup.leaf);
        cgroup.create()?;
        if let Err(err) = cgroup.set_memory_limit(run.memory_limit) {
            cgroup.destroy();
            return Err(err);
        }

        let output = output_dir.join(&config.subject.output_file);
        let mut subject = match Subject::launch(&run.command, &env, &output) {
            Ok(subject) => subject,
            Err(err) => {
                cgroup.destroy();
                return Err(err);
            }
        };
        if let Err(err) = cgroup.attach(subject.pid()) {
            subject.kill().await;
            cgroup.destroy();
            return Err(err);
        }

        let freezer = services
            .freezer
            .unwrap_or_else(|| Box::new(cgroup.freezer()));
        let engine = SnapshotEngine::new(
            freezer,
            services.maps,
            services.classifier,
            TransitionPolicy::from(&config.cgroup),
            output_dir.clone(),
            config.output.clone(),
        );
        let summary_path = output_dir.join(&config.output.summary_file);

        Ok(Self {
            run,
            config,
            cgroup,
            subject,
            interpose,
            engine,
            history: RunHistory::default(),
            summary_path,
        })
    }

    pub fn pid(&self) -> u32 {
        self.subject.pid()
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn freezer_dir(&self) -> &Path {
        self.cgroup.freezer_dir()
    }

    /// Sample until the subject exits or `cancel` fires, then clean up and
    /// write the summary.
    ///
    /// On a fatal error the subject is thawed and a summary of the history
    /// so far is still written before the error is returned.
    pub async fn run_until(
        mut self,
        cancel: CancellationToken,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    ) -> Result<RunReport, Error> {
        let result = self.sample_loop(&cancel, &mut control_rx).await;

        if !matches!(result, Ok(RunOutcome::SubjectExited)) {
            self.release_subject();
        }
        self.cgroup.destroy();

        let summary = RunSummary::new(
            &self.run,
            &self.interpose,
            self.subject.pid(),
            &self.history,
        );
        let written = summary.write(&self.summary_path);

        match result {
            Ok(outcome) => {
                written?;
                Ok(RunReport {
                    outcome,
                    summary,
                    summary_path: self.summary_path,
                })
            }
            Err(err) => {
                if let Err(write_err) = written {
                    warn!(%write_err, "failed to write partial summary");
                }
                Err(err)
            }
        }
    }

    async fn sample_loop(
        &mut self,
        cancel: &CancellationToken,
        control_rx: &mut mpsc::UnboundedReceiver<ControlEvent>,
    ) -> Result<RunOutcome, Error> {
        let mode = self.run.mode();
        let period = match mode {
            SamplingMode::Interval(period) => period,
            SamplingMode::Signal => self.config.subject.liveness_poll,
        };
        let mut next_wake = Instant::now() + period;
        let mut sample_pending = false;
        info!(?mode, pid = self.subject.pid(), "monitoring started");

        loop {
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }

            if sample_pending {
                sample_pending = false;
                if self.subject.poll()? {
                    self.engine
                        .take_snapshot(self.subject.pid(), &mut self.history)
                        .await?;
                }
                if let SamplingMode::Interval(period) = mode {
                    info!(?period, "running subject until next snapshot");
                    next_wake = Instant::now() + period;
                }
                // requests that arrived mid-snapshot collapse into one
                while let Ok(event) = control_rx.try_recv() {
                    self.handle_control(event, &mut sample_pending);
                }
                continue;
            }

            let wake = tokio::select! {
                biased;
                () = cancel.cancelled() => Wake::Interrupt,
                status = self.subject.wait() => Wake::Exited(status?),
                Some(event) = control_rx.recv() => Wake::Control(event),
                () = time::sleep_until(next_wake) => Wake::Timer,
            };

            match wake {
                Wake::Interrupt => {
                    info!("interrupt received, stopping");
                    return Ok(RunOutcome::Interrupted);
                }
                Wake::Exited(status) => {
                    info!(?status, "subject finished");
                    return Ok(RunOutcome::SubjectExited);
                }
                Wake::Control(event) => self.handle_control(event, &mut sample_pending),
                Wake::Timer => match mode {
                    SamplingMode::Interval(_) => sample_pending = true,
                    SamplingMode::Signal => {
                        if !self.subject.poll()? {
                            return Ok(RunOutcome::SubjectExited);
                        }
                        next_wake = Instant::now() + period;
                    }
                },
            }
        }
    }

    fn handle_control(&self, event: ControlEvent, sample_pending: &mut bool) {
        match event {
            ControlEvent::SampleNow => match self.run.mode() {
                SamplingMode::Signal => *sample_pending = true,
                SamplingMode::Interval(_) => {
                    debug!("ignoring sample request, sampling on a fixed interval")
                }
            },
            ControlEvent::DumpStatus => self.dump_status(),
        }
    }

    fn dump_status(&self) {
        info!(?self.run, ?self.config, "current config");
        info!(
            pid = self.subject.pid(),
            iteration = self.history.iteration(),
            peak_pages = self.history.peak_pages(),
            heap_sizes = ?self.history.heap_sizes(),
            artifacts = ?self.history.artifacts(),
            "run state"
        );
    }

    /// Never leave the subject frozen behind.
    fn release_subject(&self) {
        let freezer = self.engine.freezer();
        match freezer
            .request(FreezeState::Thawed)
            .and_then(|()| freezer.observe())
        {
            Ok(state) => info!(?state, "subject released"),
            Err(err) => warn!(%err, "failed to thaw subject"),
        }
    }
}

/// Resolve the directory receiving all run output. A missing directory falls
/// back to the working directory.
fn output_dir(requested: Option<&Path>) -> Result<PathBuf, Error> {
    let cwd = std::env::current_dir()?;
    let Some(requested) = requested else {
        return Ok(cwd);
    };
    let dir = cwd.join(requested);
    if dir.is_dir() {
        Ok(dir)
    } else {
        warn!(?dir, ?cwd, "output directory not found, writing to working directory");
        Ok(cwd)
    }
}
