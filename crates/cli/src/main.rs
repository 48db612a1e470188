use clap::Parser;
use config::Config;
use heapfreeze::cli::Cli;
use orchestrator::{Environment, RunCoordinator, RunOutcome, Services, SignalForwarder};
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Exit status of a run stopped by `SIGINT` or `SIGTERM`.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // NOTE: The verbosity flag takes precedence over the environment variable
    // for log control. `HEAPFREEZE_LOG` can only refine the level per crate,
    // eg. `HEAPFREEZE_LOG=orchestrator::cgroup=debug heapfreeze ...`.
    let env_filter = EnvFilter::builder()
        .with_env_var("HEAPFREEZE_LOG")
        .from_env()?
        .add_directive(cli.verbosity.log_level_filter().as_str().parse()?);

    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    // load config
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        _ => {
            let mut candidates = glob::glob("/etc/heapfreeze/config.d/*.toml")?
                .filter_map(Result::ok)
                .collect::<Vec<_>>();
            candidates.insert(0, "/etc/heapfreeze/config.toml".into());
            trace!(?candidates, "config file candidates");
            Config::load_multiple(candidates)?
        }
    };
    debug!(?config, ?cli);

    // install signal handlers before the subject exists
    let cancel = CancellationToken::new();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let forwarder = SignalForwarder::install()?;
    let signal_handle = tokio::spawn(forwarder.forward(cancel.clone(), control_tx));

    let report = match RunCoordinator::start(
        cli.run_config(),
        config,
        Services::default(),
        Environment::capture(),
    )
    .await
    {
        Ok(coordinator) => coordinator.run_until(cancel.clone(), control_rx).await,
        Err(err) => Err(err),
    };

    cancel.cancel();
    signal_handle.await?;

    let report = match report {
        Ok(report) => report,
        Err(err) => {
            error!("run failed: {}", err);
            return Err(err.into());
        }
    };

    info!(
        outcome = ?report.outcome,
        iterations = report.summary.iterations,
        peak_pages = report.summary.peak_pages,
        summary = ?report.summary_path,
        "run finished"
    );
    Ok(match report.outcome {
        RunOutcome::SubjectExited => ExitCode::SUCCESS,
        RunOutcome::Interrupted => ExitCode::from(EXIT_INTERRUPTED),
    })
}
