use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use orchestrator::RunConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// heapfreeze: heap residency sampler for a single process
///
/// heapfreeze launches a command inside a memory-limited cgroup with a heap
/// interposition library preloaded, and periodically freezes it to record
/// which of its heap pages are resident, swapped or untouched.
///
/// Without `--interval` snapshots are taken on `SIGUSR1` only. `SIGUSR2` logs
/// the current state, `SIGINT` and `SIGTERM` stop the run.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Cgroup to run the command in.
    ///
    /// A sub-group is created below it in both the memory and the freezer
    /// hierarchy and removed again at the end of the run.
    #[arg(short, long)]
    pub cgroup: String,

    /// Memory limit of the command, in bytes.
    ///
    /// `K`, `M` and `G` suffixes (powers of 1024) are accepted.
    #[arg(short, long, value_parser = parse_limit)]
    pub limit: u64,

    /// Seconds between two snapshots.
    ///
    /// If not provided, snapshots are taken on `SIGUSR1`.
    #[arg(short, long, value_parser = validate_interval)]
    pub interval: Option<u64>,

    /// Directory receiving snapshots, command output and the run summary.
    ///
    /// Falls back to the working directory if it does not exist.
    #[arg(short, long)]
    pub directory: Option<PathBuf>,

    /// Path to configuration file.
    ///
    /// If not provided, the default locations are checked. They are
    /// `/etc/heapfreeze/config.toml` and `/etc/heapfreeze/config.d/*.toml`,
    /// where the latter being a glob pattern. If they don't exist, the default
    /// configuration is used.
    #[arg(long, value_parser = validate_file)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Command to monitor, with its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            cgroup: self.cgroup.clone(),
            memory_limit: self.limit,
            interval: self.interval.map(Duration::from_secs),
            command: self.command.clone(),
            directory: self.directory.clone(),
        }
    }
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

/// Validate the snapshot interval.
#[inline(always)]
fn validate_interval(interval: &str) -> Result<u64, String> {
    let interval: u64 = interval
        .parse()
        .map_err(|_| format!("`{interval}` is not a valid number of seconds"))?;
    if interval > 0 {
        Ok(interval)
    } else {
        Err("Interval must be at least one second".to_string())
    }
}

/// Parse a byte count with an optional binary `K`, `M` or `G` suffix.
fn parse_limit(limit: &str) -> Result<u64, String> {
    let invalid = || format!("`{limit}` is not a valid memory limit");
    let trimmed = limit.trim();
    let shift = match trimmed.as_bytes().last() {
        Some(b'k' | b'K') => 10,
        Some(b'm' | b'M') => 20,
        Some(b'g' | b'G') => 30,
        _ => 0,
    };
    let digits = if shift == 0 {
        trimmed
    } else {
        &trimmed[..trimmed.len() - 1]
    };
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err("Memory limit must be positive".to_string());
    }
    value.checked_mul(1 << shift).ok_or_else(invalid)
}
