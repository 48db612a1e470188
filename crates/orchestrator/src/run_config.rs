#![forbid(unsafe_code)]

use crate::error::Error;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// What triggers a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Snapshot, then sleep for at least this long.
    Interval(Duration),
    /// Snapshot only when asked to from outside.
    Signal,
}

impl Serialize for SamplingMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SamplingMode::Interval(period) => serializer.serialize_u64(period.as_secs()),
            SamplingMode::Signal => serializer.serialize_str("signal-driven"),
        }
    }
}

/// Parameters of one monitoring run, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Cgroup (memory and freezer) the run's sub-group is created in.
    pub cgroup: String,
    pub memory_limit: u64,
    /// `None` selects signal-driven sampling.
    pub interval: Option<Duration>,
    pub command: Vec<String>,
    /// Where artifacts, subject output and the summary go. Defaults to the
    /// working directory.
    pub directory: Option<PathBuf>,
}

impl RunConfig {
    pub fn mode(&self) -> SamplingMode {
        match self.interval {
            Some(period) => SamplingMode::Interval(period),
            None => SamplingMode::Signal,
        }
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.cgroup.is_empty() {
            return Err(Error::InvalidRunConfig("cgroup name is empty"));
        }
        if self.command.first().is_none_or(|program| program.is_empty()) {
            return Err(Error::InvalidRunConfig("empty subject command"));
        }
        if self.interval.is_some_and(|period| period.is_zero()) {
            return Err(Error::InvalidRunConfig("sampling interval must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> RunConfig {
        RunConfig {
            cgroup: "bench".into(),
            memory_limit: 1 << 30,
            interval: Some(Duration::from_secs(2)),
            command: vec!["true".into()],
            directory: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        run().validate().unwrap();
        RunConfig {
            interval: None,
            ..run()
        }
        .validate()
        .unwrap();
    }

    #[test]
    fn rejects_missing_pieces() {
        for bad in [
            RunConfig {
                cgroup: String::new(),
                ..run()
            },
            RunConfig {
                command: Vec::new(),
                ..run()
            },
            RunConfig {
                interval: Some(Duration::ZERO),
                ..run()
            },
        ] {
            assert!(matches!(bad.validate(), Err(Error::InvalidRunConfig(_))));
        }
    }

    #[test]
    fn mode_serializes_like_the_summary_expects() {
        assert_eq!(run().mode(), SamplingMode::Interval(Duration::from_secs(2)));
        assert_eq!(serde_json::to_string(&run().mode()).unwrap(), "2");
        assert_eq!(
            serde_json::to_string(&SamplingMode::Signal).unwrap(),
            "\"signal-driven\""
        );
    }
}
