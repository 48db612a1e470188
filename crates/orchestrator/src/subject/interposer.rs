#![forbid(unsafe_code)]

use crate::error::Error;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const OUTFILE_VAR: &str = "MALLOC_INTERPOSE_OUTFILE";
pub const DEPTH_VAR: &str = "MALLOC_INTERPOSE_DEPTH";
pub const SHIFT_VAR: &str = "MALLOC_INTERPOSE_SHIFT";
pub const PRELOAD_VAR: &str = "LD_PRELOAD";

const PID_PLACEHOLDER: &str = "%p";

/// Environment handed to the subject. Names and values are kept as raw OS
/// strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment(BTreeMap<OsString, OsString>);

impl Environment {
    /// Snapshot of the monitor's own environment.
    pub fn capture() -> Self {
        std::env::vars_os().collect()
    }

    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.0.get(key.as_ref()).map(OsString::as_os_str)
    }

    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        self.0.insert(key.into(), value.into());
    }

    /// Set `key` only if it is not defined yet. Returns the effective value.
    pub fn set_default(&mut self, key: &str, value: impl Into<OsString>) -> String {
        self.0
            .entry(key.into())
            .or_insert_with(|| value.into())
            .to_string_lossy()
            .into_owned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsString, &OsString)> {
        self.0.iter()
    }
}

impl<K: Into<OsString>, V: Into<OsString>> FromIterator<(K, V)> for Environment {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Find `library` in the colon separated directory list stored in
/// `search_path_var`.
pub fn resolve_interposer(
    env: &Environment,
    search_path_var: &str,
    library: &str,
) -> Result<PathBuf, Error> {
    let missing = || Error::DependencyMissing {
        library: library.to_owned(),
        search_path_var: search_path_var.to_owned(),
    };
    let search_path = env.get(search_path_var).ok_or_else(missing)?;

    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(library))
        .inspect(|candidate| debug!(?candidate, "probing interposer"))
        .find(|candidate| candidate.is_file())
        .ok_or_else(missing)
}

/// Settings of the interposition library as seen by the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterposeSettings {
    pub library: PathBuf,
    /// Output file template, still containing the pid placeholder.
    pub outfile: String,
    pub depth: String,
    pub shift: String,
}

impl InterposeSettings {
    /// Fill in defaults for every interposer variable the caller left unset
    /// and point `LD_PRELOAD` at `library`. Caller supplied values win.
    pub fn apply(
        env: &mut Environment,
        library: PathBuf,
        output_dir: &Path,
        subject: &config::Subject,
    ) -> Self {
        let default_outfile = output_dir.join(&subject.outfile_template);
        let outfile = env.set_default(OUTFILE_VAR, default_outfile);
        let depth = env.set_default(DEPTH_VAR, subject.depth.to_string());
        let shift = env.set_default(SHIFT_VAR, subject.shift.to_string());
        env.set(PRELOAD_VAR, &library);

        Self {
            library,
            outfile,
            depth,
            shift,
        }
    }

    /// The interposer output file of the process `pid`.
    pub fn outfile_for(&self, pid: u32) -> String {
        self.outfile.replace(PID_PLACEHOLDER, &pid.to_string())
    }
}
