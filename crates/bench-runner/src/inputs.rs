use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::HarnessError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Host(String);

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type HostInputs = BTreeMap<Host, PathBuf>;

fn host_from_file_name(benchmark: &str, file_name: &str) -> Option<Host> {
    let stem = file_name
        .strip_prefix(benchmark)?
        .strip_prefix('-')?
        .strip_suffix(".txt")?;
    let host = stem.rsplit('-').next()?;
    let is_word = !host.is_empty() && host.chars().all(|c| c.is_alphanumeric() || c == '_');
    is_word.then(|| Host::new(host))
}

fn scan_inputs(inputs_dir: &Path, benchmark: &str) -> (HostInputs, Vec<walkdir::Error>) {
    let mut inputs = HostInputs::new();
    let mut unreadable = Vec::new();
    for entry in WalkDir::new(inputs_dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let missing = err.io_error().map(|e| e.kind()) == Some(io::ErrorKind::NotFound);
                if !(missing && err.depth() == 0) {
                    unreadable.push(err);
                }
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if let Some(host) = host_from_file_name(benchmark, name) {
            inputs.insert(host, entry.path().to_path_buf());
        }
    }
    (inputs, unreadable)
}

/// Finds `<inputs_dir>/<benchmark>-<host>.txt` files, falling back to
/// `defaults` (resolved under `inputs_dir`) when there are none.
pub fn discover_host_inputs(
    inputs_dir: &Path,
    benchmark: &str,
    defaults: &BTreeMap<String, PathBuf>,
) -> Result<HostInputs> {
    let (inputs, unreadable) = scan_inputs(inputs_dir, benchmark);
    for err in &unreadable {
        warn!("{}: skipping unreadable input entry: {}", benchmark, err);
    }
    if !inputs.is_empty() {
        return Ok(inputs);
    }
    if defaults.is_empty() {
        return Err(HarnessError::MissingInputs {
            benchmark: benchmark.to_string(),
        }
        .into());
    }
    Ok(defaults
        .iter()
        .map(|(host, file)| (Host::new(host.clone()), inputs_dir.join(file)))
        .collect())
}
