use bench_analysis::ExtractError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("process for host {host} failed with status {status}")]
    HostFailed { host: String, status: String },
    #[error("build command `{command}` failed with status {status}")]
    BuildFailed { command: String, status: String },
    #[error("no input files for benchmark {benchmark} and no default hosts configured")]
    MissingInputs { benchmark: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("host exited with status {0}")]
    HostExit(String),
    #[error(transparent)]
    Extraction(#[from] ExtractError),
}
