mod campaign;
mod config;
mod error;
mod files;
mod hosts;
mod inputs;
mod make;
mod report;
mod strategy;
mod sweep;

pub use campaign::{
    annotation_burden, compile_time, parse_exec, render_case_summary, resolve_executor, run_time,
    CampaignResult, ExecutionOptions, ANNOTATION_BURDEN, COMPILATION_HEADER, COMPILE_TIME,
    RUN_TIME,
};
pub use config::{BenchConfig, DEFAULT_BENCHMARKS, DEFAULT_CONFIG_FILE};
pub use error::{HarnessError, RowError};
pub use files::{ensure_dir, write_log};
pub use hosts::{
    run_host_group, CaptureTarget, ExecutorCommand, FailurePolicy, HostLog, HostOutcome,
};
pub use inputs::{discover_host_inputs, Host, HostInputs};
pub use make::BuildTool;
pub use report::{mebibytes, seconds, Report, ERROR_CELL};
pub use strategy::{ArtifactLayout, CompilationStrategy};
pub use sweep::{run_sweep, Sweep, SweepOutcome, SummaryEntry, EXECUTION_HEADER, SUMMARY_HEADER};
