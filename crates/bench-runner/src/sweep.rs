use anyhow::Result;
use bench_analysis::{aggregate_by_key, extract_metrics, AggregatedMetrics, RunMetrics};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::BenchConfig;
use crate::error::{HarnessError, RowError};
use crate::hosts::{run_host_group, CaptureTarget, ExecutorCommand, FailurePolicy};
use crate::inputs::{discover_host_inputs, Host};
use crate::report::{mebibytes, seconds, Report, ERROR_CELL};
use crate::strategy::{ArtifactLayout, CompilationStrategy};

pub const EXECUTION_HEADER: [&str; 7] = [
    "Benchmark",
    "Variant",
    "Network",
    "Iteration",
    "Host",
    "Running Time (s)",
    "Communication (MB)",
];

pub const SUMMARY_HEADER: [&str; 6] = [
    "Benchmark",
    "Variant",
    "Host",
    "Trials",
    "Average Running Time (s)",
    "Average Communication (MB)",
];

#[derive(Debug, Clone)]
pub struct Sweep {
    pub benchmarks: Vec<String>,
    pub strategies: Vec<CompilationStrategy>,
    pub trials: usize,
    pub network: String,
    pub layout: ArtifactLayout,
    pub inputs_dir: PathBuf,
    pub default_hosts: BTreeMap<String, PathBuf>,
    pub log_dir: PathBuf,
    pub policy: FailurePolicy,
}

impl Sweep {
    pub fn from_config(
        config: &BenchConfig,
        strategies: &[CompilationStrategy],
        trials: usize,
        campaign_dir: &Path,
    ) -> Self {
        Self {
            benchmarks: config.benchmarks.clone(),
            strategies: strategies.to_vec(),
            trials,
            network: config.network.clone(),
            layout: ArtifactLayout {
                compiled_dir: config.compiled_dir.clone(),
                build_dir: campaign_dir.to_path_buf(),
            },
            inputs_dir: config.inputs_dir.clone(),
            default_hosts: config.default_hosts.clone(),
            log_dir: campaign_dir.join("log"),
            policy: if config.strict {
                FailurePolicy::Abort
            } else {
                FailurePolicy::Tolerate
            },
        }
    }

    /// `log/<strategy>/<benchmark>-<host>-<trial>.log`
    pub fn log_path(
        &self,
        benchmark: &str,
        strategy: CompilationStrategy,
        trial: usize,
        host: &Host,
    ) -> PathBuf {
        self.log_dir
            .join(strategy.log_dir_name())
            .join(format!("{}-{}-{}.log", benchmark, host, trial))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryEntry {
    pub benchmark: String,
    pub strategy: CompilationStrategy,
    pub host: Host,
    pub metrics: AggregatedMetrics,
}

#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub report: Report,
    pub summary: Vec<SummaryEntry>,
    pub skipped: Vec<String>,
}

impl SweepOutcome {
    pub fn summary_report(&self) -> Result<Report> {
        let mut report = Report::new(&SUMMARY_HEADER);
        for entry in &self.summary {
            let (time, comm) = match entry.metrics.means {
                Some(means) => (seconds(means.time_ms), mebibytes(means.communication_bytes)),
                None => (ERROR_CELL.to_string(), ERROR_CELL.to_string()),
            };
            report.push(vec![
                entry.benchmark.clone(),
                entry.strategy.to_string(),
                entry.host.to_string(),
                entry.metrics.succeeded.to_string(),
                time,
                comm,
            ])?;
        }
        Ok(report)
    }
}

fn metric_cells(record: &Result<RunMetrics, RowError>) -> [String; 2] {
    match record {
        Ok(metrics) => [
            seconds(metrics.time_ms as f64),
            mebibytes(metrics.communication_bytes() as f64),
        ],
        Err(_) => [ERROR_CELL.to_string(), ERROR_CELL.to_string()],
    }
}

type SweepKey = (usize, CompilationStrategy, Host);

/// Runs every (benchmark, strategy, trial) point in that nesting order.
///
/// Host inputs are resolved once per benchmark and reused by all of its
/// trials. Rows come out grouped by benchmark, strategy, trial, then host.
pub fn run_sweep(sweep: &Sweep, executor: &ExecutorCommand) -> Result<SweepOutcome> {
    let mut report = Report::new(&EXECUTION_HEADER);
    let mut records: Vec<(SweepKey, Result<RunMetrics, RowError>)> = Vec::new();
    let mut skipped = Vec::new();

    for (index, benchmark) in sweep.benchmarks.iter().enumerate() {
        let inputs = match discover_host_inputs(&sweep.inputs_dir, benchmark, &sweep.default_hosts)
        {
            Ok(inputs) => inputs,
            Err(err) => match err.downcast_ref::<HarnessError>() {
                Some(HarnessError::MissingInputs { .. }) => {
                    error!("skipping {}: {}", benchmark, err);
                    skipped.push(benchmark.clone());
                    continue;
                }
                _ => return Err(err),
            },
        };

        for &strategy in &sweep.strategies {
            let artifact = strategy.artifact_path(benchmark, &sweep.layout);
            for trial in 1..=sweep.trials {
                info!(
                    "Running {}/{} in {} ({})",
                    benchmark, strategy, sweep.network, trial
                );
                info!("Inputs:");
                for (host, input) in &inputs {
                    info!("  {}: {}", host, input.display());
                }

                let outcomes = run_host_group(
                    executor,
                    &artifact,
                    &inputs,
                    |host| CaptureTarget::File(sweep.log_path(benchmark, strategy, trial, host)),
                    sweep.policy,
                )?;

                for outcome in outcomes {
                    let record = if outcome.success() {
                        extract_metrics(&outcome.log.text).map_err(RowError::from)
                    } else {
                        Err(RowError::HostExit(outcome.status_label()))
                    };
                    let host = outcome.log.host;
                    if let Err(err) = &record {
                        warn!(
                            "{}/{} trial {} host {}: {}",
                            benchmark, strategy, trial, host, err
                        );
                    }
                    let [time, comm] = metric_cells(&record);
                    report.push(vec![
                        benchmark.clone(),
                        strategy.to_string(),
                        sweep.network.clone(),
                        trial.to_string(),
                        host.to_string(),
                        time,
                        comm,
                    ])?;
                    records.push(((index, strategy, host), record));
                }
            }
        }
    }

    let summary = aggregate_by_key(records)
        .into_iter()
        .map(|((index, strategy, host), metrics)| SummaryEntry {
            benchmark: sweep.benchmarks[index].clone(),
            strategy,
            host,
            metrics,
        })
        .collect();

    Ok(SweepOutcome {
        report,
        summary,
        skipped,
    })
}
