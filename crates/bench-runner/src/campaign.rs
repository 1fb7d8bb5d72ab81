use anyhow::{Context, Result};
use bench_analysis::{
    average_by_case, extract_sections, parse_compilation_log, reconcile_sections,
    AggregatedMetrics,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::config::BenchConfig;
use crate::files::{atomic_write_bytes, atomic_write_json_pretty, ensure_dir, read_log, write_log};
use crate::hosts::ExecutorCommand;
use crate::make::BuildTool;
use crate::report::{Report, ERROR_CELL};
use crate::strategy::{lan_artifact, CompilationStrategy};
use crate::sweep::{run_sweep, Sweep};

pub const COMPILE_TIME: &str = "compile-time";
pub const RUN_TIME: &str = "run-time";
pub const ANNOTATION_BURDEN: &str = "annotation-burden";

pub const COMPILATION_HEADER: [&str; 5] = [
    "Benchmark",
    "Information Flow Variables",
    "Information Flow Time (ms)",
    "Selection Variables",
    "Selection Time (ms)",
];

#[derive(Debug, Clone)]
pub struct CampaignResult {
    pub campaign: String,
    pub dir: PathBuf,
    pub report_path: PathBuf,
    pub summary_path: Option<PathBuf>,
    pub rows: usize,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub iterations: usize,
    pub strategies: Vec<CompilationStrategy>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            iterations: 1,
            strategies: CompilationStrategy::ALL.to_vec(),
        }
    }
}

fn campaign_state_path(dir: &Path) -> PathBuf {
    dir.join("campaign.json")
}

fn write_campaign_state(dir: &Path, campaign: &str, status: &str) -> Result<()> {
    let payload = json!({
        "schema_version": "campaign_state_v1",
        "campaign": campaign,
        "status": status,
        "updated_at": Utc::now().to_rfc3339(),
    });
    atomic_write_json_pretty(&campaign_state_path(dir), &payload)
}

struct CampaignGuard {
    dir: PathBuf,
    campaign: String,
    done: bool,
}

impl CampaignGuard {
    fn start(dir: &Path, campaign: &str) -> Result<Self> {
        ensure_dir(dir)?;
        write_campaign_state(dir, campaign, "running")?;
        Ok(Self {
            dir: dir.to_path_buf(),
            campaign: campaign.to_string(),
            done: false,
        })
    }

    fn complete(&mut self) -> Result<()> {
        write_campaign_state(&self.dir, &self.campaign, "completed")?;
        self.done = true;
        Ok(())
    }
}

impl Drop for CampaignGuard {
    fn drop(&mut self) {
        if !self.done {
            let _ = write_campaign_state(&self.dir, &self.campaign, "failed");
        }
    }
}

fn write_manifest(dir: &Path, campaign: &str, parameters: Value) -> Result<()> {
    let manifest = json!({
        "schema_version": "campaign_manifest_v1",
        "campaign": campaign,
        "runner_version": env!("CARGO_PKG_VERSION"),
        "created_at": Utc::now().to_rfc3339(),
        "parameters": parameters,
    });
    atomic_write_json_pretty(&dir.join("manifest.json"), &manifest)
}

fn build_tool(config: &BenchConfig, dir: &Path) -> Result<BuildTool> {
    BuildTool::from_command_line(&config.make, dir)
}

pub fn resolve_executor(config: &BenchConfig, tool: &BuildTool) -> Result<ExecutorCommand> {
    let command_line = match &config.viaduct {
        Some(command) => command.clone(),
        None => tool.variable("VIADUCT")?,
    };
    let executor = ExecutorCommand::parse(&command_line)
        .context("resolving the runtime command")?;
    Ok(if config.verbose_runtime {
        executor.arg("-v")
    } else {
        executor
    })
}

pub fn compile_time(config: &BenchConfig) -> Result<CampaignResult> {
    let dir = config.campaign_dir(COMPILE_TIME);
    let mut guard = CampaignGuard::start(&dir, COMPILE_TIME)?;
    let tool = build_tool(config, &dir)?;

    let benchmarks = tool.program_list("ANNOTATED_BENCHMARKS")?;
    write_manifest(&dir, COMPILE_TIME, json!({ "benchmarks": benchmarks }))?;
    let build_log = tool.run(&["clean", "lan"])?;
    write_log(&dir.join("log").join("build.log"), &build_log)?;

    let mut report = Report::new(&COMPILATION_HEADER);
    let stats = parse_compilation_log(&build_log, benchmarks.len());
    for (benchmark, stats) in benchmarks.iter().zip(stats) {
        let cells = match stats {
            Ok(s) => [
                s.label_variables,
                s.information_flow_ms,
                s.selection_variables,
                s.selection_ms,
            ]
            .map(|v| v.to_string()),
            Err(err) => {
                warn!("{}: {}", benchmark, err);
                std::array::from_fn(|_| ERROR_CELL.to_string())
            }
        };
        let mut row = vec![benchmark.clone()];
        row.extend(cells);
        report.push(row)?;
    }

    let report_path = dir.join("report.csv");
    report.publish(&report_path)?;
    guard.complete()?;
    Ok(CampaignResult {
        campaign: COMPILE_TIME.to_string(),
        dir,
        report_path,
        summary_path: None,
        rows: report.rows().len(),
        skipped: Vec::new(),
    })
}

pub fn run_time(config: &BenchConfig, options: &ExecutionOptions) -> Result<CampaignResult> {
    let dir = config.campaign_dir(RUN_TIME);
    let mut guard = CampaignGuard::start(&dir, RUN_TIME)?;
    let tool = build_tool(config, &dir)?;
    let sweep = Sweep::from_config(config, &options.strategies, options.iterations, &dir);
    write_manifest(
        &dir,
        RUN_TIME,
        json!({
            "benchmarks": sweep.benchmarks,
            "strategies": sweep.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "iterations": sweep.trials,
            "network": sweep.network,
            "strict": config.strict,
        }),
    )?;

    for strategy in sweep.strategies.iter().filter(|s| s.needs_build()) {
        for benchmark in &sweep.benchmarks {
            tool.run(&[strategy.artifact_path(benchmark, &sweep.layout)])?;
        }
    }

    let executor = resolve_executor(config, &tool)?;
    let outcome = run_sweep(&sweep, &executor)?;

    let report_path = dir.join("report.csv");
    outcome.report.publish(&report_path)?;
    let summary_path = dir.join("summary.csv");
    let summary = outcome.summary_report()?;
    atomic_write_bytes(&summary_path, summary.to_csv_string()?.as_bytes())?;
    info!("Summary written to {}", summary_path.display());

    guard.complete()?;
    Ok(CampaignResult {
        campaign: RUN_TIME.to_string(),
        dir,
        report_path,
        summary_path: Some(summary_path),
        rows: outcome.report.rows().len(),
        skipped: outcome.skipped,
    })
}

/// `diff` of two programs. Exit status 1 only means they differ.
fn diff_programs(annotated: &Path, erased: &Path) -> Result<String> {
    let output = Command::new("diff")
        .arg(annotated)
        .arg(erased)
        .output()
        .context("running diff")?;
    if output.status.code().map_or(true, |c| c > 1) {
        warn!(
            "diff {} {} failed: {}",
            annotated.display(),
            erased.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn annotation_burden(config: &BenchConfig) -> Result<CampaignResult> {
    let dir = config.campaign_dir(ANNOTATION_BURDEN);
    let mut guard = CampaignGuard::start(&dir, ANNOTATION_BURDEN)?;
    let tool = build_tool(config, &dir)?;

    let benchmarks = tool.program_list("ANNOTATED_BENCHMARKS")?;
    let erased: BTreeSet<String> = tool.program_list("ERASED_BENCHMARKS")?.into_iter().collect();
    write_manifest(
        &dir,
        ANNOTATION_BURDEN,
        json!({ "benchmarks": benchmarks, "erased": erased }),
    )?;
    let build_log = tool.run(&["lan", "erased"])?;
    write_log(&dir.join("log").join("build.log"), &build_log)?;

    let mut text = String::new();
    let mut compared = 0;
    for benchmark in &benchmarks {
        let erased_benchmark = format!("{}Erased", benchmark);
        if !erased.contains(&erased_benchmark) {
            continue;
        }
        let annotated_file = lan_artifact(&dir, benchmark);
        let erased_file = lan_artifact(&dir, &erased_benchmark);
        let shown = format!("diff {} {}", annotated_file.display(), erased_file.display());
        info!("{}", shown);
        let _ = writeln!(text, "{}", shown);
        text.push_str(&diff_programs(&annotated_file, &erased_file)?);
        text.push_str("\n\n");
        compared += 1;
    }

    let report_path = dir.join("report.txt");
    atomic_write_bytes(&report_path, text.as_bytes())?;
    print!("{}", text);
    info!("Report written to {}", report_path.display());
    guard.complete()?;
    Ok(CampaignResult {
        campaign: ANNOTATION_BURDEN.to_string(),
        dir,
        report_path,
        summary_path: None,
        rows: compared,
        skipped: Vec::new(),
    })
}

pub fn parse_exec(first: &Path, second: &Path) -> Result<BTreeMap<String, AggregatedMetrics>> {
    let first = extract_sections(&read_log(first)?)
        .with_context(|| format!("segmenting {}", first.display()))?;
    let second = extract_sections(&read_log(second)?)
        .with_context(|| format!("segmenting {}", second.display()))?;
    let reconciled = reconcile_sections(&first, &second);
    for err in reconciled.values().filter_map(|r| r.as_ref().err()) {
        warn!("excluded from averages: {}", err);
    }
    Ok(average_by_case(reconciled))
}

/// One `case` line and one `time/comm` line per case. Communication is in
/// thousands of bytes.
pub fn render_case_summary(averages: &BTreeMap<String, AggregatedMetrics>) -> String {
    let mut out = String::new();
    for (case, metrics) in averages {
        let _ = writeln!(out, "{}", case);
        match metrics.means {
            Some(means) => {
                let _ = writeln!(
                    out,
                    "time: {:>8.1} s; comm: {:>8.1} KiB",
                    means.time_ms / 1000.0,
                    means.communication_bytes / 1000.0
                );
            }
            None => {
                let _ = writeln!(out, "time: {:>8} s; comm: {:>8} KiB", ERROR_CELL, ERROR_CELL);
            }
        }
    }
    out
}
