use anyhow::{anyhow, Result};
use bench_runner::{BenchConfig, CampaignResult, CompilationStrategy, ExecutionOptions};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bench", version, about = "Benchmark campaigns for the Viaduct compiler")]
struct Cli {
    /// Campaign configuration; `bench.yaml` is used when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    #[value(name = "bool")]
    Bool,
    #[value(name = "yao")]
    Yao,
    #[value(name = "opt_lan")]
    OptLan,
    #[value(name = "opt_wan")]
    OptWan,
}

impl From<StrategyArg> for CompilationStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Bool => CompilationStrategy::Bool,
            StrategyArg::Yao => CompilationStrategy::Yao,
            StrategyArg::OptLan => CompilationStrategy::OptLan,
            StrategyArg::OptWan => CompilationStrategy::OptWan,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compiler statistics for every annotated benchmark.
    CompileTime {
        #[arg(long)]
        json: bool,
    },
    /// Running time and communication of every benchmark and strategy.
    RunTime {
        #[arg(long, default_value_t = 1)]
        iterations: usize,
        #[arg(long)]
        strict: bool,
        #[arg(long = "benchmark")]
        benchmarks: Vec<String>,
        #[arg(long = "strategy", value_enum)]
        strategies: Vec<StrategyArg>,
        #[arg(long)]
        json: bool,
    },
    /// Diffs annotated benchmarks against their erased versions.
    AnnotationBurden {
        #[arg(long)]
        json: bool,
    },
    /// Per-case averages from two logs of the same trials.
    ParseExec {
        first: PathBuf,
        second: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let message = format!("{:#}", err);
                emit_json(&json_error("command_failed", message, json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(cli: Cli) -> Result<Option<Value>> {
    match cli.command {
        Commands::CompileTime { json } => {
            let config = BenchConfig::load(cli.config.as_deref())?;
            let result = bench_runner::compile_time(&config)?;
            finish(json, "compile-time", &result)
        }
        Commands::RunTime {
            iterations,
            strict,
            benchmarks,
            strategies,
            json,
        } => {
            if iterations == 0 {
                return Err(anyhow!("--iterations must be at least 1"));
            }
            let mut config = BenchConfig::load(cli.config.as_deref())?;
            config.strict |= strict;
            if !benchmarks.is_empty() {
                config.benchmarks = benchmarks;
            }
            let options = ExecutionOptions {
                iterations,
                strategies: if strategies.is_empty() {
                    CompilationStrategy::ALL.to_vec()
                } else {
                    strategies.into_iter().map(Into::into).collect()
                },
            };
            let result = bench_runner::run_time(&config, &options)?;
            finish(json, "run-time", &result)
        }
        Commands::AnnotationBurden { json } => {
            let config = BenchConfig::load(cli.config.as_deref())?;
            let result = bench_runner::annotation_burden(&config)?;
            finish(json, "annotation-burden", &result)
        }
        Commands::ParseExec {
            first,
            second,
            json,
        } => {
            let averages = bench_runner::parse_exec(&first, &second)?;
            if json {
                let cases: serde_json::Map<String, Value> = averages
                    .iter()
                    .map(|(case, metrics)| {
                        let means = metrics.means.map(|m| {
                            json!({
                                "time_ms": m.time_ms,
                                "communication_bytes": m.communication_bytes,
                            })
                        });
                        (
                            case.clone(),
                            json!({
                                "attempted": metrics.attempted,
                                "succeeded": metrics.succeeded,
                                "means": means,
                            }),
                        )
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "parse-exec",
                    "cases": cases,
                })));
            }
            print!("{}", bench_runner::render_case_summary(&averages));
            Ok(None)
        }
    }
}

fn finish(json: bool, command: &str, result: &CampaignResult) -> Result<Option<Value>> {
    if json {
        return Ok(Some(json!({
            "ok": true,
            "command": command,
            "campaign": campaign_result_to_json(result),
        })));
    }
    for benchmark in &result.skipped {
        warn!("skipped {}: no host inputs", benchmark);
    }
    info!("{} campaign finished in {}", result.campaign, result.dir.display());
    Ok(None)
}

fn campaign_result_to_json(result: &CampaignResult) -> Value {
    json!({
        "campaign": result.campaign,
        "dir": result.dir.display().to_string(),
        "report": result.report_path.display().to_string(),
        "summary": result.summary_path.as_ref().map(|p| p.display().to_string()),
        "rows": result.rows,
        "skipped": result.skipped,
    })
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::CompileTime { json }
        | Commands::RunTime { json, .. }
        | Commands::AnnotationBurden { json }
        | Commands::ParseExec { json, .. } => *json,
    }
}
