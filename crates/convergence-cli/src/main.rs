use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use convergence_runner::{
    fetch_dataset, init_logging, read_metric, result_file_path, run_and_assert, HarnessConfig,
    ScenarioFailure, ScenarioKind, ScenarioReport, CONFIG_TEMPLATE, DEFAULT_CONFIG_PATH,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const EXIT_NOT_CONVERGED: i32 = 1;
const EXIT_PIPELINE_ERROR: i32 = 2;

#[derive(Parser)]
#[command(
    name = "convergence",
    version,
    about = "End-to-end convergence checks for the speech-recognition trainer"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScenarioArg {
    Tutorial,
    Fast,
    All,
}

impl ScenarioArg {
    fn kinds(self) -> Vec<ScenarioKind> {
        match self {
            ScenarioArg::Tutorial => vec![ScenarioKind::Tutorial],
            ScenarioArg::Fast => vec![ScenarioKind::Fast],
            ScenarioArg::All => vec![ScenarioKind::Tutorial, ScenarioKind::Fast],
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SingleScenarioArg {
    Tutorial,
    Fast,
}

impl From<SingleScenarioArg> for ScenarioKind {
    fn from(value: SingleScenarioArg) -> Self {
        match value {
            SingleScenarioArg::Tutorial => ScenarioKind::Tutorial,
            SingleScenarioArg::Fast => ScenarioKind::Fast,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, train, read the metric and check it against the threshold.
    Run {
        #[arg(value_enum)]
        scenario: ScenarioArg,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Only download and extract a scenario's dataset.
    Fetch {
        #[arg(value_enum)]
        scenario: SingleScenarioArg,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Read the test error rate from a finished experiment directory.
    Metric {
        exp_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Describe {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

struct CommandOutcome {
    payload: Option<Value>,
    exit_code: i32,
}

impl CommandOutcome {
    fn done(payload: Option<Value>) -> Self {
        Self {
            payload,
            exit_code: 0,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(outcome) => {
            if let Some(payload) = &outcome.payload {
                emit_json(payload);
            }
            if outcome.exit_code != 0 {
                std::process::exit(outcome.exit_code);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
            } else {
                eprintln!("error: {:#}", err);
            }
            std::process::exit(EXIT_PIPELINE_ERROR);
        }
    }
}

fn run_command(command: Commands) -> Result<CommandOutcome> {
    match command {
        Commands::Run {
            scenario,
            config,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            let trainer = config.trainer()?;
            let fetch_options = config.fetch.to_options();

            let mut results = Vec::new();
            for kind in scenario.kinds() {
                let spec = config.scenario_spec(kind)?;
                let result = run_and_assert(&spec, &config.workspace, &fetch_options, &trainer);
                results.push((kind, result));
            }

            let exit_code = run_exit_code(&results);
            if json {
                let scenarios = results
                    .iter()
                    .map(|(kind, result)| scenario_result_to_json(*kind, result))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(CommandOutcome {
                    payload: Some(json!({
                        "ok": exit_code == 0,
                        "command": "run",
                        "scenarios": scenarios,
                    })),
                    exit_code,
                });
            }
            for (kind, result) in &results {
                print_scenario_result(*kind, result);
            }
            Ok(CommandOutcome {
                payload: None,
                exit_code,
            })
        }
        Commands::Fetch {
            scenario,
            config,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            let spec = config.scenario_spec(scenario.into())?;
            let destination = config.workspace.dataset_dir(&spec.dataset_dir);
            let fetched = fetch_dataset(
                &spec.source_url,
                &destination,
                &config.workspace,
                &config.fetch.to_options(),
            )?;
            if json {
                return Ok(CommandOutcome::done(Some(json!({
                    "ok": true,
                    "command": "fetch",
                    "scenario": spec.kind,
                    "dataset": serde_json::to_value(&fetched)?,
                }))));
            }
            println!("scenario: {}", spec.kind);
            println!("dataset_dir: {}", fetched.dataset_dir.display());
            println!("archive: {}", fetched.archive_path.display());
            println!("archive_bytes: {}", fetched.archive_bytes);
            println!("archive_sha256: {}", fetched.archive_sha256);
            Ok(CommandOutcome::done(None))
        }
        Commands::Metric { exp_dir, json } => {
            let metric = read_metric(&exp_dir)?;
            if json {
                return Ok(CommandOutcome::done(Some(json!({
                    "ok": true,
                    "command": "metric",
                    "result_file": result_file_path(&exp_dir).display().to_string(),
                    "metric": metric,
                }))));
            }
            println!("metric: {}", metric);
            Ok(CommandOutcome::done(None))
        }
        Commands::Describe { config, json } => {
            let (config, source) = HarnessConfig::load_or_default(config.as_deref())?;
            let specs = [ScenarioKind::Tutorial, ScenarioKind::Fast]
                .into_iter()
                .map(|kind| config.scenario_spec(kind))
                .collect::<convergence_runner::Result<Vec<_>>>()?;
            if json {
                return Ok(CommandOutcome::done(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "config_path": source.map(|p| p.display().to_string()),
                    "config": serde_json::to_value(&config)?,
                    "scenarios": serde_json::to_value(&specs)?,
                }))));
            }
            match &source {
                Some(p) => println!("config: {}", p.display()),
                None => println!("config: built-in defaults"),
            }
            println!("data_base_dir: {}", config.workspace.data_base_dir.display());
            println!("exp_base_dir: {}", config.workspace.exp_base_dir.display());
            println!("extractor: {}", config.fetch.extractor.as_str());
            println!("download_attempts: {}", config.fetch.attempts);
            if config.trainer.command.is_empty() {
                println!("trainer: <not configured>");
            } else {
                println!("trainer: {}", config.trainer.command.join(" "));
            }
            for spec in &specs {
                println!(
                    "scenario {}: {} -> {} (model {}, pass below {})",
                    spec.kind,
                    spec.source_url,
                    spec.dataset_dir,
                    spec.model.as_str(),
                    spec.threshold.below
                );
            }
            Ok(CommandOutcome::done(None))
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                return Err(anyhow!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                ));
            }
            std::fs::write(&path, CONFIG_TEMPLATE)?;
            println!("wrote: {}", path.display());
            println!("next: convergence describe --config {}", path.display());
            Ok(CommandOutcome::done(None))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    let (config, _) = HarnessConfig::load_or_default(path)?;
    init_logging(&config.logging)?;
    Ok(config)
}

/// A broken pipeline outranks a poor score.
fn run_exit_code(results: &[(ScenarioKind, Result<ScenarioReport, ScenarioFailure>)]) -> i32 {
    let mut code = 0;
    for (_, result) in results {
        match result {
            Ok(_) => {}
            Err(ScenarioFailure::NotConverged(_)) => code = code.max(EXIT_NOT_CONVERGED),
            Err(ScenarioFailure::Pipeline { .. }) => code = EXIT_PIPELINE_ERROR,
        }
    }
    code
}

fn print_scenario_result(kind: ScenarioKind, result: &Result<ScenarioReport, ScenarioFailure>) {
    println!("scenario: {}", kind);
    match result {
        Ok(report) => {
            println!("exp_dir: {}", report.experiment_dir.display());
            println!("metric: {}", report.metric);
            println!("threshold: {}", report.threshold.below);
            println!("result: passed");
        }
        Err(ScenarioFailure::NotConverged(failure)) => {
            println!("metric: {}", failure.metric);
            println!("threshold: {}", failure.threshold);
            println!("result: not_converged");
        }
        Err(err @ ScenarioFailure::Pipeline { .. }) => {
            println!("result: error ({})", err.category());
            println!("error: {}", err);
        }
    }
}

fn scenario_result_to_json(
    kind: ScenarioKind,
    result: &Result<ScenarioReport, ScenarioFailure>,
) -> Result<Value> {
    Ok(match result {
        Ok(report) => json!({
            "scenario": kind,
            "result": "passed",
            "report": serde_json::to_value(report)?,
        }),
        Err(ScenarioFailure::NotConverged(failure)) => json!({
            "scenario": kind,
            "result": "not_converged",
            "metric": failure.metric,
            "threshold": failure.threshold,
        }),
        Err(err @ ScenarioFailure::Pipeline { .. }) => json!({
            "scenario": kind,
            "result": "error",
            "error": {
                "code": err.category(),
                "message": err.to_string(),
            },
        }),
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
        Commands::Run { json, .. }
        | Commands::Fetch { json, .. }
        | Commands::Metric { json, .. }
        | Commands::Describe { json, .. } => *json,
        Commands::InitConfig { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergence_runner::{ConvergenceFailure, HarnessError};

    type Outcome = (ScenarioKind, Result<ScenarioReport, ScenarioFailure>);

    fn not_converged(kind: ScenarioKind) -> Outcome {
        (
            kind,
            Err(ScenarioFailure::NotConverged(ConvergenceFailure {
                scenario: kind,
                metric: 2.5,
                threshold: 2.0,
            })),
        )
    }

    fn pipeline(kind: ScenarioKind) -> Outcome {
        (
            kind,
            Err(ScenarioFailure::Pipeline {
                scenario: kind,
                source: HarnessError::Training("trainer exited with 1".to_string()),
            }),
        )
    }

    #[test]
    fn no_failures_exit_zero() {
        assert_eq!(run_exit_code(&[]), 0);
    }

    #[test]
    fn not_converged_exits_one() {
        assert_eq!(run_exit_code(&[not_converged(ScenarioKind::Fast)]), EXIT_NOT_CONVERGED);
        assert_eq!(
            run_exit_code(&[
                not_converged(ScenarioKind::Tutorial),
                not_converged(ScenarioKind::Fast)
            ]),
            EXIT_NOT_CONVERGED
        );
    }

    #[test]
    fn pipeline_error_outranks_not_converged_in_either_order() {
        assert_eq!(run_exit_code(&[pipeline(ScenarioKind::Tutorial)]), EXIT_PIPELINE_ERROR);
        assert_eq!(
            run_exit_code(&[
                pipeline(ScenarioKind::Tutorial),
                not_converged(ScenarioKind::Fast)
            ]),
            EXIT_PIPELINE_ERROR
        );
        assert_eq!(
            run_exit_code(&[
                not_converged(ScenarioKind::Tutorial),
                pipeline(ScenarioKind::Fast)
            ]),
            EXIT_PIPELINE_ERROR
        );
    }
}
