use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::error::{HarnessError, Result};
use crate::fetch::{fetch_dataset, FetchOptions, FetchedDataset};
use crate::metric::read_metric;
use crate::trainer::{EpochBounds, ModelConfig, Trainer};
use crate::workspace::Workspace;

/// 1024-utterance sample set used by the tutorial.
pub const TUTORIAL_SOURCE_URL: &str = "https://cloudstor.aarnet.edu.au/plus/s/YJXTLHkYvpG85kX/download";
pub const TUTORIAL_DATASET_DIR: &str = "na_example";
pub const TUTORIAL_THRESHOLD: f64 = 0.3;

/// 4-utterance toy set. Its feature files are already normalised, so the
/// trainer never needs an audio normalisation tool to consume it.
pub const FAST_SOURCE_URL: &str = "https://cloudstor.aarnet.edu.au/plus/s/g2GreDNlDKUq9rz/download";
pub const FAST_DATASET_DIR: &str = "tiny_example";
pub const FAST_THRESHOLD: f64 = 2.0;
pub const FAST_MIN_EPOCHS: u32 = 2;
pub const FAST_MAX_EPOCHS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    Tutorial,
    Fast,
}

impl ScenarioKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::Tutorial => "tutorial",
            ScenarioKind::Fast => "fast",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bound on the error rate. The bound itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold {
    pub below: f64,
}

impl Threshold {
    pub fn new(below: f64) -> Result<Self> {
        if !below.is_finite() || below <= 0.0 {
            return Err(HarnessError::Config(format!(
                "threshold must be a positive number, got {}",
                below
            )));
        }
        Ok(Self { below })
    }

    pub fn check(&self, metric: f64) -> bool {
        metric.is_finite() && metric >= 0.0 && metric < self.below
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSpec {
    pub kind: ScenarioKind,
    pub source_url: String,
    pub dataset_dir: String,
    pub model: ModelConfig,
    pub threshold: Threshold,
}

impl ScenarioSpec {
    /// Full tutorial run: default model, must converge below 0.3.
    pub fn tutorial() -> Self {
        Self {
            kind: ScenarioKind::Tutorial,
            source_url: TUTORIAL_SOURCE_URL.to_string(),
            dataset_dir: TUTORIAL_DATASET_DIR.to_string(),
            model: ModelConfig::Default,
            threshold: Threshold {
                below: TUTORIAL_THRESHOLD,
            },
        }
    }

    /// Smoke run: simple model, 2 to 5 epochs, only has to produce a sane number.
    pub fn fast() -> Self {
        Self {
            kind: ScenarioKind::Fast,
            source_url: FAST_SOURCE_URL.to_string(),
            dataset_dir: FAST_DATASET_DIR.to_string(),
            model: ModelConfig::Simple {
                epochs: EpochBounds {
                    min: FAST_MIN_EPOCHS,
                    max: FAST_MAX_EPOCHS,
                },
            },
            threshold: Threshold {
                below: FAST_THRESHOLD,
            },
        }
    }

    pub fn builtin(kind: ScenarioKind) -> Self {
        match kind {
            ScenarioKind::Tutorial => Self::tutorial(),
            ScenarioKind::Fast => Self::fast(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Init,
    WorkspaceReady,
    DataFetched,
    CorpusLoaded,
    Trained,
    MetricRead,
    Asserted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: ScenarioKind,
    pub model: ModelConfig,
    pub dataset: FetchedDataset,
    pub feature_files: usize,
    pub experiment_dir: PathBuf,
    pub metric: f64,
    pub threshold: Threshold,
    pub state: ScenarioState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScenarioReport {
    pub fn converged(&self) -> bool {
        self.threshold.check(self.metric)
    }

    pub fn assert_converged(&mut self) -> std::result::Result<(), ConvergenceFailure> {
        self.state = ScenarioState::Asserted;
        if self.converged() {
            info!(
                scenario = %self.scenario,
                metric = self.metric,
                threshold = self.threshold.below,
                "scenario passed"
            );
            return Ok(());
        }
        error!(
            scenario = %self.scenario,
            metric = self.metric,
            threshold = self.threshold.below,
            "scenario did not reach threshold"
        );
        Err(ConvergenceFailure {
            scenario: self.scenario,
            metric: self.metric,
            threshold: self.threshold.below,
        })
    }
}

/// The trained model scored worse than allowed. This is the failure the
/// harness exists to catch, as opposed to the pipeline breaking.
#[derive(Debug, Clone, Error)]
#[error("{scenario}: test error rate {metric} is not below {threshold}")]
pub struct ConvergenceFailure {
    pub scenario: ScenarioKind,
    pub metric: f64,
    pub threshold: f64,
}

#[derive(Debug, Error)]
pub enum ScenarioFailure {
    #[error("{scenario}: {} error: {source}", .source.category())]
    Pipeline {
        scenario: ScenarioKind,
        #[source]
        source: HarnessError,
    },

    #[error(transparent)]
    NotConverged(#[from] ConvergenceFailure),
}

impl ScenarioFailure {
    pub fn category(&self) -> &'static str {
        match self {
            ScenarioFailure::Pipeline { source, .. } => source.category(),
            ScenarioFailure::NotConverged(_) => "not_converged",
        }
    }
}

/// Runs one scenario up to and including the metric read. Every step's
/// failure aborts the run; nothing is retried here.
pub fn run_scenario(
    spec: &ScenarioSpec,
    workspace: &Workspace,
    fetch_options: &FetchOptions,
    trainer: &dyn Trainer,
) -> Result<ScenarioReport> {
    let started_at = Utc::now();
    let mut state = ScenarioState::Init;
    info!(scenario = %spec.kind, "scenario starting");

    workspace.ensure()?;
    advance(spec.kind, &mut state, ScenarioState::WorkspaceReady);

    let destination = workspace.dataset_dir(&spec.dataset_dir);
    let dataset = fetch_dataset(&spec.source_url, &destination, workspace, fetch_options)?;
    advance(spec.kind, &mut state, ScenarioState::DataFetched);

    let corpus = trainer.load_corpus(&dataset.dataset_dir)?;
    advance(spec.kind, &mut state, ScenarioState::CorpusLoaded);

    let experiment_dir = trainer.train(&corpus, &spec.model, &workspace.exp_base_dir)?;
    advance(spec.kind, &mut state, ScenarioState::Trained);

    let metric = read_metric(&experiment_dir)?;
    advance(spec.kind, &mut state, ScenarioState::MetricRead);

    Ok(ScenarioReport {
        scenario: spec.kind,
        model: spec.model,
        dataset,
        feature_files: corpus.feature_files,
        experiment_dir,
        metric,
        threshold: spec.threshold,
        state,
        started_at,
        finished_at: Utc::now(),
    })
}

/// [`run_scenario`] followed by the threshold assertion.
pub fn run_and_assert(
    spec: &ScenarioSpec,
    workspace: &Workspace,
    fetch_options: &FetchOptions,
    trainer: &dyn Trainer,
) -> std::result::Result<ScenarioReport, ScenarioFailure> {
    let mut report = run_scenario(spec, workspace, fetch_options, trainer).map_err(|source| {
        error!(scenario = %spec.kind, category = source.category(), error = %source, "scenario aborted");
        ScenarioFailure::Pipeline {
            scenario: spec.kind,
            source,
        }
    })?;
    report.assert_converged()?;
    Ok(report)
}

fn advance(kind: ScenarioKind, state: &mut ScenarioState, next: ScenarioState) {
    info!(scenario = %kind, from = ?*state, to = ?next, "scenario state");
    *state = next;
}
