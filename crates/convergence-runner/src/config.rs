use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::fetch::{Extractor, FetchOptions};
use crate::scenario::{ScenarioKind, ScenarioSpec, Threshold};
use crate::trainer::{CommandTrainer, EpochBounds, ModelConfig};
use crate::workspace::Workspace;

pub const DEFAULT_CONFIG_PATH: &str = "convergence.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub workspace: Workspace,
    pub fetch: FetchConfig,
    pub trainer: TrainerConfig,
    pub logging: LoggingConfig,
    pub scenarios: ScenarioOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub extractor: Extractor,
    pub attempts: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: Option<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let options = FetchOptions::default();
        Self {
            extractor: options.extractor,
            attempts: options.attempts,
            retry_delay_ms: options.retry_delay.as_millis() as u64,
            timeout_secs: None,
        }
    }
}

impl FetchConfig {
    pub fn to_options(&self) -> FetchOptions {
        FetchOptions {
            extractor: self.extractor,
            attempts: self.attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainerConfig {
    /// argv of the trainer process, e.g. `["python", "train.py"]`.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directives. `RUST_LOG` wins when set.
    pub filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioOverrides {
    pub tutorial: ScenarioOverride,
    pub fast: ScenarioOverride,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioOverride {
    pub source_url: Option<String>,
    pub dataset_dir: Option<String>,
    pub threshold: Option<f64>,
    pub min_epochs: Option<u32>,
    pub max_epochs: Option<u32>,
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw).map_err(|e| match e {
            HarnessError::Config(msg) => {
                HarnessError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// An explicit path must exist. Without one, `convergence.yaml` in the
    /// current directory is used when present, else the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        match path {
            Some(p) => Ok((Self::load(p)?, Some(p.to_path_buf()))),
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default_path.is_file() {
                    Ok((Self::load(&default_path)?, Some(default_path)))
                } else {
                    Ok((Self::default(), None))
                }
            }
        }
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(raw).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.attempts == 0 {
            return Err(HarnessError::Config(
                "fetch.attempts must be at least 1".to_string(),
            ));
        }
        if self.fetch.timeout_secs == Some(0) {
            return Err(HarnessError::Config(
                "fetch.timeout_secs must be positive; omit it to wait indefinitely".to_string(),
            ));
        }
        for kind in [ScenarioKind::Tutorial, ScenarioKind::Fast] {
            self.scenario_spec(kind)?;
        }
        Ok(())
    }

    pub fn scenario_spec(&self, kind: ScenarioKind) -> Result<ScenarioSpec> {
        let mut spec = ScenarioSpec::builtin(kind);
        let overrides = match kind {
            ScenarioKind::Tutorial => &self.scenarios.tutorial,
            ScenarioKind::Fast => &self.scenarios.fast,
        };
        if let Some(url) = &overrides.source_url {
            spec.source_url = url.clone();
        }
        if let Some(dir) = &overrides.dataset_dir {
            if dir.is_empty() || dir.contains('/') || dir.contains('\\') || dir == ".." {
                return Err(HarnessError::Config(format!(
                    "scenarios.{}.dataset_dir must be a plain directory name, got {:?}",
                    kind, dir
                )));
            }
            spec.dataset_dir = dir.clone();
        }
        if let Some(threshold) = overrides.threshold {
            spec.threshold = Threshold::new(threshold)?;
        }
        match spec.model {
            ModelConfig::Simple { epochs } => {
                let min = overrides.min_epochs.unwrap_or(epochs.min);
                let max = overrides.max_epochs.unwrap_or(epochs.max);
                spec.model = ModelConfig::Simple {
                    epochs: EpochBounds::new(min, max)?,
                };
            }
            ModelConfig::Default => {
                if overrides.min_epochs.is_some() || overrides.max_epochs.is_some() {
                    return Err(HarnessError::Config(format!(
                        "scenarios.{} trains the default model; epoch bounds do not apply",
                        kind
                    )));
                }
            }
        }
        Ok(spec)
    }

    pub fn trainer(&self) -> Result<CommandTrainer> {
        if self.trainer.command.is_empty() {
            return Err(HarnessError::Config(
                "trainer.command is not set".to_string(),
            ));
        }
        CommandTrainer::new(self.trainer.command.clone())
    }
}

pub const CONFIG_TEMPLATE: &str = r#"# Convergence harness configuration.
workspace:
  data_base_dir: testing/data/
  exp_base_dir: testing/exp/

fetch:
  # unzip | builtin
  extractor: unzip
  # 1 disables retries.
  attempts: 1
  retry_delay_ms: 5000
  # Omit to wait on the server indefinitely.
  # timeout_secs: 600

trainer:
  # Receives CONVERGENCE_CORPUS_DIR, CONVERGENCE_EXP_DIR, CONVERGENCE_MODEL
  # and, for the simple model, CONVERGENCE_MIN_EPOCHS / CONVERGENCE_MAX_EPOCHS.
  # It must write <CONVERGENCE_EXP_DIR>/test/test_per.
  command: ["python", "train.py"]

logging:
  filter: info
  ansi: true

scenarios:
  tutorial: {}
  fast:
    min_epochs: 2
    max_epochs: 5
"#;
