use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HarnessError, Result};
use crate::workspace::ensure_dir;

const FEATURE_DIR: &str = "feat";
const LABEL_DIR: &str = "label";
const STDERR_HEAD_LINES: usize = 10;
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochBounds {
    pub min: u32,
    pub max: u32,
}

impl EpochBounds {
    pub fn new(min: u32, max: u32) -> Result<Self> {
        if min > max {
            return Err(HarnessError::Config(format!(
                "min_epochs ({}) exceeds max_epochs ({})",
                min, max
            )));
        }
        Ok(Self { min, max })
    }
}

/// Which model the trainer should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelConfig {
    /// The trainer's full default configuration, trained until it stops itself.
    Default,
    /// Reduced configuration trained for a bounded number of epochs.
    Simple { epochs: EpochBounds },
}

impl ModelConfig {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelConfig::Default => "default",
            ModelConfig::Simple { .. } => "simple",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Corpus {
    pub dir: PathBuf,
    pub feature_files: usize,
}

/// The two things a scenario needs from the trainer under test.
pub trait Trainer {
    fn load_corpus(&self, dir: &Path) -> Result<Corpus>;

    /// Trains `model` on `corpus`, blocking until done, and returns the
    /// experiment directory it wrote under `exp_base_dir`.
    fn train(&self, corpus: &Corpus, model: &ModelConfig, exp_base_dir: &Path) -> Result<PathBuf>;
}

/// Drives an external trainer process. The corpus, experiment directory and
/// model choice are passed through `CONVERGENCE_*` environment variables.
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    command: Vec<String>,
}

impl CommandTrainer {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().map_or(true, |c| c.trim().is_empty()) {
            return Err(HarnessError::Config(
                "trainer.command must name an executable".to_string(),
            ));
        }
        Ok(Self { command })
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }
}

impl Trainer for CommandTrainer {
    fn load_corpus(&self, dir: &Path) -> Result<Corpus> {
        let data_err = |reason: String| HarnessError::Data {
            dir: dir.to_path_buf(),
            reason,
        };
        if !dir.is_dir() {
            return Err(data_err("directory does not exist".to_string()));
        }
        for sub in [FEATURE_DIR, LABEL_DIR] {
            if !dir.join(sub).is_dir() {
                return Err(data_err(format!("missing {}/ subdirectory", sub)));
            }
        }
        let feature_files = walkdir::WalkDir::new(dir.join(FEATURE_DIR))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        if feature_files == 0 {
            return Err(data_err(format!("{}/ contains no feature files", FEATURE_DIR)));
        }
        info!(corpus = %dir.display(), feature_files, "corpus loaded");
        Ok(Corpus {
            dir: dir.to_path_buf(),
            feature_files,
        })
    }

    fn train(&self, corpus: &Corpus, model: &ModelConfig, exp_base_dir: &Path) -> Result<PathBuf> {
        let exp_dir = prepare_experiment_dir(exp_base_dir)?;
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        cmd.env("CONVERGENCE_CORPUS_DIR", &corpus.dir);
        cmd.env("CONVERGENCE_EXP_DIR", &exp_dir);
        cmd.env("CONVERGENCE_MODEL", model.as_str());
        if let ModelConfig::Simple { epochs } = model {
            cmd.env("CONVERGENCE_MIN_EPOCHS", epochs.min.to_string());
            cmd.env("CONVERGENCE_MAX_EPOCHS", epochs.max.to_string());
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::piped());

        info!(
            command = %self.command.join(" "),
            model = model.as_str(),
            exp_dir = %exp_dir.display(),
            "starting trainer"
        );
        let run_err = |e: std::io::Error| {
            HarnessError::Training(format!("could not run `{}`: {}", self.command[0], e))
        };
        let mut child = cmd.spawn().map_err(run_err)?;
        let mut log = StderrLog::default();
        if let Some(stderr) = child.stderr.take() {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                if reader.read_until(b'\n', &mut buf).map_err(run_err)? == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.trim().is_empty() {
                    info!(target: "trainer", "{}", line);
                    log.push(line);
                }
            }
        }
        let status = child.wait().map_err(run_err)?;
        if !status.success() {
            let status = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(HarnessError::Training(format!(
                "`{}` exited with {}: {}",
                self.command[0],
                status,
                log.summary()
            )));
        }
        info!(exp_dir = %exp_dir.display(), "trainer finished");
        Ok(exp_dir)
    }
}

/// Creates the next integer-named experiment directory (`0`, `1`, ...)
/// under `exp_base_dir`.
pub fn prepare_experiment_dir(exp_base_dir: &Path) -> Result<PathBuf> {
    ensure_dir(exp_base_dir)?;
    let entries =
        fs::read_dir(exp_base_dir).map_err(|e| HarnessError::environment(exp_base_dir, e))?;
    let highest = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<u64>().ok()))
        .max();
    let next = match highest {
        None => 0,
        Some(n) => n.checked_add(1).ok_or_else(|| {
            HarnessError::environment(
                exp_base_dir.join(n.to_string()),
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "experiment numbering exhausted; clear out the experiment directory",
                ),
            )
        })?,
    };
    let exp_dir = exp_base_dir.join(next.to_string());
    fs::create_dir(&exp_dir).map_err(|e| HarnessError::environment(&exp_dir, e))?;
    debug!(exp_dir = %exp_dir.display(), "prepared experiment directory");
    Ok(exp_dir)
}

/// Keeps the first and last lines of the trainer's stderr. The opening lines
/// usually name the root cause, the closing ones where it finally died.
#[derive(Debug, Default)]
struct StderrLog {
    head: Vec<String>,
    tail: VecDeque<String>,
    elided: usize,
}

impl StderrLog {
    fn push(&mut self, line: &str) {
        if self.head.len() < STDERR_HEAD_LINES {
            self.head.push(line.to_string());
            return;
        }
        if self.tail.len() == STDERR_TAIL_LINES {
            self.tail.pop_front();
            self.elided += 1;
        }
        self.tail.push_back(line.to_string());
    }

    fn summary(&self) -> String {
        if self.head.is_empty() {
            return "no diagnostic output".to_string();
        }
        let mut lines: Vec<String> = self.head.clone();
        if self.elided > 0 {
            lines.push(format!("... {} lines omitted ...", self.elided));
        }
        lines.extend(self.tail.iter().cloned());
        lines.join("\n")
    }
}
