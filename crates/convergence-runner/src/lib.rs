//! End-to-end convergence checks for a speech-recognition trainer.
//!
//! A scenario fetches a reference dataset, hands it to the trainer under test,
//! reads the test-set error rate the trainer persisted and compares it with a
//! fixed bound. Scenarios share the base directories and the archive path, so
//! run them one at a time.

pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod metric;
pub mod scenario;
pub mod trainer;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use config::{HarnessConfig, CONFIG_TEMPLATE, DEFAULT_CONFIG_PATH};
pub use error::{FetchError, HarnessError, MetricError, Result};
pub use fetch::{fetch_dataset, Extractor, FetchOptions, FetchedDataset};
pub use logging::init_logging;
pub use metric::{read_metric, result_file_path, TEST_PER_RELATIVE_PATH};
pub use scenario::{
    run_and_assert, run_scenario, ConvergenceFailure, ScenarioFailure, ScenarioKind,
    ScenarioReport, ScenarioSpec, ScenarioState, Threshold,
};
pub use trainer::{
    prepare_experiment_dir, CommandTrainer, Corpus, EpochBounds, ModelConfig, Trainer,
};
pub use workspace::{ensure_workspace, Workspace, ARCHIVE_FILE_NAME};
