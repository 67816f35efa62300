use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::MetricError;

/// Where the trainer leaves the test-set error rate, relative to an
/// experiment directory. Every reader goes through this constant.
pub const TEST_PER_RELATIVE_PATH: &str = "test/test_per";

pub fn result_file_path(exp_dir: &Path) -> PathBuf {
    exp_dir.join(TEST_PER_RELATIVE_PATH)
}

/// Reads the error rate from `<exp_dir>/test/test_per`: the last
/// whitespace-separated token of the file's first line.
pub fn read_metric(exp_dir: &Path) -> Result<f64, MetricError> {
    let path = result_file_path(exp_dir);
    let data = match fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MetricError::NotFound(path))
        }
        Err(e) => return Err(MetricError::Io { path, source: e }),
    };
    let metric = parse_metric_line(&path, data.lines().next().unwrap_or(""))?;
    debug!(path = %path.display(), metric, "read metric");
    Ok(metric)
}

/// Parses one result line. `path` is only used to label errors.
pub fn parse_metric_line(path: &Path, line: &str) -> Result<f64, MetricError> {
    let token = line
        .split_whitespace()
        .last()
        .ok_or_else(|| MetricError::Empty(path.to_path_buf()))?;
    match token.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(MetricError::Malformed {
            path: path.to_path_buf(),
            token: token.to_string(),
        }),
    }
}
