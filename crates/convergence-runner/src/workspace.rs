use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, Result};

pub const DEFAULT_DATA_BASE_DIR: &str = "testing/data/";
pub const DEFAULT_EXP_BASE_DIR: &str = "testing/exp/";

/// Fixed download target inside the data directory. Shared by every scenario,
/// which is why scenarios must not run concurrently.
pub const ARCHIVE_FILE_NAME: &str = "data.zip";

/// The two base directories every scenario works under. They are created on
/// demand and never removed, so datasets and experiments survive for debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workspace {
    pub data_base_dir: PathBuf,
    pub exp_base_dir: PathBuf,
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            data_base_dir: PathBuf::from(DEFAULT_DATA_BASE_DIR),
            exp_base_dir: PathBuf::from(DEFAULT_EXP_BASE_DIR),
        }
    }
}

impl Workspace {
    pub fn new(data_base_dir: impl Into<PathBuf>, exp_base_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_base_dir: data_base_dir.into(),
            exp_base_dir: exp_base_dir.into(),
        }
    }

    pub fn ensure(&self) -> Result<()> {
        ensure_dir(&self.exp_base_dir)?;
        ensure_dir(&self.data_base_dir)?;
        Ok(())
    }

    pub fn archive_path(&self) -> PathBuf {
        self.data_base_dir.join(ARCHIVE_FILE_NAME)
    }

    pub fn dataset_dir(&self, name: &str) -> PathBuf {
        self.data_base_dir.join(name)
    }
}

pub fn ensure_workspace(workspace: &Workspace) -> Result<()> {
    workspace.ensure()
}

/// `create_dir_all` that refuses to treat an existing file as success.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(HarnessError::environment(
            path,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "path exists and is not a directory",
            ),
        ));
    }
    fs::create_dir_all(path).map_err(|e| HarnessError::environment(path, e))?;
    debug!(path = %path.display(), "created directory");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    #[test]
    fn ensure_creates_both_dirs_and_is_idempotent() {
        let root = scratch_dir("workspace_idem");
        let ws = Workspace::new(root.join("testing/data"), root.join("testing/exp"));

        ws.ensure().expect("first ensure");
        ws.ensure().expect("second ensure must not fail");

        assert!(ws.data_base_dir.is_dir());
        assert!(ws.exp_base_dir.is_dir());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn ensure_keeps_existing_contents() {
        let root = scratch_dir("workspace_keep");
        let ws = Workspace::new(root.join("data"), root.join("exp"));
        ws.ensure().expect("ensure");
        fs::write(ws.exp_base_dir.join("0.marker"), b"x").expect("marker");

        ensure_workspace(&ws).expect("ensure again");

        assert!(ws.exp_base_dir.join("0.marker").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn ensure_rejects_file_in_the_way() {
        let root = scratch_dir("workspace_collision");
        let blocked = root.join("data");
        fs::write(&blocked, b"not a dir").expect("write file");
        let ws = Workspace::new(&blocked, root.join("exp"));

        let err = ws.ensure().expect_err("file collision must fail");
        assert_eq!(err.category(), "environment");
        assert!(err.to_string().contains("data"), "unexpected error: {}", err);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn archive_path_is_fixed_inside_data_dir() {
        let ws = Workspace::default();
        assert_eq!(ws.archive_path(), PathBuf::from("testing/data/data.zip"));
        assert_eq!(
            ws.dataset_dir("na_example"),
            PathBuf::from("testing/data/na_example")
        );
    }
}
