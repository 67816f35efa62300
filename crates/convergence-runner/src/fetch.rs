use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{FetchError, Result};
use crate::workspace::Workspace;

const DIAGNOSTIC_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extractor {
    /// Shell out to `unzip`.
    #[default]
    Unzip,
    /// Extract in-process with the `zip` crate.
    Builtin,
}

impl Extractor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Extractor::Unzip => "unzip",
            Extractor::Builtin => "builtin",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub extractor: Extractor,
    /// Total download attempts. 1 means no retry.
    pub attempts: u32,
    pub retry_delay: Duration,
    /// `None` waits on the server indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            extractor: Extractor::default(),
            attempts: 1,
            retry_delay: Duration::from_secs(5),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchedDataset {
    pub source_url: String,
    pub dataset_dir: PathBuf,
    pub archive_path: PathBuf,
    pub archive_bytes: u64,
    pub archive_sha256: String,
}

/// Replaces `destination_dir` with a fresh copy unpacked from `source_url`.
///
/// The previous occupant of `destination_dir` and any stale archive are
/// deleted first, so nothing from an interrupted earlier run can leak into
/// training. The archive is expected to contain `destination_dir` as a
/// top-level directory.
pub fn fetch_dataset(
    source_url: &str,
    destination_dir: &Path,
    workspace: &Workspace,
    options: &FetchOptions,
) -> Result<FetchedDataset> {
    remove_dir_if_present(destination_dir)?;
    workspace.ensure()?;

    let archive_path = workspace.archive_path();
    if archive_path.exists() {
        fs::remove_file(&archive_path).map_err(|e| io_error(&archive_path, e))?;
    }

    info!(url = source_url, archive = %archive_path.display(), "downloading dataset");
    let archive_bytes = download(source_url, &archive_path, options)?;
    let archive_sha256 = sha256_file(&archive_path)?;
    info!(bytes = archive_bytes, sha256 = %archive_sha256, "download complete");

    match options.extractor {
        Extractor::Unzip => extract_with_unzip(&archive_path, &workspace.data_base_dir)?,
        Extractor::Builtin => extract_builtin(&archive_path, &workspace.data_base_dir)?,
    }

    if !destination_dir.is_dir() {
        return Err(FetchError::MissingDestination(destination_dir.to_path_buf()).into());
    }
    info!(
        dataset = %destination_dir.display(),
        extractor = options.extractor.as_str(),
        "dataset extracted"
    );

    Ok(FetchedDataset {
        source_url: source_url.to_string(),
        dataset_dir: destination_dir.to_path_buf(),
        archive_path,
        archive_bytes,
        archive_sha256,
    })
}

fn remove_dir_if_present(dir: &Path) -> Result<(), FetchError> {
    if dir.is_dir() {
        info!(dir = %dir.display(), "removing previous dataset copy");
        fs::remove_dir_all(dir).map_err(|e| io_error(dir, e))?;
    }
    Ok(())
}

fn download(url: &str, dest: &Path, options: &FetchOptions) -> Result<u64, FetchError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(options.timeout)
        .build()
        .map_err(|e| FetchError::Download {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let attempts = options.attempts.max(1);
    let mut attempt = 1;
    loop {
        match download_once(&client, url, dest) {
            Ok(bytes) => return Ok(bytes),
            Err(err) if attempt < attempts => {
                warn!(attempt, attempts, error = %err, "download failed, retrying");
                thread::sleep(options.retry_delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn download_once(
    client: &reqwest::blocking::Client,
    url: &str,
    dest: &Path,
) -> Result<u64, FetchError> {
    let download_err = |e: reqwest::Error| FetchError::Download {
        url: url.to_string(),
        message: e.to_string(),
    };
    let mut response = client.get(url).send().map_err(download_err)?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let mut file = fs::File::create(dest).map_err(|e| io_error(dest, e))?;
    let bytes = response.copy_to(&mut file).map_err(download_err)?;
    file.sync_all().map_err(|e| io_error(dest, e))?;
    Ok(bytes)
}

fn extract_with_unzip(archive: &Path, target_dir: &Path) -> Result<(), FetchError> {
    let tool = "unzip";
    // -o: never stop to prompt about overwriting leftovers outside the dataset dir.
    let output = Command::new(tool)
        .arg("-o")
        .arg("-q")
        .arg(archive)
        .arg("-d")
        .arg(target_dir)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| FetchError::ExtractSpawn {
            tool: tool.to_string(),
            source: e,
        })?;
    if output.status.success() {
        return Ok(());
    }
    let status = output
        .status
        .code()
        .map(|c| format!("exit code {}", c))
        .unwrap_or_else(|| "signal".to_string());
    let mut diagnostics = tail_lines(&String::from_utf8_lossy(&output.stderr));
    if diagnostics.is_empty() {
        diagnostics = tail_lines(&String::from_utf8_lossy(&output.stdout));
    }
    Err(FetchError::ExtractTool {
        tool: tool.to_string(),
        status,
        diagnostics,
    })
}

fn extract_builtin(archive: &Path, target_dir: &Path) -> Result<(), FetchError> {
    let archive_err = |message: String| FetchError::Archive {
        path: archive.to_path_buf(),
        message,
    };
    let file = fs::File::open(archive).map_err(|e| io_error(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| archive_err(e.to_string()))?;
    zip.extract(target_dir)
        .map_err(|e| archive_err(e.to_string()))
}

fn sha256_file(path: &Path) -> Result<String, FetchError> {
    let mut file = fs::File::open(path).map_err(|e| io_error(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| io_error(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

fn tail_lines(text: &str) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    lines[start..].join("\n")
}

fn io_error(path: &Path, source: io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::test_support::{dataset_archive, scratch_dir, serve, unzip_available, Route};
    use crate::workspace::ARCHIVE_FILE_NAME;

    fn builtin() -> FetchOptions {
        FetchOptions {
            extractor: Extractor::Builtin,
            ..FetchOptions::default()
        }
    }

    #[test]
    fn fetch_replaces_previous_dataset_contents() {
        let root = scratch_dir("fetch_replace");
        let ws = Workspace::new(root.join("data"), root.join("exp"));
        let dest = ws.dataset_dir("tiny_example");
        fs::create_dir_all(&dest).expect("old dataset dir");
        fs::write(dest.join("leftover.marker"), b"stale").expect("marker");

        let archive = dataset_archive(
            "tiny_example",
            &[("feat/utt0.npy", "f0"), ("label/utt0.phonemes", "a b")],
        );
        let base = serve(vec![Route::ok("/tiny", archive.clone())]);

        let fetched = fetch_dataset(&format!("{}/tiny", base), &dest, &ws, &builtin()).expect("fetch");

        assert!(!dest.join("leftover.marker").exists(), "stale file survived");
        assert_eq!(
            fs::read_to_string(dest.join("feat/utt0.npy")).expect("extracted"),
            "f0"
        );
        assert_eq!(fetched.archive_bytes, archive.len() as u64);
        assert_eq!(fetched.archive_sha256.len(), 64);
        assert_eq!(fetched.archive_path, root.join("data").join(ARCHIVE_FILE_NAME));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn stale_archive_is_overwritten() {
        let root = scratch_dir("fetch_stale_zip");
        let ws = Workspace::new(root.join("data"), root.join("exp"));
        ws.ensure().expect("workspace");
        fs::write(ws.archive_path(), b"partial download").expect("stale zip");

        let archive = dataset_archive("na_example", &[("feat/a.npy", "1")]);
        let base = serve(vec![Route::ok("/na", archive.clone())]);
        fetch_dataset(&format!("{}/na", base), &ws.dataset_dir("na_example"), &ws, &builtin())
            .expect("fetch");

        assert_eq!(fs::read(ws.archive_path()).expect("archive"), archive);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn non_success_status_is_fatal() {
        let root = scratch_dir("fetch_404");
        let ws = Workspace::new(root.join("data"), root.join("exp"));
        let base = serve(vec![]);

        let err = fetch_dataset(&format!("{}/missing", base), &ws.dataset_dir("x"), &ws, &builtin())
            .expect_err("404 must fail");
        match err {
            HarnessError::Fetch(FetchError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected HTTP status error, got {}", other),
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn retries_until_attempts_are_exhausted() {
        let root = scratch_dir("fetch_retry");
        let ws = Workspace::new(root.join("data"), root.join("exp"));
        let base = serve(vec![Route::status("/flaky", 503)]);
        let options = FetchOptions {
            attempts: 2,
            retry_delay: Duration::from_millis(10),
            ..builtin()
        };

        let err = fetch_dataset(&format!("{}/flaky", base), &ws.dataset_dir("x"), &ws, &options)
            .expect_err("exhausted retries must fail");
        assert!(err.to_string().contains("503"), "unexpected error: {}", err);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn archive_without_destination_dir_is_rejected() {
        let root = scratch_dir("fetch_layout");
        let ws = Workspace::new(root.join("data"), root.join("exp"));
        let archive = dataset_archive("some_other_name", &[("feat/a.npy", "1")]);
        let base = serve(vec![Route::ok("/odd", archive)]);

        let err = fetch_dataset(&format!("{}/odd", base), &ws.dataset_dir("tiny_example"), &ws, &builtin())
            .expect_err("wrong layout must fail");
        assert!(matches!(
            err,
            HarnessError::Fetch(FetchError::MissingDestination(_))
        ));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn corrupt_archive_fails_builtin_extraction() {
        let root = scratch_dir("fetch_corrupt");
        let ws = Workspace::new(root.join("data"), root.join("exp"));
        let base = serve(vec![Route::ok("/bad", b"this is not a zip".to_vec())]);

        let err = fetch_dataset(&format!("{}/bad", base), &ws.dataset_dir("x"), &ws, &builtin())
            .expect_err("corrupt archive must fail");
        assert!(matches!(err, HarnessError::Fetch(FetchError::Archive { .. })));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unzip_tool_extracts_and_reports_diagnostics() {
        if !unzip_available() {
            eprintln!("skipping unzip extraction test: `unzip` not found on PATH");
            return;
        }
        let root = scratch_dir("fetch_unzip");
        let ws = Workspace::new(root.join("data"), root.join("exp"));
        let archive = dataset_archive("tiny_example", &[("feat/utt0.npy", "f0")]);
        let base = serve(vec![
            Route::ok("/tiny", archive),
            Route::ok("/bad", b"garbage bytes".to_vec()),
        ]);
        let options = FetchOptions::default();

        fetch_dataset(&format!("{}/tiny", base), &ws.dataset_dir("tiny_example"), &ws, &options)
            .expect("unzip fetch");
        assert!(ws.dataset_dir("tiny_example").join("feat/utt0.npy").is_file());

        let err = fetch_dataset(&format!("{}/bad", base), &ws.dataset_dir("tiny_example"), &ws, &options)
            .expect_err("garbage must fail");
        match err {
            HarnessError::Fetch(FetchError::ExtractTool { diagnostics, .. }) => {
                assert!(!diagnostics.is_empty(), "tool output should be attached")
            }
            other => panic!("expected extraction tool error, got {}", other),
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn tail_lines_keeps_last_non_blank_lines() {
        let text = (0..30).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n\n");
        let tail = tail_lines(&text);
        assert_eq!(tail.lines().count(), DIAGNOSTIC_TAIL_LINES);
        assert!(tail.ends_with("line 29"));
    }
}
