//! Fixtures shared by the in-crate tests: scratch directories, generated
//! dataset archives and a throwaway HTTP server.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use chrono::Utc;

use crate::metric::result_file_path;

pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "convergence_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&dir).expect("scratch dir");
    dir
}

pub fn write_result_file(exp_dir: &Path, contents: &str) {
    let path = result_file_path(exp_dir);
    fs::create_dir_all(path.parent().expect("result parent")).expect("result dir");
    fs::write(path, contents).expect("result file");
}

/// Zip archive whose single top-level directory is `dir_name`.
pub fn dataset_archive(dir_name: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    writer
        .add_directory(format!("{}/", dir_name), options)
        .expect("zip dir");
    for (rel, contents) in files {
        writer
            .start_file(format!("{}/{}", dir_name, rel), options)
            .expect("zip entry");
        writer.write_all(contents.as_bytes()).expect("zip write");
    }
    writer.finish().expect("zip finish").into_inner()
}

/// A minimal corpus layout accepted by `CommandTrainer::load_corpus`.
pub fn corpus_archive(dir_name: &str) -> Vec<u8> {
    dataset_archive(
        dir_name,
        &[
            ("feat/utt0.log_mel_filterbank.npy", "0"),
            ("feat/utt1.log_mel_filterbank.npy", "1"),
            ("label/utt0.phonemes", "a b"),
            ("label/utt1.phonemes", "b a"),
        ],
    )
}

pub struct Route {
    path: String,
    status: u16,
    body: Vec<u8>,
}

impl Route {
    pub fn ok(path: &str, body: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            status: 200,
            body,
        }
    }

    pub fn status(path: &str, status: u16) -> Self {
        Self {
            path: path.to_string(),
            status,
            body: Vec::new(),
        }
    }
}

/// Serves `routes` on an ephemeral local port until the test process exits.
/// Unknown paths get a 404.
pub fn serve(routes: Vec<Route>) -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("bind test server");
    let addr = server
        .server_addr()
        .to_ip()
        .expect("test server has an ip address");
    thread::spawn(move || {
        for request in server.incoming_requests() {
            let route = routes.iter().find(|r| r.path == request.url());
            let response = match route {
                Some(r) => tiny_http::Response::from_data(r.body.clone()).with_status_code(r.status),
                None => tiny_http::Response::from_data(Vec::new()).with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });
    format!("http://{}", addr)
}

pub fn unzip_available() -> bool {
    Command::new("unzip")
        .arg("-v")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
