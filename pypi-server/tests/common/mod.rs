//! Common test utilities and helpers
//!
//! Shared setup for the HTTP-level tests: a router over a temporary storage
//! root, driven in-process through `axum_test::TestServer`.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use pypi_server::{build_router, AppState, Config};
use tempfile::TempDir;

/// A running test server and the storage root behind it.
pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub temp_dir: TempDir,
}

impl TestApp {
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Place a file directly in the storage root, bypassing the upload path.
    pub fn write_package(&self, relative: &str, content: &[u8]) {
        let path = self.root().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn read_package(&self, relative: &str) -> Vec<u8> {
        std::fs::read(self.root().join(relative)).unwrap()
    }

    /// Names in the storage root, hidden staging files excluded.
    pub fn visible_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.root())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        names
    }
}

/// Test app with default configuration.
pub fn spawn_app() -> TestApp {
    spawn_app_with(|_| {})
}

/// Test app with the configuration adjusted by `adjust`.
pub fn spawn_app_with(adjust: impl FnOnce(&mut Config)) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = temp_dir.path().to_path_buf();
    adjust(&mut config);

    let state = Arc::new(AppState::new(config));
    let server = TestServer::new(build_router(Arc::clone(&state))).unwrap();
    TestApp {
        server,
        state,
        temp_dir,
    }
}

fn file_part(filename: &str, content: &[u8]) -> Part {
    Part::bytes(content.to_vec())
        .file_name(filename)
        .mime_type("application/octet-stream")
}

/// Upload form with a `content` file.
pub fn content_form(filename: &str, content: &[u8]) -> MultipartForm {
    MultipartForm::new().add_part("content", file_part(filename, content))
}

/// Upload form with a `content` file and a `gpg_signature` file.
pub fn signed_form(
    filename: &str,
    content: &[u8],
    signature_name: &str,
    signature: &[u8],
) -> MultipartForm {
    content_form(filename, content).add_part("gpg_signature", file_part(signature_name, signature))
}

/// `href` values of every link in a rendered page, entity-decoded.
pub fn link_hrefs(html: &str) -> Vec<String> {
    html.split("href=\"")
        .skip(1)
        .filter_map(|chunk| chunk.split_once('"').map(|(href, _)| href))
        .map(|href| {
            href.replace("&#x2f;", "/")
                .replace("&#47;", "/")
                .replace("&#x27;", "'")
                .replace("&amp;", "&")
        })
        .collect()
}
