//! # PyPI Simple Repository Server
//!
//! A small package index implementing the PEP 503 "simple" repository API. It
//! stores distribution files on disk, serves a project index and per-project
//! link pages, and accepts uploads from `twine` and similar tools.
//!
//! ## Features
//!
//! - **Filesystem as index**: any flat or nested tree of wheels, sdists and eggs
//!   is served as is; there is no database to keep in sync
//! - **PEP 503 / PEP 440**: project names are normalized and files are listed in
//!   version order
//! - **Atomic uploads**: files become visible whole or not at all, and existing
//!   files are never replaced unless overwriting is enabled
//! - **Streaming downloads** with content digests on every link
//!
//! ## Key Modules
//!
//! - [`catalog`]: The on-disk package set and its read/write paths
//! - [`filename`]: Distribution filename parsing
//! - [`version`]: PEP 440 version ordering
//! - [`upload`]: Upload acceptance rules
//! - [`render`]: HTML index pages
//! - [`pypi`]: HTTP handlers
//! - [`config`]: Configuration management and settings
//! - [`error`]: Error handling and standardized responses
//!
//! ## Usage
//!
//! The main entry point is the `pypi-server` binary, but the catalog can be used
//! on its own:
//!
//! ```rust,no_run
//! # async fn example() -> pypi_server::AppResult<()> {
//! use pypi_server::catalog::Catalog;
//!
//! let catalog = Catalog::new("/srv/packages");
//! for file in catalog.list_packages("Django_REST").await? {
//!     println!("{} {}", file.version, file.fname_and_hash());
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod filename;
pub mod hash_utils;
pub mod logging;
pub mod pypi;
pub mod render;
pub mod server;
pub mod state;
pub mod upload;
pub mod version;

pub use catalog::{Catalog, PackageFile, ScanStats};
pub use config::Config;
pub use error::{ApiErrorResponse, AppError, AppResult, ErrorCode};
pub use server::{build_router, run_server};
pub use state::AppState;
pub use version::Version;

/// Longest file name accepted for storage.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Normalize a project name according to PEP 503.
///
/// Lowercases the name and replaces every run of `-`, `_` and `.` with a single
/// `-`, so `Django-REST-framework`, `django_rest_framework` and
/// `django.rest.framework` all name the same project.
///
/// # Examples
///
/// ```
/// # use pypi_server::normalize_project_name;
/// assert_eq!(normalize_project_name("Django-REST-framework"), "django-rest-framework");
/// assert_eq!(normalize_project_name("some__package"), "some-package");
/// assert_eq!(normalize_project_name("package.-_name"), "package-name");
/// ```
pub fn normalize_project_name(name: &str) -> String {
    use regex::Regex;
    use std::sync::OnceLock;

    static PROJECT_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let re = PROJECT_NAME_REGEX.get_or_init(|| {
        Regex::new(r"[-_.]+").unwrap_or_else(|e| {
            panic!("Failed to compile project name normalization regex: {e}")
        })
    });
    re.replace_all(&name.to_lowercase(), "-").to_string()
}

/// Validates a filename before it is used to build a path under the storage root.
///
/// # Errors
///
/// Returns `AppError::BadRequest` if the filename:
/// - Is empty or longer than [`MAX_FILENAME_LENGTH`]
/// - Contains null bytes or other control characters
/// - Contains `..` (parent directory references)
/// - Starts with `/` or `\` (absolute paths)
/// - Starts with a Windows drive letter
///
/// # Examples
///
/// ```
/// # use pypi_server::validate_filename;
/// assert!(validate_filename("pkg-1.0.tar.gz").is_ok());
/// assert!(validate_filename("../etc/passwd").is_err());
/// assert!(validate_filename("/absolute/path").is_err());
/// assert!(validate_filename("file\0name").is_err());
/// ```
pub fn validate_filename(filename: &str) -> Result<(), AppError> {
    if filename.is_empty() {
        tracing::warn!("Empty filename provided");
        return Err(AppError::BadRequest("Filename cannot be empty".to_string()));
    }

    if filename.len() > MAX_FILENAME_LENGTH {
        tracing::warn!(length = filename.len(), "Filename too long");
        return Err(AppError::BadRequest(format!(
            "Filename too long: {} characters (max: {MAX_FILENAME_LENGTH})",
            filename.len()
        )));
    }

    if filename.contains('\0') {
        tracing::warn!(filename = %filename.escape_default(), "Null byte detected in filename");
        return Err(AppError::BadRequest(
            "Filename contains null byte".to_string(),
        ));
    }

    if filename.chars().any(|c| c.is_control()) {
        tracing::warn!(filename = %filename.escape_default(), "Control character detected in filename");
        return Err(AppError::BadRequest(
            "Filename contains control characters".to_string(),
        ));
    }

    if filename.contains("..") {
        tracing::warn!(filename = %filename, "Path traversal attempt detected (..)");
        return Err(AppError::BadRequest(
            "Filename contains parent directory reference (..)".to_string(),
        ));
    }

    if filename.starts_with('/') || filename.starts_with('\\') {
        tracing::warn!(filename = %filename, "Absolute path detected");
        return Err(AppError::BadRequest(
            "Filename cannot be an absolute path".to_string(),
        ));
    }

    let mut chars = filename.chars();
    if let (Some(first), Some(':')) = (chars.next(), chars.next()) {
        if first.is_ascii_alphabetic() {
            tracing::warn!(filename = %filename, "Windows drive letter detected");
            return Err(AppError::BadRequest(
                "Filename cannot contain drive letter".to_string(),
            ));
        }
    }

    Ok(())
}
