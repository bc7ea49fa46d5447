//! HTTP handlers for the simple repository API.
//!
//! Handlers are thin: they translate between HTTP and the [`Catalog`](crate::catalog::Catalog),
//! the upload rules in [`crate::upload`] and the pages in [`crate::render`].

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, error, info};

use crate::catalog::ScanStats;
use crate::render::{render_simple_page, render_welcome_page, Link};
use crate::upload::{accept_upload, read_upload_form, FILE_UPLOAD_ACTION};
use crate::{normalize_project_name, AppError, AppResult, AppState};

fn render_error(e: askama::Error) -> AppError {
    error!("Template render error: {}", e);
    AppError::Anyhow(anyhow::anyhow!("Template render error: {}", e))
}

/// `301 Moved Permanently` to `location`.
fn moved_permanently(location: &str) -> AppResult<Response> {
    let location = HeaderValue::from_str(location)
        .map_err(|_| AppError::NotFound(format!("Not Found ({location} does not exist)")))?;
    Ok((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response())
}

/// Landing page with the configured welcome message.
///
/// # Route
/// `GET /`
pub async fn welcome(State(state): State<Arc<AppState>>) -> AppResult<Html<String>> {
    let project_count = state.catalog.list_projects().await?.len();
    let html = render_welcome_page(&state.config.index.welcome_message, project_count)
        .map_err(render_error)?;
    Ok(Html(html))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Counters from the most recent directory walk
    pub scan: ScanStats,
}

/// # Route
/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        scan: state.catalog.last_scan(),
    })
}

/// # Route
/// `GET /simple`
pub async fn simple_redirect() -> AppResult<Response> {
    moved_permanently("/simple/")
}

/// Returns the PEP 503 project index.
///
/// # Route
/// `GET /simple/`
///
/// # Example Response
/// ```html
/// <!DOCTYPE html>
/// <html>
///   <head>
///     <meta name="pypi:repository-version" content="1.0">
///     <title>Simple index</title>
///   </head>
///   <body>
///     <h1>Simple index</h1>
///     <a href="package-name/">package-name</a><br>
///   </body>
/// </html>
/// ```
pub async fn simple_index(State(state): State<Arc<AppState>>) -> AppResult<Html<String>> {
    let projects = state.catalog.list_projects().await?;
    debug!(count = projects.len(), "Generating simple index");

    let links: Vec<Link> = projects
        .iter()
        .map(|project| Link::new(project, format!("{project}/")))
        .collect();
    let html = render_simple_page("Simple index", &links).map_err(render_error)?;
    Ok(Html(html))
}

/// # Route
/// `GET /simple/{project}`
pub async fn project_redirect(Path(project): Path<String>) -> AppResult<Response> {
    moved_permanently(&format!("/simple/{}/", normalize_project_name(&project)))
}

/// Returns download links for every file of one project.
///
/// A name that isn't in normalized form is redirected to its normalized URL.
/// Links carry a `#algo=digest` fragment so installers can verify downloads.
///
/// # Route
/// `GET /simple/{project}/`
///
/// # Example Response
/// ```html
/// <h1>Links for package-name</h1>
/// <a href="/packages/package_name-1.0.0-py3-none-any.whl#sha256=abcd...">package_name-1.0.0-py3-none-any.whl</a><br>
/// ```
pub async fn project_index(
    Path(project): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let normalized = normalize_project_name(&project);
    if project != normalized {
        debug!(project = %project, normalized = %normalized, "Redirecting to normalized project URL");
        return moved_permanently(&format!("/simple/{normalized}/"));
    }

    let packages = state.catalog.list_packages(&normalized).await?;
    if packages.is_empty() {
        let fallback = &state.config.fallback;
        if fallback.enabled {
            let location = format!("{}/{normalized}/", fallback.url.trim_end_matches('/'));
            debug!(project = %normalized, location = %location, "Redirecting unknown project to fallback index");
            return Ok(Redirect::to(&location).into_response());
        }
        return Err(AppError::NotFound(format!(
            "Not Found ({normalized} does not exist)"
        )));
    }

    let links: Vec<Link> = packages
        .iter()
        .map(|file| Link::new(&file.filename, file.download_href()))
        .collect();
    let html = render_simple_page(&format!("Links for {normalized}"), &links)
        .map_err(render_error)?;
    Ok(Html(html).into_response())
}

/// Lists every stored file, grouped by project.
///
/// # Route
/// `GET /packages/`
pub async fn packages_index(State(state): State<Arc<AppState>>) -> AppResult<Html<String>> {
    let files = state.catalog.list_all().await?;
    let links: Vec<Link> = files
        .iter()
        .map(|file| Link::new(&file.relative_path, file.download_href()))
        .collect();
    let html = render_simple_page("All packages", &links).map_err(render_error)?;
    Ok(Html(html))
}

/// Streams a stored file.
///
/// `Content-Type` follows the file extension; range and conditional requests are
/// handled by [`ServeFile`].
///
/// # Route
/// `GET /packages/{*path}`
pub async fn download(
    Path(path): Path<String>,
    State(state): State<Arc<AppState>>,
    request: Request,
) -> AppResult<Response> {
    let not_found = || AppError::NotFound(format!("Not Found ({path} does not exist)"));
    let file = state
        .catalog
        .find_by_relative_path(&path)
        .await?
        .ok_or_else(not_found)?;

    let response = match ServeFile::new(&file.path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    // Removed after the lookup.
    if response.status() == StatusCode::NOT_FOUND {
        return Err(not_found());
    }

    let mut response = response.map(Body::new);
    if response.status().is_success() {
        let headers = response.headers_mut();
        if let Some(max_age) = state.config.cache_control_max_age() {
            if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={max_age}")) {
                headers.insert(header::CACHE_CONTROL, value);
            }
        }
        if let Ok(value) =
            HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.filename))
        {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    debug!(path = %file.relative_path, status = %response.status(), "Serving package file");
    Ok(response)
}

/// Accepts an upload form with a `content` file and an optional `gpg_signature`.
///
/// # Route
/// `POST /packages/update`
///
/// # Responses
/// - `204 No Content`: stored
/// - `400 Bad Request`: missing content, unrelated signature or invalid filename
/// - `409 Conflict`: a file of that name exists and overwriting is disabled
/// - `413 Payload Too Large`: a file exceeds the upload limit
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<StatusCode> {
    info!("Processing package upload");
    let request = read_upload_form(&state.catalog, &mut multipart).await?;
    accept_upload(&state.catalog, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Upload endpoint used by `twine` and `setup.py upload`.
///
/// The same rules as [`upload`] apply; the form must also carry
/// `:action=file_upload`.
///
/// # Route
/// `POST /`
pub async fn legacy_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<StatusCode> {
    info!("Processing legacy package upload");
    let request = read_upload_form(&state.catalog, &mut multipart).await?;
    match request.action.as_deref() {
        Some(FILE_UPLOAD_ACTION) => {}
        Some(other) => {
            return Err(AppError::BadRequest(format!("Unsupported :action: {other}")));
        }
        None => return Err(AppError::BadRequest("Missing :action field".to_string())),
    }
    accept_upload(&state.catalog, request).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_state, create_test_state_with, write_package};

    #[tokio::test]
    async fn test_project_index_redirects_to_normalized_name() {
        let (state, _temp_dir) = create_test_state();
        let response = project_index(Path("My_Package".to_string()), State(state))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/simple/my-package/");
    }

    #[tokio::test]
    async fn test_project_index_unknown_project_is_not_found() {
        let (state, _temp_dir) = create_test_state();
        let err = project_index(Path("missing".to_string()), State(state))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(err.to_string(), "Not Found (missing does not exist)");
    }

    #[tokio::test]
    async fn test_project_index_fallback_redirect() {
        let (state, _temp_dir) = create_test_state_with(|config| {
            config.fallback.enabled = true;
            config.fallback.url = "https://pypi.org/simple/".to_string();
        });
        let response = project_index(Path("requests".to_string()), State(state))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://pypi.org/simple/requests/"
        );
    }

    #[tokio::test]
    async fn test_project_redirect_adds_slash() {
        let response = project_redirect(Path("Foo.Bar".to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/simple/foo-bar/");
    }

    #[tokio::test]
    async fn test_simple_index_lists_projects() {
        let (state, temp_dir) = create_test_state();
        write_package(&temp_dir, "Beta_Pkg-1.0.tar.gz", b"b");
        write_package(&temp_dir, "alpha-2.0.zip", b"a");

        let Html(html) = simple_index(State(state)).await.unwrap();
        let alpha = html.find(">alpha</a>").unwrap();
        let beta = html.find(">beta-pkg</a>").unwrap();
        assert!(alpha < beta);
    }

    #[tokio::test]
    async fn test_health_reports_last_scan() {
        let (state, temp_dir) = create_test_state();
        write_package(&temp_dir, "pkg-1.0.tar.gz", b"a");
        write_package(&temp_dir, "notes.txt", b"b");
        state.catalog.list_projects().await.unwrap();

        let Json(health) = health(State(state)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.scan.listed, 1);
        assert_eq!(health.scan.ignored, 1);
    }
}
