//! Upload acceptance.
//!
//! An upload is a multipart form with a `content` file and an optional detached
//! `gpg_signature`. Every file in the form is spooled to a hidden staging file
//! first; the gates below then run against the names, and only an upload that
//! passes all of them touches the visible storage root:
//!
//! 1. the content file is present
//! 2. a signature, if any, is named `{content}.asc`
//! 3. every name is a plain distribution filename
//! 4. no name is taken, unless overwriting is enabled
//!
//! Content is committed before the signature. If the signature cannot be
//! committed, newly stored content is removed again.

use std::sync::OnceLock;

use axum::extract::Multipart;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::catalog::{ensure_plain_filename, Catalog, PackageFile, StagedFile};
use crate::error::{AppError, AppResult};
use crate::filename::{parse_filename, SIGNATURE_SUFFIX};

pub const CONTENT_FIELD: &str = "content";
pub const SIGNATURE_FIELD: &str = "gpg_signature";
/// Form field that selects the operation on the legacy upload endpoint
pub const ACTION_FIELD: &str = ":action";
pub const FILE_UPLOAD_ACTION: &str = "file_upload";

/// Upload tools send one field per metadata item, so this is generous.
pub const MAX_MULTIPART_FIELDS: usize = 128;

const MAX_ACTION_LENGTH: usize = 64;

fn upload_name_regex() -> &'static Regex {
    static UPLOAD_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    UPLOAD_NAME_REGEX.get_or_init(|| {
        Regex::new(r"(?i)^[a-z0-9_.!+-]+$").unwrap_or_else(|e| {
            panic!("Failed to compile upload filename regex: {e}")
        })
    })
}

/// A file received in the form, spooled but not yet visible.
#[derive(Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub staged: StagedFile,
}

#[derive(Debug, Default)]
pub struct UploadRequest {
    pub content: Option<UploadedFile>,
    pub signature: Option<UploadedFile>,
    /// Value of the `:action` field, if the form had one
    pub action: Option<String>,
}

impl UploadRequest {
    fn content_name(&self) -> Option<&str> {
        self.content.as_ref().map(|file| file.filename.as_str())
    }

    fn signature_name(&self) -> Option<&str> {
        self.signature.as_ref().map(|file| file.filename.as_str())
    }
}

/// Files that an accepted upload made visible.
#[derive(Debug)]
pub struct StoredUpload {
    pub content: PackageFile,
    pub signature: Option<PackageFile>,
}

/// Read the whole form, streaming file fields into staging files.
///
/// Unknown fields are drained and ignored. Size limits are enforced while
/// streaming, so an oversized file fails with `PayloadTooLarge` before it is
/// fully received.
pub async fn read_upload_form(
    catalog: &Catalog,
    multipart: &mut Multipart,
) -> AppResult<UploadRequest> {
    let mut request = UploadRequest::default();
    let mut field_count = 0usize;

    while let Some(mut field) = multipart.next_field().await? {
        field_count += 1;
        if field_count > MAX_MULTIPART_FIELDS {
            warn!(field_count, "Too many multipart fields");
            return Err(AppError::BadRequest(format!(
                "Too many multipart fields (max: {MAX_MULTIPART_FIELDS})"
            )));
        }

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            CONTENT_FIELD | SIGNATURE_FIELD => {
                let slot = if name == CONTENT_FIELD {
                    &mut request.content
                } else {
                    &mut request.signature
                };
                if slot.is_some() {
                    return Err(AppError::BadRequest(format!("duplicate field: {name}")));
                }

                // A plain text field is not a file upload.
                let Some(filename) = field.file_name().map(str::to_string) else {
                    debug!(field = %name, "Ignoring upload field sent without a filename");
                    while field.chunk().await?.is_some() {}
                    continue;
                };
                let mut staged = catalog.begin_stage().await?;
                while let Some(chunk) = field.chunk().await? {
                    staged.write_chunk(&chunk).await?;
                }
                debug!(field = %name, filename = %filename, size = staged.size(), "Spooled upload field");
                *slot = Some(UploadedFile { filename, staged });
            }
            ACTION_FIELD => {
                let action = field.text().await?;
                if action.len() > MAX_ACTION_LENGTH {
                    return Err(AppError::BadRequest("Invalid :action field".to_string()));
                }
                request.action = Some(action.trim().to_string());
            }
            _ => {
                while field.chunk().await?.is_some() {}
            }
        }
    }

    Ok(request)
}

/// Check the names of an upload against the first three gates.
pub fn validate_names(content: Option<&str>, signature: Option<&str>) -> AppResult<()> {
    let content = content.ok_or_else(|| AppError::BadRequest("missing content".to_string()))?;

    if let Some(signature) = signature {
        if signature != format!("{content}{SIGNATURE_SUFFIX}") {
            return Err(AppError::BadRequest("unrelated signature".to_string()));
        }
    }

    for name in std::iter::once(content).chain(signature) {
        if !upload_name_regex().is_match(name)
            || parse_filename(name).is_none()
            || ensure_plain_filename(name).is_err()
        {
            return Err(AppError::BadRequest(format!("invalid filename: {name}")));
        }
    }
    Ok(())
}

/// Run every gate and persist the upload.
pub async fn accept_upload(catalog: &Catalog, request: UploadRequest) -> AppResult<StoredUpload> {
    validate_names(request.content_name(), request.signature_name())?;

    let UploadRequest {
        content, signature, ..
    } = request;
    let content = content.ok_or_else(|| AppError::BadRequest("missing content".to_string()))?;

    let content_existed = catalog.exists(&content.filename).await?;
    if !catalog.overwrite() {
        if content_existed {
            return Err(AppError::Conflict(format!(
                "already exists: {}",
                content.filename
            )));
        }
        if let Some(signature) = &signature {
            if catalog.exists(&signature.filename).await? {
                return Err(AppError::Conflict(format!(
                    "already exists: {}",
                    signature.filename
                )));
            }
        }
    }

    let content_name = content.filename.clone();
    let stored_content = catalog.commit(content.staged, &content.filename).await?;

    let stored_signature = match signature {
        Some(signature) => match catalog.commit(signature.staged, &signature.filename).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                if !content_existed {
                    warn!(filename = %content_name, "Signature not stored, rolling back content");
                    if let Err(rollback) = catalog.remove(&content_name).await {
                        error!(filename = %content_name, error = %rollback, "Rollback failed");
                    }
                }
                return Err(e);
            }
        },
        None => None,
    };

    info!(
        filename = %content_name,
        signed = stored_signature.is_some(),
        "Upload accepted"
    );
    Ok(StoredUpload {
        content: stored_content,
        signature: stored_signature,
    })
}
