//! Write path: spool uploads to hidden temp files, then move them into place.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// An upload spooled to a hidden temp file inside the storage root.
///
/// The temp file is invisible to listings. Committing moves it into place
/// through [`super::Catalog::commit`]; dropping it uncommitted deletes it.
#[derive(Debug)]
pub struct StagedFile {
    temp_path: PathBuf,
    file: Option<fs::File>,
    size: u64,
    limit: Option<u64>,
    committed: bool,
}

impl StagedFile {
    pub(crate) async fn create(root: &Path, limit: Option<u64>) -> AppResult<Self> {
        fs::create_dir_all(root).await?;
        let temp_path = root.join(format!(".upload-{}.tmp", Uuid::new_v4()));
        let file = fs::File::create(&temp_path).await?;
        debug!(temp_path = %temp_path.display(), "Created staging file");
        Ok(StagedFile {
            temp_path,
            file: Some(file),
            size: 0,
            limit,
            committed: false,
        })
    }

    /// Append a chunk, enforcing the size limit.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> AppResult<()> {
        let new_size = self.size + chunk.len() as u64;
        if let Some(limit) = self.limit {
            if new_size > limit {
                return Err(AppError::PayloadTooLarge(format!(
                    "File exceeds maximum upload size of {limit} bytes"
                )));
            }
        }
        let file = self.file.as_mut().ok_or_else(|| {
            AppError::InternalError("write to a finished staging file".to_string())
        })?;
        file.write_all(chunk).await?;
        self.size = new_size;
        Ok(())
    }

    /// Copy everything from `reader` into the staging file.
    pub async fn write_from<R: AsyncRead + Unpin>(&mut self, mut reader: R) -> AppResult<()> {
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                return Ok(());
            }
            self.write_chunk(&buffer[..read]).await?;
        }
    }

    /// Flush and sync the data so a later rename never exposes a partial file.
    pub(crate) async fn finish(&mut self) -> AppResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub(crate) fn mark_committed(&mut self) {
        self.committed = true;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // The tokio file handle closes on its own; the path can go now.
        if let Err(e) = std::fs::remove_file(&self.temp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(temp_path = %self.temp_path.display(), error = %e, "Failed to remove staging file");
            }
        }
    }
}

/// Move `temp` to `target`.
///
/// With `overwrite` the move is a rename, so concurrent writers race only on the
/// final rename and the last one wins. Without it the file is hard-linked into
/// place, which fails atomically if `target` already exists. Where hard links
/// are unavailable an exclusive copy is used instead.
pub(crate) async fn place(temp: &Path, target: &Path, overwrite: bool) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    if overwrite {
        return fs::rename(temp, target).await;
    }

    match fs::hard_link(temp, target).await {
        Ok(()) => {}
        // Filesystems without hard links report one of these.
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
            ) =>
        {
            debug!(target = %target.display(), error = %e, "Hard link unavailable, copying into place");
            copy_new(temp, target).await?;
        }
        Err(e) => return Err(e),
    }
    if let Err(e) = fs::remove_file(temp).await {
        warn!(temp_path = %temp.display(), error = %e, "Failed to remove staging file after link");
    }
    Ok(())
}

/// Copy `temp` to a `target` that must not exist yet.
///
/// Creation is exclusive, so a taken name still fails with `AlreadyExists`. The
/// target is removed again if the copy fails part way.
pub(crate) async fn copy_new(temp: &Path, target: &Path) -> io::Result<()> {
    let mut output = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await?;

    let copied = async {
        let mut input = fs::File::open(temp).await?;
        tokio::io::copy(&mut input, &mut output).await?;
        output.flush().await?;
        output.sync_all().await
    }
    .await;

    if let Err(e) = copied {
        drop(output);
        if let Err(cleanup) = fs::remove_file(target).await {
            warn!(target = %target.display(), error = %cleanup, "Failed to remove partial copy");
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_drop_removes_uncommitted_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut staged = StagedFile::create(temp_dir.path(), None).await.unwrap();
        staged.write_chunk(b"partial").await.unwrap();
        let temp_path = staged.temp_path().to_path_buf();
        assert!(temp_path.exists());

        drop(staged);
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_size_limit_enforced() {
        let temp_dir = TempDir::new().unwrap();
        let mut staged = StagedFile::create(temp_dir.path(), Some(8)).await.unwrap();
        staged.write_chunk(b"12345").await.unwrap();
        let result = staged.write_chunk(b"6789").await;
        assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
        assert_eq!(staged.size(), 5);
    }

    #[tokio::test]
    async fn test_write_from_reader() {
        let temp_dir = TempDir::new().unwrap();
        let mut staged = StagedFile::create(temp_dir.path(), None).await.unwrap();
        staged.write_from(&b"streamed content"[..]).await.unwrap();
        staged.finish().await.unwrap();
        assert_eq!(staged.size(), 16);
        assert_eq!(
            std::fs::read(staged.temp_path()).unwrap(),
            b"streamed content"
        );
    }

    #[tokio::test]
    async fn test_place_without_overwrite_refuses_existing_target() {
        let temp_dir = TempDir::new().unwrap();
        let temp = temp_dir.path().join(".upload.tmp");
        let target = temp_dir.path().join("pkg-1.0.tar.gz");
        std::fs::write(&target, b"original").unwrap();
        std::fs::write(&temp, b"replacement").unwrap();

        let err = place(&temp, &target, false).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&target).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_place_with_overwrite_replaces_target() {
        let temp_dir = TempDir::new().unwrap();
        let temp = temp_dir.path().join(".upload.tmp");
        let target = temp_dir.path().join("pkg-1.0.tar.gz");
        std::fs::write(&target, b"original").unwrap();
        std::fs::write(&temp, b"replacement").unwrap();

        place(&temp, &target, true).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"replacement");
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_copy_new_creates_target() {
        let temp_dir = TempDir::new().unwrap();
        let temp = temp_dir.path().join(".upload.tmp");
        let target = temp_dir.path().join("pkg-1.0.tar.gz");
        std::fs::write(&temp, b"copied").unwrap();

        copy_new(&temp, &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"copied");
    }

    #[tokio::test]
    async fn test_copy_new_refuses_existing_target() {
        let temp_dir = TempDir::new().unwrap();
        let temp = temp_dir.path().join(".upload.tmp");
        let target = temp_dir.path().join("pkg-1.0.tar.gz");
        std::fs::write(&target, b"original").unwrap();
        std::fs::write(&temp, b"replacement").unwrap();

        let err = copy_new(&temp, &target).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&target).unwrap(), b"original");
    }
}
