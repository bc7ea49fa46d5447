//! # Package Catalog
//!
//! The catalog owns the storage root. Every read and write of package files goes
//! through it; handlers never touch the filesystem directly.
//!
//! There is no separate index file: the directory tree *is* the index, and each
//! query walks it again. Only file digests are cached (when enabled), keyed by
//! path, size and modification time so that a replaced file is always rehashed.
//!
//! ## Consistency
//!
//! - Readers take no locks over the tree. Uploads are spooled to hidden temp
//!   files and moved into place atomically, so a listing sees either the old
//!   file, the new file, or nothing, never a partial write.
//! - With overwrite disabled a new file is hard-linked into place, which fails if
//!   the name is taken even when two uploads race for it.
//! - One unreadable entry never fails a listing; it is skipped and counted in
//!   [`ScanStats`].

mod package;
mod scan;
mod store;

pub use package::PackageFile;
pub use scan::{ScanStats, MAX_SCAN_DEPTH};
pub use store::StagedFile;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use tokio::fs;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::filename::parse_filename;
use crate::hash_utils::{HashAlgo, HashDigest};
use crate::normalize_project_name;

#[derive(Debug, Clone)]
struct CachedDigest {
    len: u64,
    modified: Option<SystemTime>,
    hex: String,
}

/// Catalog of the distribution files below one storage root.
#[derive(Debug)]
pub struct Catalog {
    root: PathBuf,
    hash_algo: HashAlgo,
    overwrite: bool,
    upload_limit: Option<u64>,
    digests: Option<RwLock<HashMap<PathBuf, CachedDigest>>>,
    last_scan: Mutex<ScanStats>,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Catalog {
            root: root.into(),
            hash_algo: HashAlgo::default(),
            overwrite: false,
            upload_limit: None,
            digests: Some(RwLock::new(HashMap::new())),
            last_scan: Mutex::new(ScanStats::default()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Catalog::new(config.storage.data_dir.clone())
            .with_hash_algo(config.index.hash_algo)
            .with_overwrite(config.storage.overwrite)
            .with_digest_cache(config.storage.enable_cache)
            .with_upload_limit(Some(config.max_upload_size_bytes()))
    }

    pub fn with_hash_algo(mut self, hash_algo: HashAlgo) -> Self {
        self.hash_algo = hash_algo;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_digest_cache(mut self, enabled: bool) -> Self {
        self.digests = enabled.then(|| RwLock::new(HashMap::new()));
        self
    }

    pub fn with_upload_limit(mut self, limit: Option<u64>) -> Self {
        self.upload_limit = limit;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn hash_algo(&self) -> HashAlgo {
        self.hash_algo
    }

    /// Counters from the most recent listing.
    pub fn last_scan(&self) -> ScanStats {
        self.last_scan
            .lock()
            .map(|stats| *stats)
            .unwrap_or_default()
    }

    fn record_scan(&self, stats: ScanStats) {
        if let Ok(mut last) = self.last_scan.lock() {
            *last = stats;
        }
        if stats.skipped > 0 {
            warn!(skipped = stats.skipped, "Some entries were left out of the listing");
        }
    }

    async fn scan(&self) -> AppResult<(Vec<PackageFile>, ScanStats)> {
        let outcome = scan::walk(&self.root).await?;
        Ok((outcome.files, outcome.stats))
    }

    /// Every distinct normalized project name with at least one stored file.
    pub async fn list_projects(&self) -> AppResult<BTreeSet<String>> {
        let (files, stats) = self.scan().await?;
        self.record_scan(stats);
        Ok(files.into_iter().map(|file| file.project).collect())
    }

    /// A project's files in ascending `(version, relative_path)` order, with digests.
    ///
    /// Files that cannot be read for hashing are left out and counted as skipped.
    pub async fn list_packages(&self, project: &str) -> AppResult<Vec<PackageFile>> {
        let project = normalize_project_name(project);
        let (files, mut stats) = self.scan().await?;
        self.prune_digests(&files);

        let mut packages = Vec::new();
        for mut file in files.into_iter().filter(|file| file.project == project) {
            match self.digest(&file.path).await {
                Ok(digest) => {
                    file.digest = Some(digest);
                    packages.push(file);
                }
                Err(e) => {
                    warn!(path = %file.relative_path, error = %e, "Skipping unreadable package file");
                    stats.skipped += 1;
                    stats.listed = stats.listed.saturating_sub(1);
                }
            }
        }

        packages.sort_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
        self.record_scan(stats);
        debug!(project = %project, count = packages.len(), "Listed project packages");
        Ok(packages)
    }

    /// Every stored package file, ordered by project, version and path. No digests.
    pub async fn list_all(&self) -> AppResult<Vec<PackageFile>> {
        let (mut files, stats) = self.scan().await?;
        files.sort_by(|a, b| {
            a.project
                .cmp(&b.project)
                .then_with(|| a.version.cmp(&b.version))
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
        self.record_scan(stats);
        Ok(files)
    }

    /// Look up a stored file by its exact relative path.
    ///
    /// Anything after a `#` is a hash fragment and is ignored. The path is resolved
    /// directly instead of walking the tree, using the same visibility rules as a
    /// listing: no hidden components, no traversal, bounded depth, and the file
    /// name must parse as a distribution.
    pub async fn find_by_relative_path(&self, path: &str) -> AppResult<Option<PackageFile>> {
        let path = strip_hash_fragment(path);
        let Some(components) = visible_components(path) else {
            debug!(path = %path, "Rejected download path");
            return Ok(None);
        };
        let Some(parsed) = components.last().and_then(|name| parse_filename(name)) else {
            return Ok(None);
        };

        let absolute = components
            .iter()
            .fold(self.root.clone(), |acc, part| acc.join(part));
        match fs::metadata(&absolute).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(PackageFile::new(
                components.join("/"),
                absolute,
                parsed,
            ))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                warn!(path = %path, error = %e, "Package file is not accessible");
                Ok(None)
            }
        }
    }

    /// Whether a file of that name exists directly under the storage root.
    pub async fn exists(&self, filename: &str) -> AppResult<bool> {
        ensure_plain_filename(filename)?;
        Ok(fs::try_exists(self.root.join(filename)).await?)
    }

    /// Open a staging file for an incoming upload.
    pub async fn begin_stage(&self) -> AppResult<StagedFile> {
        StagedFile::create(&self.root, self.upload_limit).await
    }

    /// Spool `reader` to a staging file.
    pub async fn stage<R: AsyncRead + Unpin>(&self, reader: R) -> AppResult<StagedFile> {
        let mut staged = self.begin_stage().await?;
        staged.write_from(reader).await?;
        Ok(staged)
    }

    /// Move a staged upload into place as `{root}/{filename}`.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if `filename` is not a distribution filename
    /// - `Conflict` if the file exists and overwriting is disabled
    /// - `Storage` for any I/O failure
    pub async fn commit(&self, mut staged: StagedFile, filename: &str) -> AppResult<PackageFile> {
        ensure_plain_filename(filename)?;
        let parsed = parse_filename(filename)
            .ok_or_else(|| AppError::BadRequest(format!("invalid filename: {filename}")))?;

        staged.finish().await?;
        let target = self.root.join(filename);
        match store::place(staged.temp_path(), &target, self.overwrite).await {
            Ok(()) => staged.mark_committed(),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(AppError::Conflict(format!("already exists: {filename}")));
            }
            Err(e) => return Err(e.into()),
        }

        self.forget_digest(&target);
        info!(filename = %filename, size = staged.size(), "Stored package file");
        Ok(PackageFile::new(filename.to_string(), target, parsed))
    }

    /// Write `reader` to `{root}/{filename}` atomically.
    pub async fn store<R: AsyncRead + Unpin>(
        &self,
        reader: R,
        filename: &str,
    ) -> AppResult<PackageFile> {
        ensure_plain_filename(filename)?;
        if parse_filename(filename).is_none() {
            return Err(AppError::BadRequest(format!("invalid filename: {filename}")));
        }
        if !self.overwrite && self.exists(filename).await? {
            return Err(AppError::Conflict(format!("already exists: {filename}")));
        }

        let staged = self.stage(reader).await?;
        self.commit(staged, filename).await
    }

    /// Delete a stored file. Used to roll back a partially applied upload.
    pub async fn remove(&self, filename: &str) -> AppResult<()> {
        ensure_plain_filename(filename)?;
        let target = self.root.join(filename);
        fs::remove_file(&target).await?;
        self.forget_digest(&target);
        info!(filename = %filename, "Removed package file");
        Ok(())
    }

    async fn digest(&self, path: &Path) -> io::Result<HashDigest> {
        let metadata = fs::metadata(path).await?;
        let len = metadata.len();
        let modified = metadata.modified().ok();

        if let Some(cache) = &self.digests {
            let cached = cache.read().ok().and_then(|map| map.get(path).cloned());
            if let Some(entry) = cached {
                if entry.len == len && entry.modified == modified && modified.is_some() {
                    return Ok(HashDigest {
                        algo: self.hash_algo,
                        hex: entry.hex,
                    });
                }
            }
        }

        let hex = self.hash_algo.hash_file(path).await?;
        if let Some(cache) = &self.digests {
            if let Ok(mut map) = cache.write() {
                map.insert(
                    path.to_path_buf(),
                    CachedDigest {
                        len,
                        modified,
                        hex: hex.clone(),
                    },
                );
            }
        }
        Ok(HashDigest {
            algo: self.hash_algo,
            hex,
        })
    }

    /// Drop cached digests of files that are no longer on disk.
    fn prune_digests(&self, files: &[PackageFile]) {
        if let Some(cache) = &self.digests {
            if let Ok(mut map) = cache.write() {
                let present: HashSet<&Path> = files.iter().map(|file| file.path.as_path()).collect();
                let before = map.len();
                map.retain(|path, _| present.contains(path.as_path()));
                if map.len() < before {
                    debug!(pruned = before - map.len(), "Pruned stale digest cache entries");
                }
            }
        }
    }

    fn forget_digest(&self, path: &Path) {
        if let Some(cache) = &self.digests {
            if let Ok(mut map) = cache.write() {
                map.remove(path);
            }
        }
    }
}

/// Drop a trailing `#algo=digest` suffix from a requested path.
///
/// Only a final fragment of that exact shape is removed, so a `#` that is part
/// of a directory or file name survives.
pub fn strip_hash_fragment(path: &str) -> &str {
    match path.rsplit_once('#') {
        Some((before, fragment)) if is_digest_fragment(fragment) => before,
        _ => path,
    }
}

fn is_digest_fragment(fragment: &str) -> bool {
    fragment.split_once('=').is_some_and(|(algo, hex)| {
        !algo.is_empty()
            && algo.bytes().all(|b| b.is_ascii_alphanumeric())
            && hex.bytes().all(|b| b.is_ascii_hexdigit())
    })
}

fn visible_components(path: &str) -> Option<Vec<&str>> {
    if path.is_empty() || path.contains(['\\', '\0']) {
        return None;
    }
    let components: Vec<&str> = path.split('/').collect();
    let valid = components.len() <= MAX_SCAN_DEPTH
        && components
            .iter()
            .all(|part| !part.is_empty() && !scan::is_hidden(part));
    valid.then_some(components)
}

pub(crate) fn ensure_plain_filename(filename: &str) -> AppResult<()> {
    crate::validate_filename(filename)?;
    if filename.contains(['/', '\\']) || scan::is_hidden(filename) {
        return Err(AppError::BadRequest(format!("invalid filename: {filename}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn catalog(temp_dir: &TempDir) -> Catalog {
        Catalog::new(temp_dir.path())
    }

    fn write(temp_dir: &TempDir, relative: &str, content: &[u8]) {
        let path = temp_dir.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_list_projects_normalizes_names() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "Django_REST-1.0.tar.gz", b"a");
        write(&temp_dir, "django.rest-1.1-py3-none-any.whl", b"b");
        write(&temp_dir, "other-0.1.zip", b"c");
        write(&temp_dir, "notes.txt", b"d");

        let projects = catalog(&temp_dir).list_projects().await.unwrap();
        let projects: Vec<&str> = projects.iter().map(String::as_str).collect();
        assert_eq!(projects, ["django-rest", "other"]);
    }

    #[tokio::test]
    async fn test_list_packages_sorted_by_version_then_path() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "pkg-1.10.0.tar.gz", b"a");
        write(&temp_dir, "pkg-1.2.0.tar.gz", b"b");
        write(&temp_dir, "pkg-1.2.0-py3-none-any.whl", b"c");
        write(&temp_dir, "pkg-1.2.0rc1.tar.gz", b"d");
        write(&temp_dir, "unrelated-9.0.tar.gz", b"e");

        let packages = catalog(&temp_dir).list_packages("PKG").await.unwrap();
        let paths: Vec<&str> = packages.iter().map(|p| p.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            [
                "pkg-1.2.0rc1.tar.gz",
                "pkg-1.2.0-py3-none-any.whl",
                "pkg-1.2.0.tar.gz",
                "pkg-1.10.0.tar.gz",
            ]
        );
    }

    #[tokio::test]
    async fn test_list_packages_attaches_digest() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "pkg-1.0.tar.gz", b"hello world");

        let packages = catalog(&temp_dir).list_packages("pkg").await.unwrap();
        let digest = packages[0].digest.as_ref().unwrap();
        assert_eq!(digest.algo, HashAlgo::Sha256);
        assert_eq!(
            digest.hex,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn test_digest_cache_drops_externally_removed_files() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "pkg-1.0.tar.gz", b"a");
        write(&temp_dir, "pkg-2.0.tar.gz", b"b");
        let catalog = catalog(&temp_dir);
        let cached = |catalog: &Catalog| catalog.digests.as_ref().unwrap().read().unwrap().len();

        catalog.list_packages("pkg").await.unwrap();
        assert_eq!(cached(&catalog), 2);

        std::fs::remove_file(temp_dir.path().join("pkg-1.0.tar.gz")).unwrap();
        let packages = catalog.list_packages("pkg").await.unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(cached(&catalog), 1);
    }

    #[tokio::test]
    async fn test_digest_cache_notices_replaced_file() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir).with_overwrite(true);
        catalog
            .store(&b"first"[..], "pkg-1.0.tar.gz")
            .await
            .unwrap();
        let before = catalog.list_packages("pkg").await.unwrap()[0]
            .digest
            .clone()
            .unwrap();

        catalog
            .store(&b"second version"[..], "pkg-1.0.tar.gz")
            .await
            .unwrap();
        let after = catalog.list_packages("pkg").await.unwrap()[0]
            .digest
            .clone()
            .unwrap();

        assert_ne!(before.hex, after.hex);
        assert_eq!(after.hex, HashAlgo::Sha256.hash_bytes(b"second version"));
    }

    #[tokio::test]
    async fn test_unparsable_files_never_listed() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "pkg-latest.tar.gz", b"a");
        let catalog = catalog(&temp_dir);

        assert!(catalog.list_projects().await.unwrap().is_empty());
        assert!(catalog.list_all().await.unwrap().is_empty());
        assert_eq!(catalog.last_scan().ignored, 1);
    }

    #[test]
    fn test_strip_hash_fragment() {
        assert_eq!(strip_hash_fragment("pkg-1.0.tar.gz#sha256=0a1b"), "pkg-1.0.tar.gz");
        assert_eq!(strip_hash_fragment("pkg-1.0.tar.gz"), "pkg-1.0.tar.gz");
        assert_eq!(strip_hash_fragment("team#1/pkg-1.0.tar.gz"), "team#1/pkg-1.0.tar.gz");
        assert_eq!(
            strip_hash_fragment("team#1/pkg-1.0.tar.gz#md5=ff"),
            "team#1/pkg-1.0.tar.gz"
        );
    }

    #[tokio::test]
    async fn test_find_by_relative_path() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "pkg-1.0.tar.gz", b"a");
        write(&temp_dir, "team/pkg-2.0.tar.gz", b"b");
        write(&temp_dir, ".hidden/pkg-3.0.tar.gz", b"c");
        write(&temp_dir, "notes-1.0.txt", b"d");
        let catalog = catalog(&temp_dir);

        let found = catalog
            .find_by_relative_path("team/pkg-2.0.tar.gz#sha256=abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.relative_path, "team/pkg-2.0.tar.gz");
        assert_eq!(found.version.to_string(), "2.0");

        write(&temp_dir, "team#1/pkg-4.0.tar.gz", b"e");
        for path in ["team#1/pkg-4.0.tar.gz", "team#1/pkg-4.0.tar.gz#sha256=abc"] {
            let found = catalog.find_by_relative_path(path).await.unwrap().unwrap();
            assert_eq!(found.relative_path, "team#1/pkg-4.0.tar.gz");
        }

        for missing in [
            "unknown-1.0.tar.gz",
            "pkg-2.0.tar.gz",
            ".hidden/pkg-3.0.tar.gz",
            "../pkg-1.0.tar.gz",
            "team//pkg-2.0.tar.gz",
            "notes-1.0.txt",
            "team",
            "",
        ] {
            assert!(
                catalog.find_by_relative_path(missing).await.unwrap().is_none(),
                "'{missing}' should not resolve"
            );
        }
    }

    #[tokio::test]
    async fn test_store_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);

        let stored = catalog
            .store(&b"package bytes"[..], "pkg-1.0.0.tar.gz")
            .await
            .unwrap();
        assert_eq!(stored.relative_path, "pkg-1.0.0.tar.gz");
        assert_eq!(stored.project, "pkg");
        assert_eq!(
            std::fs::read(temp_dir.path().join("pkg-1.0.0.tar.gz")).unwrap(),
            b"package bytes"
        );
        assert!(catalog.exists("pkg-1.0.0.tar.gz").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_without_overwrite_conflicts() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "pkg-1.0.0.tar.gz", b"original");
        let catalog = catalog(&temp_dir);

        let result = catalog.store(&b"replacement"[..], "pkg-1.0.0.tar.gz").await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(
            std::fs::read(temp_dir.path().join("pkg-1.0.0.tar.gz")).unwrap(),
            b"original"
        );
    }

    #[tokio::test]
    async fn test_store_rejects_bad_names() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);

        for filename in ["README.md", "../pkg-1.0.tar.gz", "sub/pkg-1.0.tar.gz", ".pkg-1.0.tar.gz"] {
            let result = catalog.store(&b"x"[..], filename).await;
            assert!(
                matches!(result, Err(AppError::BadRequest(_))),
                "'{filename}' should be rejected"
            );
        }
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_staged_file_not_visible_until_commit() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog(&temp_dir);

        let staged = catalog.stage(&b"content"[..]).await.unwrap();
        assert!(catalog.list_all().await.unwrap().is_empty());

        catalog.commit(staged, "pkg-1.0.tar.gz").await.unwrap();
        assert_eq!(catalog.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_stores_of_different_files() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Arc::new(catalog(&temp_dir));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let catalog = Arc::clone(&catalog);
                tokio::spawn(async move {
                    let content = format!("content {i}").into_bytes();
                    catalog
                        .store(&content[..], &format!("pkg-1.0.{i}.tar.gz"))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(catalog.list_packages("pkg").await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_concurrent_stores_of_same_file_never_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Arc::new(catalog(&temp_dir));
        let contents: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 256 * 1024]).collect();

        let handles: Vec<_> = contents
            .iter()
            .cloned()
            .map(|content| {
                let catalog = Arc::clone(&catalog);
                tokio::spawn(async move { catalog.store(&content[..], "pkg-1.0.tar.gz").await })
            })
            .collect();

        let mut stored = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => stored += 1,
                Err(AppError::Conflict(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(stored, 1);

        let on_disk = std::fs::read(temp_dir.path().join("pkg-1.0.tar.gz")).unwrap();
        assert!(contents.contains(&on_disk));
        // No staging files left behind.
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }
}
