//! Directory walk that turns the storage root into a list of package files.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};

use super::package::PackageFile;
use crate::error::AppResult;
use crate::filename::parse_filename;

/// Deepest directory nesting the walk descends into.
pub const MAX_SCAN_DEPTH: usize = 10;

/// Diagnostic counters from one walk of the storage root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Package files returned
    pub listed: usize,
    /// Entries that could not be read and were left out
    pub skipped: usize,
    /// Readable files whose names are not distribution filenames
    pub ignored: usize,
}

pub(crate) struct ScanOutcome {
    pub files: Vec<PackageFile>,
    pub stats: ScanStats,
}

/// Dot-prefixed names are never listed; in-flight uploads use them.
pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Walk `root` and collect every parsable distribution file.
///
/// A missing root is an empty catalog. An unreadable root is an error, but an
/// unreadable entry below it is only counted in [`ScanStats::skipped`].
pub(crate) async fn walk(root: &Path) -> AppResult<ScanOutcome> {
    let mut outcome = ScanOutcome {
        files: Vec::new(),
        stats: ScanStats::default(),
    };

    let mut root_entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(root = %root.display(), "Storage root does not exist yet");
            return Ok(outcome);
        }
        Err(e) => return Err(e.into()),
    };

    let mut pending: Vec<(PathBuf, usize)> = Vec::new();
    visit_dir(root, &mut root_entries, 0, &mut pending, &mut outcome).await;

    while let Some((dir, depth)) = pending.pop() {
        match fs::read_dir(&dir).await {
            Ok(mut entries) => visit_dir(root, &mut entries, depth, &mut pending, &mut outcome).await,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                outcome.stats.skipped += 1;
            }
        }
    }

    outcome.stats.listed = outcome.files.len();
    debug!(
        listed = outcome.stats.listed,
        skipped = outcome.stats.skipped,
        ignored = outcome.stats.ignored,
        "Scanned storage root"
    );
    Ok(outcome)
}

async fn visit_dir(
    root: &Path,
    entries: &mut fs::ReadDir,
    depth: usize,
    pending: &mut Vec<(PathBuf, usize)>,
    outcome: &mut ScanOutcome,
) {
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read directory entry");
                outcome.stats.skipped += 1;
                break;
            }
        };

        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!(path = %path.display(), "Skipping entry with non UTF-8 name");
            outcome.stats.skipped += 1;
            continue;
        };
        if is_hidden(&name) {
            continue;
        }
        // Can't be addressed by a download path.
        if name.contains('\\') {
            debug!(path = %path.display(), "Ignoring entry with a backslash in its name");
            outcome.stats.ignored += 1;
            continue;
        }

        // Follows symlinks, so a linked file or directory is treated like its target.
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                outcome.stats.skipped += 1;
                continue;
            }
        };

        if metadata.is_dir() {
            if depth + 1 < MAX_SCAN_DEPTH {
                pending.push((path, depth + 1));
            } else {
                warn!(path = %path.display(), "Directory nested too deeply, not scanned");
                outcome.stats.skipped += 1;
            }
            continue;
        }

        if !metadata.is_file() {
            outcome.stats.ignored += 1;
            continue;
        }

        let Some(relative_path) = relative_unix_path(root, &path) else {
            outcome.stats.skipped += 1;
            continue;
        };

        match parse_filename(&name) {
            Some(parsed) => outcome
                .files
                .push(PackageFile::new(relative_path, path, parsed)),
            None => {
                debug!(path = %relative_path, "Ignoring file that is not a distribution");
                outcome.stats.ignored += 1;
            }
        }
    }
}

/// `path` relative to `root`, joined with `/` on every platform.
pub(crate) fn relative_unix_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}
