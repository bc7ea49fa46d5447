use std::path::PathBuf;

use crate::filename::{DistributionKind, ParsedFilename};
use crate::hash_utils::HashDigest;
use crate::version::Version;

/// One stored distribution file.
#[derive(Debug, Clone)]
pub struct PackageFile {
    /// Path below the storage root, always `/`-separated
    pub relative_path: String,
    /// Absolute path on disk
    pub path: PathBuf,
    pub filename: String,
    /// Normalized project name
    pub project: String,
    pub version: Version,
    pub kind: DistributionKind,
    pub signature: bool,
    /// Content digest, when it has been computed
    pub digest: Option<HashDigest>,
}

impl PackageFile {
    pub(crate) fn new(relative_path: String, path: PathBuf, parsed: ParsedFilename) -> Self {
        let filename = relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&relative_path)
            .to_string();
        PackageFile {
            relative_path,
            path,
            filename,
            project: parsed.project,
            version: parsed.version,
            kind: parsed.kind,
            signature: parsed.signature,
            digest: None,
        }
    }

    /// `relative_path#algo=hex`, or just the relative path without a digest.
    pub fn fname_and_hash(&self) -> String {
        match &self.digest {
            Some(digest) => format!("{}#{}", self.relative_path, digest),
            None => self.relative_path.clone(),
        }
    }

    /// Absolute URL path used for download links on index pages.
    ///
    /// Each path segment is percent-encoded so that names containing `#`, `?`
    /// or spaces still resolve to this file.
    pub fn download_href(&self) -> String {
        let encoded: Vec<String> = self
            .relative_path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        match &self.digest {
            Some(digest) => format!("/packages/{}#{}", encoded.join("/"), digest),
            None => format!("/packages/{}", encoded.join("/")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filename::parse_filename;
    use crate::hash_utils::HashAlgo;

    fn package(relative_path: &str) -> PackageFile {
        let parsed = parse_filename(relative_path).unwrap();
        PackageFile::new(
            relative_path.to_string(),
            PathBuf::from("/srv").join(relative_path),
            parsed,
        )
    }

    #[test]
    fn test_filename_is_last_component() {
        let pkg = package("team/pkg-1.0.tar.gz");
        assert_eq!(pkg.filename, "pkg-1.0.tar.gz");
        assert_eq!(pkg.project, "pkg");
    }

    #[test]
    fn test_download_href_with_and_without_digest() {
        let mut pkg = package("pkg-1.0.tar.gz");
        assert_eq!(pkg.download_href(), "/packages/pkg-1.0.tar.gz");

        pkg.digest = Some(HashDigest {
            algo: HashAlgo::Sha256,
            hex: "deadbeef".to_string(),
        });
        assert_eq!(pkg.fname_and_hash(), "pkg-1.0.tar.gz#sha256=deadbeef");
        assert_eq!(
            pkg.download_href(),
            "/packages/pkg-1.0.tar.gz#sha256=deadbeef"
        );
    }

    #[test]
    fn test_download_href_encodes_segments() {
        let pkg = package("team#1/my dir/pkg-1.0+local.tar.gz");
        assert_eq!(
            pkg.download_href(),
            "/packages/team%231/my%20dir/pkg-1.0%2Blocal.tar.gz"
        );
    }
}
