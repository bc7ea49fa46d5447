//! # Distribution Filename Parsing
//!
//! Extracts the project name and version from a distribution filename. Files
//! that don't follow a recognized naming convention are not packages as far as
//! the index is concerned and never show up in a listing.
//!
//! ## Recognized Conventions
//!
//! - Wheels: `{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl`
//! - Source and built archives: `{name}-{version}.{tar.gz,tgz,tar.bz2,tar.xz,tar,zip}`
//! - Eggs: `{name}-{version}(-py{X.Y}(-{platform})?)?.egg`
//!
//! A trailing `.asc` marks a detached signature and is ignored while parsing,
//! so `pkg-1.0.tar.gz.asc` belongs to the same project and version as
//! `pkg-1.0.tar.gz`.

use std::sync::OnceLock;

use regex::Regex;

use crate::normalize_project_name;
use crate::version::Version;

/// Suffix of a detached signature file.
pub const SIGNATURE_SUFFIX: &str = ".asc";

// Checked in order: ".tar" must come after the compressed tarball suffixes.
const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar.bz2", ".tar.xz", ".zip", ".tar"];

/// Kind of distribution a filename describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionKind {
    Wheel,
    Sdist,
    Egg,
}

/// Result of parsing a distribution filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    /// Normalized project name
    pub project: String,
    pub version: Version,
    pub kind: DistributionKind,
    /// Whether the filename is a detached `.asc` signature
    pub signature: bool,
}

fn project_name_regex() -> &'static Regex {
    static NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    NAME_REGEX.get_or_init(|| {
        Regex::new(r"(?i)^([a-z0-9]|[a-z0-9][a-z0-9._-]*[a-z0-9])$").unwrap_or_else(|e| {
            panic!("Failed to compile project name regex: {e}. This is a bug in the code - the regex pattern should be valid.")
        })
    })
}

fn egg_tag_regex() -> &'static Regex {
    static EGG_TAG_REGEX: OnceLock<Regex> = OnceLock::new();
    EGG_TAG_REGEX.get_or_init(|| {
        Regex::new(r"(?i)-py[0-9]+(\.[0-9]+)*(-.+)?$").unwrap_or_else(|e| {
            panic!("Failed to compile egg tag regex: {e}. This is a bug in the code - the regex pattern should be valid.")
        })
    })
}

/// Parse a distribution filename into its project name and version.
///
/// Only the last path component is considered. Returns `None` when the name
/// doesn't match any known convention or the version isn't valid PEP 440.
///
/// # Examples
///
/// ```
/// # use pypi_server::filename::parse_filename;
/// let parsed = parse_filename("Django_REST-3.14.0-py3-none-any.whl").unwrap();
/// assert_eq!(parsed.project, "django-rest");
/// assert_eq!(parsed.version.to_string(), "3.14.0");
///
/// assert!(parse_filename("README.md").is_none());
/// ```
pub fn parse_filename(filename: &str) -> Option<ParsedFilename> {
    let basename = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let (basename, signature) = match strip_suffix_ignore_case(basename, SIGNATURE_SUFFIX) {
        Some(stripped) => (stripped, true),
        None => (basename, false),
    };

    let (name, version, kind) = if let Some(stem) = strip_suffix_ignore_case(basename, ".whl") {
        let (name, version) = split_wheel(stem)?;
        (name, version, DistributionKind::Wheel)
    } else if let Some(stem) = strip_suffix_ignore_case(basename, ".egg") {
        let stem = egg_tag_regex().replace(stem, "");
        let (name, version) = split_name_version(&stem)?;
        (name.to_string(), version, DistributionKind::Egg)
    } else {
        let stem = ARCHIVE_SUFFIXES
            .iter()
            .find_map(|suffix| strip_suffix_ignore_case(basename, suffix))?;
        let (name, version) = split_name_version(stem)?;
        (name.to_string(), version, DistributionKind::Sdist)
    };

    Some(ParsedFilename {
        project: normalize_project_name(&name),
        version,
        kind,
        signature,
    })
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    if s.len() < suffix.len() || !s.is_char_boundary(s.len() - suffix.len()) {
        return None;
    }
    let (head, tail) = s.split_at(s.len() - suffix.len());
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}

/// Wheel names escape `-` in the project name, so the first two dash-separated
/// fields are always the name and version.
fn split_wheel(stem: &str) -> Option<(String, Version)> {
    let parts: Vec<&str> = stem.split('-').collect();
    if !(5..=6).contains(&parts.len()) {
        return None;
    }
    if parts.iter().any(|part| part.is_empty()) {
        return None;
    }
    if !project_name_regex().is_match(parts[0]) {
        return None;
    }
    let version = Version::parse(parts[1]).ok()?;
    Some((parts[0].to_string(), version))
}

/// Split `{name}-{version}` at the first dash whose remainder is a valid version.
fn split_name_version(stem: &str) -> Option<(&str, Version)> {
    stem.match_indices('-').find_map(|(idx, _)| {
        let (name, rest) = (&stem[..idx], &stem[idx + 1..]);
        let starts_like_version = rest.starts_with(|c: char| c.is_ascii_digit())
            || (rest.starts_with(['v', 'V'])
                && rest[1..].starts_with(|c: char| c.is_ascii_digit()));
        if !starts_like_version || !project_name_regex().is_match(name) {
            return None;
        }
        Version::parse(rest).ok().map(|version| (name, version))
    })
}
