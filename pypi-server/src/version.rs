//! # Package Versions
//!
//! PEP 440 version parsing and ordering. Distribution filenames carry a version
//! string; the catalog sorts a project's files by the [`Version`] parsed from
//! that string so that the newest release is listed last.
//!
//! Parsing is lenient in the same places pip is: a leading `v`, mixed case,
//! alternate pre-release spellings (`alpha`, `beta`, `c`, `pre`, `preview`),
//! `-`/`_`/`.` separators and implicit post-release numbers (`1.0-1`) are all
//! accepted and normalized.
//!
//! ## Ordering
//!
//! ```text
//! 1.0.dev1 < 1.0a1.dev1 < 1.0a1 < 1.0b2 < 1.0rc1 < 1.0 == 1.0.0 < 1.0+local < 1.0.post1.dev1 < 1.0.post1 < 1.1
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

/// Errors produced when a string is not a valid PEP 440 version.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    #[error("invalid version: {0}")]
    Invalid(String),

    #[error("version number out of range: {0}")]
    Overflow(String),
}

/// Pre-release phase. Variant order is the comparison order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    Alpha(u64),
    Beta(u64),
    Rc(u64),
}

impl fmt::Display for PreRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreRelease::Alpha(n) => write!(f, "a{n}"),
            PreRelease::Beta(n) => write!(f, "b{n}"),
            PreRelease::Rc(n) => write!(f, "rc{n}"),
        }
    }
}

/// One dot-separated part of a local version label.
///
/// Alphanumeric segments sort before numeric ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocalSegment {
    Text(String),
    Number(u64),
}

impl fmt::Display for LocalSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalSegment::Text(s) => f.write_str(s),
            LocalSegment::Number(n) => write!(f, "{n}"),
        }
    }
}

/// A parsed PEP 440 version.
///
/// Equality follows the ordering, so `1.0` and `1.0.0` compare equal even though
/// they display differently.
#[derive(Debug, Clone)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<PreRelease>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Option<Vec<LocalSegment>>,
}

// Comparison key slots. Variant order encodes where a missing component sorts.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PreKey {
    DevOnly,
    Pre(PreRelease),
    Final,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum DevKey {
    Dev(u64),
    None,
}

fn version_regex() -> &'static Regex {
    static VERSION_REGEX: OnceLock<Regex> = OnceLock::new();
    VERSION_REGEX.get_or_init(|| {
        Regex::new(
            r"(?xi)
            ^\s*v?
            (?:(?P<epoch>[0-9]+)!)?
            (?P<release>[0-9]+(?:\.[0-9]+)*)
            (?P<pre>
                [-_.]?
                (?P<pre_l>alpha|beta|preview|pre|rc|a|b|c)
                [-_.]?
                (?P<pre_n>[0-9]+)?
            )?
            (?P<post>
                (?:-(?P<post_n1>[0-9]+))
                |
                (?:[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>[0-9]+)?)
            )?
            (?P<dev>
                [-_.]?
                dev
                [-_.]?
                (?P<dev_n>[0-9]+)?
            )?
            (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
            \s*$",
        )
        .unwrap_or_else(|e| {
            panic!("Failed to compile PEP 440 version regex: {e}. This is a bug in the code - the regex pattern should be valid.")
        })
    })
}

fn parse_number(digits: &str, input: &str) -> Result<u64, VersionParseError> {
    digits
        .parse::<u64>()
        .map_err(|_| VersionParseError::Overflow(input.to_string()))
}

impl Version {
    /// Parse a version string.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let caps = version_regex()
            .captures(input)
            .ok_or_else(|| VersionParseError::Invalid(input.to_string()))?;

        let epoch = match caps.name("epoch") {
            Some(m) => parse_number(m.as_str(), input)?,
            None => 0,
        };

        let release = caps
            .name("release")
            .map(|m| m.as_str())
            .unwrap_or_default()
            .split('.')
            .map(|part| parse_number(part, input))
            .collect::<Result<Vec<_>, _>>()?;

        let pre = match caps.name("pre_l") {
            Some(label) => {
                let n = match caps.name("pre_n") {
                    Some(m) => parse_number(m.as_str(), input)?,
                    None => 0,
                };
                Some(match label.as_str().to_ascii_lowercase().as_str() {
                    "a" | "alpha" => PreRelease::Alpha(n),
                    "b" | "beta" => PreRelease::Beta(n),
                    _ => PreRelease::Rc(n),
                })
            }
            None => None,
        };

        let post = if caps.name("post").is_some() {
            let digits = caps.name("post_n1").or_else(|| caps.name("post_n2"));
            Some(match digits {
                Some(m) => parse_number(m.as_str(), input)?,
                None => 0,
            })
        } else {
            None
        };

        let dev = if caps.name("dev").is_some() {
            Some(match caps.name("dev_n") {
                Some(m) => parse_number(m.as_str(), input)?,
                None => 0,
            })
        } else {
            None
        };

        let local = caps.name("local").map(|m| {
            m.as_str()
                .split(['-', '_', '.'])
                .map(|segment| match segment.parse::<u64>() {
                    Ok(n) => LocalSegment::Number(n),
                    Err(_) => LocalSegment::Text(segment.to_ascii_lowercase()),
                })
                .collect()
        });

        Ok(Version {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn pre(&self) -> Option<PreRelease> {
        self.pre
    }

    pub fn post(&self) -> Option<u64> {
        self.post
    }

    pub fn dev(&self) -> Option<u64> {
        self.dev
    }

    /// True for pre-releases and development releases.
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    pub fn is_postrelease(&self) -> bool {
        self.post.is_some()
    }

    /// Release segments with trailing zeros removed, so `1.0` and `1.0.0` compare equal.
    fn trimmed_release(&self) -> &[u64] {
        let end = self
            .release
            .iter()
            .rposition(|&n| n != 0)
            .map_or(0, |pos| pos + 1);
        &self.release[..end]
    }

    fn pre_key(&self) -> PreKey {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => PreKey::DevOnly,
            (Some(pre), _, _) => PreKey::Pre(pre),
            (None, _, _) => PreKey::Final,
        }
    }

    fn dev_key(&self) -> DevKey {
        match self.dev {
            Some(n) => DevKey::Dev(n),
            None => DevKey::None,
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.trimmed_release().cmp(other.trimmed_release()))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
            .then_with(|| self.local.cmp(&other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

/// Canonical (normalized) form, e.g. `V1.0-Alpha.2` displays as `1.0a2`.
impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        f.write_str(&release.join("."))?;
        if let Some(pre) = self.pre {
            write!(f, "{pre}")?;
        }
        if let Some(post) = self.post {
            write!(f, ".post{post}")?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{dev}")?;
        }
        if let Some(local) = &self.local {
            let parts: Vec<String> = local.iter().map(ToString::to_string).collect();
            write!(f, "+{}", parts.join("."))?;
        }
        Ok(())
    }
}
