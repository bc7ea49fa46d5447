//! Cryptographic hashing utilities for package integrity verification

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use digest::Digest;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncReadExt;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hash algorithm used for the `#algo=digest` fragment on download links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgo {
    Sha1,
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgo {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Sha512 => "sha512",
        }
    }

    /// Hash an in-memory buffer, returning lowercase hex.
    pub fn hash_bytes(&self, data: &[u8]) -> String {
        match self {
            HashAlgo::Sha1 => hex_digest::<sha1::Sha1>(data),
            HashAlgo::Sha256 => hex_digest::<sha2::Sha256>(data),
            HashAlgo::Sha512 => hex_digest::<sha2::Sha512>(data),
        }
    }

    /// Hash a file on disk without loading it into memory.
    pub async fn hash_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<String> {
        match self {
            HashAlgo::Sha1 => hash_file_with::<sha1::Sha1>(path.as_ref()).await,
            HashAlgo::Sha256 => hash_file_with::<sha2::Sha256>(path.as_ref()).await,
            HashAlgo::Sha512 => hash_file_with::<sha2::Sha512>(path.as_ref()).await,
        }
    }
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashAlgo::Sha1),
            "sha256" => Ok(HashAlgo::Sha256),
            "sha512" => Ok(HashAlgo::Sha512),
            other => Err(format!(
                "unsupported hash algorithm '{other}' (expected sha1, sha256 or sha512)"
            )),
        }
    }
}

/// A computed file digest, rendered as `algo=hex`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashDigest {
    pub algo: HashAlgo,
    pub hex: String,
}

impl fmt::Display for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.algo, self.hex)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_digest<D: Digest>(data: &[u8]) -> String {
    let mut hasher = D::new();
    hasher.update(data);
    to_hex(&hasher.finalize())
}

async fn hash_file_with<D: Digest>(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(to_hex(&hasher.finalize()))
}
