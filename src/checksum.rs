//! Checksum Verifier
//!
//! Streaming SHA-256 over artifact files plus `<artifact>.sha256` sidecars.

use crate::error::{AppError, AppResult};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

const CHUNK_SIZE: usize = 8192;
const SIDECAR_EXTENSION: &str = "sha256";

/// Hex SHA-256 of a file, read in fixed-size chunks
pub fn compute(path: &Path) -> AppResult<String> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            AppError::ResourceNotFound(format!("Backup file not found: {}", path.display()))
        }
        _ => AppError::Io(e),
    })?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Sidecar path for an artifact: `x.sql` -> `x.sql.sha256`
pub fn sidecar_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

pub fn is_sidecar(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(SIDECAR_EXTENSION)
}

/// Compute the digest of `artifact` and store it next to it
pub fn write_sidecar(artifact: &Path) -> AppResult<String> {
    let digest = compute(artifact)?;
    let sidecar = sidecar_path(artifact);
    std::fs::write(&sidecar, format!("{}\n", digest))?;
    debug!("Checksum saved: {}", sidecar.display());
    Ok(digest)
}

/// Stored digest, if a sidecar exists. Accepts `sha256sum`-style lines.
pub fn read_sidecar(artifact: &Path) -> AppResult<Option<String>> {
    let sidecar = sidecar_path(artifact);
    if !sidecar.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&sidecar)?;
    Ok(content.split_whitespace().next().map(str::to_lowercase))
}

/// Recompute and compare against `expected`
pub fn verify(artifact: &Path, expected: &str) -> AppResult<()> {
    let actual = compute(artifact)?;
    if actual != expected {
        return Err(AppError::ChecksumMismatch {
            path: artifact.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
