//! Content-addressed on-disk cache for synthesized speech.
//!
//! Files are named after a SHA-256 of `language|region|text` and are never
//! invalidated; delete the directory to refresh voices. Concurrent writers of
//! the same key race harmlessly: each writes to a private temp file and renames
//! it into place, so readers only ever see a complete payload.

use crate::error::{BuildError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stable key for one piece of speech.
pub fn cache_key(language: &str, region: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{language}|{region}|{text}").as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Handle to the cache directory. The directory is created lazily on first write.
#[derive(Debug, Clone)]
pub struct SpeechCache {
    dir: PathBuf,
}

impl SpeechCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SpeechCache { dir: dir.into() }
    }

    /// Per-user cache location, falling back to `./tts_cache`.
    pub fn user_default() -> Self {
        let dir = dirs::cache_dir()
            .map(|d| d.join("countdown-builder").join("tts"))
            .unwrap_or_else(|| PathBuf::from("tts_cache"));
        SpeechCache::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{key}.{extension}"))
    }

    /// Return the cached bytes for `key`, or run `compute` and store its result.
    pub fn get_or_compute<F>(&self, key: &str, extension: &str, compute: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let path = self.path_for(key, extension);
        match fs::read(&path) {
            Ok(bytes) => {
                debug!(key, "speech cache hit");
                return Ok(bytes);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(cache_err(&path, e)),
        }

        debug!(key, "speech cache miss");
        let bytes = compute()?;
        self.store(&path, &bytes)?;
        Ok(bytes)
    }

    fn store(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| cache_err(&self.dir, e))?;
        let tmp = path.with_extension(format!("{}.tmp", fastrand::u64(..)));
        fs::write(&tmp, bytes).map_err(|e| cache_err(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            cache_err(path, e)
        })
    }
}

fn cache_err(path: &Path, source: std::io::Error) -> BuildError {
    BuildError::Cache {
        path: path.to_path_buf(),
        source,
    }
}
