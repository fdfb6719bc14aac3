//! Streaming content digests for dedup.

use std::path::Path;
use std::time::Duration;

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::error::{CuratorError, Result};

const CHUNK_SIZE: usize = 4096;
const MAX_ATTEMPTS: u32 = 3;
const RETRY_GAP: Duration = Duration::from_secs(2);

/// Compute the 128-bit content digest of `path` by streaming reads.
///
/// IO errors are retried up to three times with a two second gap; the last
/// error is surfaced when all attempts fail. An empty file has no usable
/// digest and is rejected.
pub async fn file_digest(path: &Path) -> Result<String> {
    let mut last_err = None;

    for attempt in 1..=MAX_ATTEMPTS {
        match digest_once(path).await {
            Ok(hex) => {
                debug!(path = %path.display(), "digest computed");
                return Ok(hex);
            }
            Err(err @ CuratorError::InvalidMedia(_)) => return Err(err),
            Err(err) => {
                if attempt < MAX_ATTEMPTS {
                    warn!(
                        path = %path.display(),
                        attempt,
                        error = %err,
                        "digest failed, retrying"
                    );
                    tokio::time::sleep(RETRY_GAP).await;
                }
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| CuratorError::Internal("digest attempts exhausted".into())))
}

async fn digest_once(path: &Path) -> Result<String> {
    let meta = tokio::fs::metadata(path).await?;
    if meta.len() == 0 {
        return Err(CuratorError::InvalidMedia(format!(
            "empty file: {}",
            path.display()
        )));
    }

    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    let digest = hasher.finalize();
    Ok(format!("{digest:x}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn digest_of_known_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.mkv");
        std::fs::write(&path, b"hello world").unwrap();

        let digest = file_digest(&path).await.unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[tokio::test]
    async fn digest_is_stable_across_chunking() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.mkv");
        // spans multiple 4 KiB chunks
        std::fs::write(&path, vec![0xABu8; CHUNK_SIZE * 3 + 17]).unwrap();

        let first = file_digest(&path).await.unwrap();
        let second = file_digest(&path).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.mkv");
        std::fs::write(&path, b"").unwrap();

        let err = file_digest(&path).await.unwrap_err();
        assert!(matches!(err, CuratorError::InvalidMedia(_)));
    }
}
