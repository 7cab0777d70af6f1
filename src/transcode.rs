//! Parallel opus transcoding via an external codec process, gated by a
//! semaphore bounding how many `ffmpeg` subprocesses run concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// A hung codec process must not hold its semaphore permit forever; this
/// caps a single clip's transcode regardless of clip length.
const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec process exited with status {0}")]
    CodecFailed(String),
    #[error("codec process timed out after {0:?}")]
    Timeout(Duration),
}

/// Bounds concurrent transcode subprocesses to `TRANSCODE_PARALLELISM`.
#[derive(Clone)]
pub struct CodecPool {
    semaphore: Arc<Semaphore>,
    bitrate: String,
}

impl CodecPool {
    pub fn new(parallelism: usize, bitrate: String) -> Self {
        CodecPool {
            semaphore: Arc::new(Semaphore::new(parallelism.max(1))),
            bitrate,
        }
    }

    /// Transcodes `source` to `{stem}.opus` in the same directory, deleting
    /// `source` on success. Returns the opus path.
    pub async fn transcode_clip(&self, source: &Path) -> Result<PathBuf, TranscodeError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore closed");

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "clip".to_string());
        let dest = source.with_file_name(format!("{}.opus", stem));

        debug!(source = %source.display(), dest = %dest.display(), "transcoding clip");

        let status = tokio::time::timeout(
            TRANSCODE_TIMEOUT,
            Command::new("ffmpeg")
                .arg("-y")
                .arg("-i")
                .arg(source)
                .arg("-c:a")
                .arg("libopus")
                .arg("-b:a")
                .arg(&self.bitrate)
                .arg(&dest)
                .status(),
        )
        .await
        .map_err(|_| TranscodeError::Timeout(TRANSCODE_TIMEOUT))??;

        if !status.success() {
            return Err(TranscodeError::CodecFailed(status.to_string()));
        }

        if let Err(e) = tokio::fs::remove_file(source).await {
            warn!(source = %source.display(), error = %e, "failed to remove source clip after transcode");
        }

        Ok(dest)
    }
}

/// Best-effort duration probe via `ffprobe`; failures are non-fatal and
/// simply leave `duration_seconds` unset. Not gated by `CodecPool`'s
/// semaphore: it runs after transcoding, against the already-produced opus
/// file, and is much cheaper than the transcode itself.
pub async fn probe_duration_seconds(opus_path: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(opus_path)
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8(output.stdout)
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_pool_defaults_to_at_least_one_permit() {
        let pool = CodecPool::new(0, "32k".to_string());
        assert_eq!(pool.semaphore.available_permits(), 1);
    }
}
