#[cfg(feature = "ffmpeg-sidecar")]
mod ffmpeg;

#[cfg(feature = "ffmpeg-sidecar")]
pub use ffmpeg::FfmpegRecorder;

use crate::config::CaptureConfig;
use crate::util::StopFlag;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

const LOG_TARGET: &str = "capture";
const CLIP_PREFIX: &str = "recorded_audio_";
const CLIP_EXT: &str = ".wav";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioClip {
    pub sequence: u64,
    pub path: PathBuf,
    pub created_at: SystemTime,
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("recorder unavailable: {0}")]
    RecorderUnavailable(String),

    #[error("recording failed: {0}")]
    RecordingFailed(String),

    #[error("recorder produced no file at {0}")]
    MissingOutput(PathBuf),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("clip queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, CaptureError>;

pub trait AudioRecorder: Send + Sync {
    fn record(&self, path: PathBuf, duration: Duration) -> BoxFuture<'_, Result<()>>;
}

/// `recorded_audio_<unix-millis>_<seq>.wav`. Zero padding keeps lexical order
/// equal to creation order.
pub fn clip_file_name(created_at: SystemTime, sequence: u64) -> String {
    let millis = created_at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{CLIP_PREFIX}{millis:013}_{sequence:06}{CLIP_EXT}")
}

fn is_clip_name(name: &str) -> bool {
    name.starts_with(CLIP_PREFIX) && name.ends_with(CLIP_EXT)
}

/// Deletes all but the newest `retention` clips in `dir`. Returns how many were removed.
pub async fn prune_clips(dir: &Path, retention: usize) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut clips = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if is_clip_name(name) {
                clips.push((name.to_owned(), entry.path()));
            }
        }
    }
    if clips.len() <= retention {
        return Ok(0);
    }

    clips.sort_by(|a, b| a.0.cmp(&b.0));
    let excess = clips.len() - retention;
    let mut removed = 0;
    for (_, path) in clips.into_iter().take(excess) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            // The inference worker may have deleted it already.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

/// Records fixed-length clips back to back and hands them to the inference queue.
pub struct CapturePipeline<R> {
    recorder: R,
    config: CaptureConfig,
}

impl<R: AudioRecorder> CapturePipeline<R> {
    pub fn new(recorder: R, config: CaptureConfig) -> Self {
        Self { recorder, config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub async fn capture_once(&self, sequence: u64) -> Result<AudioClip> {
        tokio::fs::create_dir_all(&self.config.dir).await?;
        let created_at = SystemTime::now();
        let path = self.config.dir.join(clip_file_name(created_at, sequence));

        self.recorder
            .record(path.clone(), self.config.clip_duration)
            .await?;

        if !tokio::fs::try_exists(&path).await? {
            return Err(CaptureError::MissingOutput(path));
        }
        Ok(AudioClip {
            sequence,
            path,
            created_at,
        })
    }

    /// Runs until `stop` is raised or the queue's receiver is gone. A failed
    /// recording is logged and retried after `retry_delay`.
    pub async fn run(&self, queue: mpsc::UnboundedSender<AudioClip>, stop: StopFlag) -> Result<()> {
        let mut sequence = 0u64;
        while !stop.is_stopped() {
            sequence += 1;
            let clip = match self.capture_once(sequence).await {
                Ok(clip) => clip,
                Err(e) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        error = %e,
                        sequence,
                        "recording failed"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                    continue;
                }
            };

            tracing::debug!(
                target: LOG_TARGET,
                sequence,
                path = %clip.path.display(),
                "clip recorded"
            );
            let sent = queue.send(clip);

            if let Err(e) = prune_clips(&self.config.dir, self.config.retention).await {
                tracing::warn!(target: LOG_TARGET, error = %e, "clip pruning failed");
            }
            sent.map_err(|_| CaptureError::QueueClosed)?;
        }
        tracing::info!(target: LOG_TARGET, "capture stopped");
        Ok(())
    }
}
