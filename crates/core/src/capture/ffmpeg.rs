use crate::capture::{AudioRecorder, CaptureError, Result};
use crate::config::CaptureConfig;
use ffmpeg_sidecar::{download, paths::ffmpeg_path};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::PathBuf;
use std::time::Duration;

const LOG_TARGET: &str = "capture::ffmpeg";
const SAMPLE_RATE: &str = "16000";
const CHANNELS: &str = "2";
// Grace on top of the clip length before the recorder is killed.
const STALL_GRACE: Duration = Duration::from_secs(5);

/// Records from the system microphone through an ffmpeg child process.
#[derive(Clone, Debug)]
pub struct FfmpegRecorder {
    input_format: String,
    device: String,
}

impl FfmpegRecorder {
    pub fn new(input_format: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            input_format: input_format.into(),
            device: device.into(),
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.input_format.clone(), config.device.clone())
    }

    /// Fetches the ffmpeg binary if it is not on disk yet. Call once at startup.
    pub fn ensure_ffmpeg_available() -> Result<()> {
        download::auto_download().map_err(|e| CaptureError::RecorderUnavailable(e.to_string()))
    }

    fn args(&self, path: &std::path::Path, duration: Duration) -> Vec<String> {
        vec![
            "-hide_banner".to_owned(),
            "-nostdin".to_owned(),
            "-loglevel".to_owned(),
            "error".to_owned(),
            "-y".to_owned(),
            "-f".to_owned(),
            self.input_format.clone(),
            "-i".to_owned(),
            self.device.clone(),
            "-t".to_owned(),
            format!("{:.3}", duration.as_secs_f64()),
            "-ar".to_owned(),
            SAMPLE_RATE.to_owned(),
            "-ac".to_owned(),
            CHANNELS.to_owned(),
            path.display().to_string(),
        ]
    }
}

impl AudioRecorder for FfmpegRecorder {
    fn record(&self, path: PathBuf, duration: Duration) -> BoxFuture<'_, Result<()>> {
        async move {
            let child = tokio::process::Command::new(ffmpeg_path())
                .args(self.args(&path, duration))
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| CaptureError::RecorderUnavailable(e.to_string()))?;

            // Dropping the child on timeout kills it.
            let output = tokio::time::timeout(duration + STALL_GRACE, child.wait_with_output())
                .await
                .map_err(|_| {
                    CaptureError::RecordingFailed(format!(
                        "ffmpeg did not finish within {:?}",
                        duration + STALL_GRACE
                    ))
                })?
                .map_err(|e| CaptureError::RecordingFailed(e.to_string()))?;

            if !output.status.success() {
                let stderr_s = String::from_utf8_lossy(&output.stderr).trim().to_owned();
                return Err(CaptureError::RecordingFailed(format!(
                    "exit_code={:?} stderr={stderr_s}",
                    output.status.code()
                )));
            }

            tracing::trace!(
                target: LOG_TARGET,
                path = %path.display(),
                device = %self.device,
                "ffmpeg recording finished"
            );
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_request_16k_stereo_for_the_clip_length() {
        let rec = FfmpegRecorder::new("alsa", "default");
        let args = rec.args(std::path::Path::new("/tmp/a.wav"), Duration::from_millis(5_000));
        let joined = args.join(" ");
        assert!(joined.contains("-f alsa -i default"));
        assert!(joined.contains("-t 5.000"));
        assert!(joined.contains("-ar 16000 -ac 2"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/a.wav"));
    }

    #[test]
    fn from_config_uses_device_settings() {
        let cfg = CaptureConfig {
            input_format: "avfoundation".to_owned(),
            device: ":1".to_owned(),
            ..Default::default()
        };
        let rec = FfmpegRecorder::from_config(&cfg);
        assert_eq!(rec.device, ":1");
        assert_eq!(rec.input_format, "avfoundation");
    }
}
