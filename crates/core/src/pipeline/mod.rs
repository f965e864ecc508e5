use crate::capture::{AudioRecorder, CaptureError, CapturePipeline};
use crate::config::CaptureConfig;
use crate::inference::{InferenceWorker, SlotReceiver};
use crate::oracle::SpeechOracle;
use crate::service::PredictionService;
use crate::util::StopFlag;
use tokio::sync::mpsc;

const LOG_TARGET: &str = "pipeline";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("capture: {0}")]
    Capture(#[from] CaptureError),

    #[error("task failed: {0}")]
    Task(String),
}

/// Speech side of the system: recording feeds inference through a clip queue,
/// inference publishes to the slot the prediction service reads.
pub struct SpeechPipeline<R, O> {
    capture: CapturePipeline<R>,
    worker: InferenceWorker<O>,
}

impl<R, O> SpeechPipeline<R, O>
where
    R: AudioRecorder + 'static,
    O: SpeechOracle + 'static,
{
    pub fn new(recorder: R, oracle: O, config: CaptureConfig) -> Self {
        Self {
            capture: CapturePipeline::new(recorder, config),
            worker: InferenceWorker::new(oracle),
        }
    }

    pub fn subscribe(&self) -> SlotReceiver {
        self.worker.subscribe()
    }

    pub fn service(&self) -> PredictionService {
        PredictionService::new(self.subscribe())
    }

    /// Runs capture and inference as two tasks until `stop` is raised.
    pub async fn run(self, stop: StopFlag) -> Result<(), PipelineError> {
        let (clip_tx, clip_rx) = mpsc::unbounded_channel();

        let capture_task = {
            let capture = self.capture;
            let stop = stop.clone();
            tokio::spawn(async move { capture.run(clip_tx, stop).await })
        };

        let inference_task = {
            let worker = self.worker;
            let stop = stop.clone();
            tokio::spawn(async move { worker.run(clip_rx, stop).await })
        };

        let (captured, ()) = tokio::try_join!(capture_task, inference_task)
            .map_err(|e| PipelineError::Task(e.to_string()))?;

        match captured {
            // The worker may exit on the stop flag before the recorder does.
            Err(CaptureError::QueueClosed) if stop.is_stopped() => {}
            other => other?,
        }
        tracing::info!(target: LOG_TARGET, "speech pipeline stopped");
        Ok(())
    }
}
