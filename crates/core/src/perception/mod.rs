use crate::actuator::read_mood;
use crate::client::{ClientError, MoodSink, PredictionSource};
use crate::emotion::{
    fuse, EmotionLabel, FacialScores, FeatureWindow, FusionDecision, Mood, MoodTrigger,
    SpeechScores,
};
use crate::inference::PredictionSlot;
use crate::oracle::{FaceCrop, FacialOracle, OracleError};
use crate::rate_limit::RateLimiter;
use crate::util::{Clock, StopFlag, SystemClock};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "perception";

/// Owner name the speech poll registers with its limiter.
pub const SER_POLL_OWNER: &str = "ser";

#[derive(thiserror::Error, Debug)]
pub enum PerceptionError {
    #[error("frame source: {0}")]
    Source(String),

    #[error("facial oracle: {0}")]
    Oracle(#[from] OracleError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Face(FaceCrop),
    NoFace,
}

pub trait FrameSource: Send {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Frame>, PerceptionError>>;
}

/// Reads frames as JSON lines: a face crop object, or `null` for no face.
pub struct LineFrameSource<R> {
    lines: Lines<R>,
}

pub type StdinFrameSource = LineFrameSource<BufReader<tokio::io::Stdin>>;

impl StdinFrameSource {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> LineFrameSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: AsyncBufRead + Unpin + Send> FrameSource for LineFrameSource<R> {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Frame>, PerceptionError>> {
        async move {
            loop {
                let line = self
                    .lines
                    .next_line()
                    .await
                    .map_err(|e| PerceptionError::Source(e.to_string()))?;
                let Some(line) = line else {
                    return Ok(None);
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Option<FaceCrop>>(line) {
                    Ok(crop) => return Ok(Some(crop.map_or(Frame::NoFace, Frame::Face))),
                    Err(e) => {
                        tracing::warn!(target: LOG_TARGET, error = %e, "skipping malformed frame");
                    }
                }
            }
        }
        .boxed()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub facial: Option<EmotionLabel>,
    pub next_poll_in: Duration,
    pub decision: Option<FusionDecision>,
    pub requested: Option<Mood>,
}

pub struct PerceptionLoop<F, P, M, C: Clock = SystemClock> {
    facial: F,
    predictions: Arc<P>,
    moods: Arc<M>,
    window: FeatureWindow,
    poll_limiter: RateLimiter<C>,
    trigger: MoodTrigger<C>,
    mood_file: Option<PathBuf>,
    speech: Option<PredictionSlot>,
    pending_poll: Option<JoinHandle<Result<Option<PredictionSlot>, ClientError>>>,
}

impl<F, P, M, C> PerceptionLoop<F, P, M, C>
where
    F: FacialOracle,
    P: PredictionSource + 'static,
    M: MoodSink + 'static,
    C: Clock,
{
    pub fn new(
        facial: F,
        predictions: P,
        moods: M,
        poll_limiter: RateLimiter<C>,
        trigger: MoodTrigger<C>,
        mood_file: Option<PathBuf>,
    ) -> Self {
        Self {
            facial,
            predictions: Arc::new(predictions),
            moods: Arc::new(moods),
            window: FeatureWindow::new(),
            poll_limiter,
            trigger,
            mood_file,
            speech: None,
            pending_poll: None,
        }
    }

    pub fn speech(&self) -> Option<PredictionSlot> {
        self.speech
    }

    pub fn has_pending_poll(&self) -> bool {
        self.pending_poll.is_some()
    }

    /// Picks up a finished speech poll. Never waits on one still in flight.
    pub async fn collect_poll(&mut self) {
        if !self.pending_poll.as_ref().is_some_and(|h| h.is_finished()) {
            return;
        }
        let Some(handle) = self.pending_poll.take() else {
            return;
        };
        match handle.await {
            Ok(Ok(Some(slot))) => {
                tracing::debug!(target: LOG_TARGET, emotion = %slot.name, "speech prediction updated");
                self.speech = Some(slot);
            }
            Ok(Ok(None)) => {
                tracing::trace!(target: LOG_TARGET, "no speech prediction yet");
            }
            Ok(Err(e)) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "speech poll failed");
            }
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "speech poll task failed");
            }
        }
    }

    fn maybe_start_poll(&mut self) {
        if self.pending_poll.is_some() || !self.poll_limiter.acquire(SER_POLL_OWNER) {
            return;
        }
        let predictions = Arc::clone(&self.predictions);
        self.pending_poll = Some(tokio::spawn(async move {
            predictions.fetch_latest().await
        }));
    }

    fn observed_mood(&self) -> Option<Mood> {
        let path = self.mood_file.as_ref()?;
        match read_mood(path) {
            Ok(mood) => Some(mood),
            Err(e) => {
                tracing::debug!(target: LOG_TARGET, error = %e, "mood file unreadable");
                None
            }
        }
    }

    fn dispatch(&self, mood: Mood) {
        let moods = Arc::clone(&self.moods);
        tokio::spawn(async move {
            if let Err(e) = moods.send_mood(mood).await {
                tracing::warn!(target: LOG_TARGET, error = %e, %mood, "mood request failed");
            }
        });
    }

    /// Handles one frame. A facial oracle failure is returned; the loop keeps
    /// its window and speech state.
    pub async fn process_frame(&mut self, frame: Frame) -> Result<FrameReport, PerceptionError> {
        self.collect_poll().await;
        self.maybe_start_poll();
        let next_poll_in = self.poll_limiter.time_until_next_request(SER_POLL_OWNER);

        let crop = match frame {
            Frame::Face(crop) => crop,
            Frame::NoFace => {
                return Ok(FrameReport {
                    facial: None,
                    next_poll_in,
                    decision: None,
                    requested: None,
                })
            }
        };

        let embedding = self.facial.embed(crop).await?;
        self.window.push(embedding);
        let facial: FacialScores = self.facial.classify(self.window.sequence()).await?;

        let speech: SpeechScores = self.speech.map(|s| s.prob).unwrap_or_default();
        let decision = fuse(&speech, &facial);
        let requested = self.trigger.evaluate(&decision, self.observed_mood());
        if let Some(mood) = requested {
            tracing::info!(
                target: LOG_TARGET,
                %mood,
                score = decision.score,
                "requesting mood change"
            );
            self.dispatch(mood);
        }

        Ok(FrameReport {
            facial: Some(facial.dominant().0),
            next_poll_in,
            decision: Some(decision),
            requested,
        })
    }

    /// Processes frames until the source ends or `stop` is raised.
    pub async fn run<S: FrameSource>(&mut self, source: &mut S, stop: StopFlag) -> Result<(), PerceptionError> {
        let mut frames = 0u64;
        while !stop.is_stopped() {
            let Some(frame) = source.next_frame().await? else {
                break;
            };
            frames += 1;
            match self.process_frame(frame).await {
                Ok(report) => tracing::trace!(
                    target: LOG_TARGET,
                    frame = frames,
                    facial = ?report.facial,
                    next_poll_ms = report.next_poll_in.as_millis() as u64,
                    "frame processed"
                ),
                Err(e) => tracing::warn!(target: LOG_TARGET, error = %e, frame = frames, "frame failed"),
            }
        }
        tracing::info!(target: LOG_TARGET, frames, "perception stopped");
        Ok(())
    }
}
