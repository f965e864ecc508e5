use crate::capture::AudioClip;
use crate::emotion::{EmotionLabel, SpeechScores};
use crate::oracle::SpeechOracle;
use crate::util::StopFlag;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const LOG_TARGET: &str = "inference";
const QUEUE_POLL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionSlot {
    pub name: EmotionLabel,
    pub prob: SpeechScores,
}

impl PredictionSlot {
    pub fn from_scores(prob: SpeechScores) -> Self {
        Self {
            name: prob.dominant(),
            prob,
        }
    }
}

pub type SlotReceiver = watch::Receiver<Option<PredictionSlot>>;

/// Drains the clip queue through the speech oracle. Each successful result
/// replaces the published slot wholesale; readers only ever see the latest one.
pub struct InferenceWorker<O> {
    oracle: O,
    slot: watch::Sender<Option<PredictionSlot>>,
}

impl<O: SpeechOracle> InferenceWorker<O> {
    pub fn new(oracle: O) -> Self {
        let (slot, _) = watch::channel(None);
        Self { oracle, slot }
    }

    pub fn subscribe(&self) -> SlotReceiver {
        self.slot.subscribe()
    }

    pub fn latest(&self) -> Option<PredictionSlot> {
        *self.slot.borrow()
    }

    /// Runs the oracle on one clip and deletes the clip afterwards whatever the
    /// outcome. A failed inference leaves the published slot as it was.
    pub async fn process(&self, clip: AudioClip) -> Option<PredictionSlot> {
        let result = self.oracle.infer(clip.path.clone()).await;
        remove_clip(&clip.path).await;

        match result {
            Ok(scores) => {
                let slot = PredictionSlot::from_scores(scores);
                tracing::info!(
                    target: LOG_TARGET,
                    sequence = clip.sequence,
                    emotion = %slot.name,
                    "speech emotion predicted"
                );
                self.slot.send_replace(Some(slot));
                Some(slot)
            }
            Err(e) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    sequence = clip.sequence,
                    error = %e,
                    "speech inference failed"
                );
                None
            }
        }
    }

    /// Runs until `stop` is raised or every sender is gone. The queue is polled
    /// with a short timeout so a stop request is noticed while idle.
    pub async fn run(&self, mut queue: mpsc::UnboundedReceiver<AudioClip>, stop: StopFlag) {
        while !stop.is_stopped() {
            match tokio::time::timeout(QUEUE_POLL, queue.recv()).await {
                Ok(Some(clip)) => {
                    self.process(clip).await;
                }
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        tracing::info!(target: LOG_TARGET, "inference worker stopped");
    }
}

async fn remove_clip(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            target: LOG_TARGET,
            path = %path.display(),
            error = %e,
            "failed to delete clip"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::OracleError;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::path::PathBuf;
    use std::time::SystemTime;

    /// Reads the clip's text content as a happiness percentage; "fail" errors.
    struct FileOracle;

    impl SpeechOracle for FileOracle {
        fn infer(&self, clip: PathBuf) -> BoxFuture<'_, Result<SpeechScores, OracleError>> {
            async move {
                let text = tokio::fs::read_to_string(&clip).await?;
                let happiness: f32 = text
                    .trim()
                    .parse()
                    .map_err(|_| OracleError::InvalidResponse(text.clone()))?;
                Ok(SpeechScores {
                    happiness,
                    neutral: 100.0 - happiness,
                    ..Default::default()
                })
            }
            .boxed()
        }
    }

    fn clip(dir: &Path, sequence: u64, content: &str) -> AudioClip {
        let path = dir.join(format!("clip_{sequence}.wav"));
        std::fs::write(&path, content).expect("write clip");
        AudioClip {
            sequence,
            path,
            created_at: SystemTime::now(),
        }
    }

    #[test]
    fn slot_serializes_as_name_and_prob() {
        let slot = PredictionSlot::from_scores(SpeechScores {
            sadness: 55.0,
            neutral: 45.0,
            ..Default::default()
        });
        let json = serde_json::to_value(slot).expect("json");
        assert_eq!(json["name"], "sadness");
        assert_eq!(json["prob"]["sadness"], 55.0);
    }

    #[tokio::test]
    async fn slot_holds_only_the_latest_result() {
        let dir = tempfile::tempdir().expect("tempdir");
        let worker = InferenceWorker::new(FileOracle);
        let rx = worker.subscribe();
        assert_eq!(*rx.borrow(), None);

        let (tx, queue) = mpsc::unbounded_channel();
        for (i, pct) in [10.0, 80.0, 30.0, 70.0].iter().enumerate() {
            tx.send(clip(dir.path(), i as u64, &pct.to_string()))
                .expect("send");
        }
        drop(tx);
        worker.run(queue, StopFlag::new()).await;

        let latest = worker.latest().expect("prediction");
        assert_eq!(latest.prob.happiness, 70.0);
        assert_eq!(latest.name, EmotionLabel::Happiness);
        assert_eq!(*rx.borrow(), Some(latest));
    }

    #[tokio::test]
    async fn failure_keeps_previous_slot_and_still_deletes_clip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let worker = InferenceWorker::new(FileOracle);

        let good = clip(dir.path(), 1, "90");
        let good_path = good.path.clone();
        assert!(worker.process(good).await.is_some());
        assert!(!good_path.exists());

        let bad = clip(dir.path(), 2, "fail");
        let bad_path = bad.path.clone();
        assert!(worker.process(bad).await.is_none());
        assert!(!bad_path.exists());

        assert_eq!(worker.latest().map(|s| s.prob.happiness), Some(90.0));
    }

    #[tokio::test]
    async fn already_deleted_clip_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let worker = InferenceWorker::new(FileOracle);
        let gone = AudioClip {
            sequence: 1,
            path: dir.path().join("pruned.wav"),
            created_at: SystemTime::now(),
        };
        assert!(worker.process(gone).await.is_none());
        assert_eq!(worker.latest(), None);
    }

    #[tokio::test]
    async fn stop_flag_ends_an_idle_worker() {
        let worker = InferenceWorker::new(FileOracle);
        let (_tx, queue) = mpsc::unbounded_channel();
        let stop = StopFlag::new();
        stop.stop();
        tokio::time::timeout(Duration::from_secs(2), worker.run(queue, stop))
            .await
            .expect("worker returns");
    }
}
