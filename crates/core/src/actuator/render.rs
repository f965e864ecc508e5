use crate::actuator::eyes::{EyeFrame, EyeShape, RoboEyes};
use crate::actuator::mirror::MoodMirror;
use crate::actuator::MoodChangeEvent;
use crate::emotion::Mood;
use crate::util::StopFlag;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const LOG_TARGET: &str = "actuator::render";

/// Draws frames. Implementations own whatever output surface they need.
pub trait EyeRenderer: Send {
    fn draw(&mut self, frame: &EyeFrame);
}

/// Logs a line whenever the drawn mood or eye shape changes.
#[derive(Debug, Default)]
pub struct TracingRenderer {
    last: Option<(Mood, EyeShape)>,
}

impl EyeRenderer for TracingRenderer {
    fn draw(&mut self, frame: &EyeFrame) {
        let key = (frame.mood, frame.shape);
        if self.last == Some(key) {
            return;
        }
        self.last = Some(key);
        tracing::debug!(
            target: LOG_TARGET,
            mood = %frame.mood,
            shape = ?frame.shape,
            phase = ?frame.phase,
            left_x = frame.left.0,
            radius = frame.radius,
            "eyes changed"
        );
    }
}

/// Owns the eyes and is the only consumer of mood change events.
pub struct RenderLoop<R, D> {
    eyes: RoboEyes<R>,
    renderer: D,
    events: mpsc::UnboundedReceiver<MoodChangeEvent>,
    mirror: Arc<MoodMirror>,
    frame_interval: Duration,
}

impl<R: Rng, D: EyeRenderer> RenderLoop<R, D> {
    pub fn new(
        eyes: RoboEyes<R>,
        renderer: D,
        events: mpsc::UnboundedReceiver<MoodChangeEvent>,
        mirror: Arc<MoodMirror>,
        frame_interval: Duration,
    ) -> Self {
        Self {
            eyes,
            renderer,
            events,
            mirror,
            frame_interval,
        }
    }

    pub fn eyes(&self) -> &RoboEyes<R> {
        &self.eyes
    }

    /// One frame: take at most one pending event (none while a blink is in
    /// progress), advance timers, draw.
    pub fn tick(&mut self, now: Instant) -> EyeFrame {
        if !self.eyes.is_blinking() {
            if let Ok(event) = self.events.try_recv() {
                self.handle(event, now);
            }
        }

        let tick = self.eyes.tick(now);
        if tick.reverted {
            tracing::info!(target: LOG_TARGET, "expression finished, back to neutral");
            self.mirror(Mood::Neutral);
        }
        self.renderer.draw(&tick.frame);
        tick.frame
    }

    fn handle(&mut self, event: MoodChangeEvent, now: Instant) {
        if self.eyes.express(event.mood, now) {
            tracing::info!(target: LOG_TARGET, mood = %event.mood, "expression started");
        } else {
            tracing::debug!(
                target: LOG_TARGET,
                requested = %event.mood,
                showing = %self.eyes.mood(),
                "mood event ignored"
            );
        }
        // The file follows what is on screen, whatever was requested.
        self.mirror(self.eyes.mood());
    }

    fn mirror(&self, mood: Mood) {
        if let Err(e) = self.mirror.set(mood) {
            tracing::warn!(target: LOG_TARGET, error = %e, %mood, "failed to mirror mood");
        }
    }

    /// Ticks at the frame rate until `stop` is raised.
    pub fn run(mut self, stop: StopFlag) {
        tracing::info!(
            target: LOG_TARGET,
            frame_ms = self.frame_interval.as_millis() as u64,
            "render loop started"
        );
        while !stop.is_stopped() {
            let started = Instant::now();
            self.tick(started);
            std::thread::sleep(self.frame_interval.saturating_sub(started.elapsed()));
        }
        tracing::info!(target: LOG_TARGET, "render loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::mirror::read_mood;
    use crate::config::{DurationRange, EyesConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingRenderer(Arc<Mutex<Vec<EyeFrame>>>);

    impl EyeRenderer for RecordingRenderer {
        fn draw(&mut self, frame: &EyeFrame) {
            self.0.lock().expect("lock").push(*frame);
        }
    }

    fn fixed(ms: u64) -> DurationRange {
        DurationRange::fixed(Duration::from_millis(ms))
    }

    struct Harness {
        render: RenderLoop<StdRng, RecordingRenderer>,
        events: mpsc::UnboundedSender<MoodChangeEvent>,
        mirror: Arc<MoodMirror>,
        frames: RecordingRenderer,
        _dir: tempfile::TempDir,
    }

    fn harness(t0: Instant) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EyesConfig {
            expression_duration: fixed(4_000),
            blink_interval: fixed(3_000),
            blink_duration: fixed(200),
            ..Default::default()
        };
        let mirror = Arc::new(MoodMirror::create(dir.path().join("mood.txt")).expect("mirror"));
        let (tx, rx) = mpsc::unbounded_channel();
        let frames = RecordingRenderer::default();
        let eyes = RoboEyes::new(config, StdRng::seed_from_u64(3), t0);
        Harness {
            render: RenderLoop::new(eyes, frames.clone(), rx, mirror.clone(), Duration::from_millis(20)),
            events: tx,
            mirror,
            frames,
            _dir: dir,
        }
    }

    #[test]
    fn happiness_reverts_to_neutral_after_duration_and_mirror_follows() {
        let t0 = Instant::now();
        let mut h = harness(t0);
        h.mirror.set(Mood::Happiness).expect("set");
        h.events
            .send(MoodChangeEvent {
                mood: Mood::Happiness,
            })
            .expect("send");

        assert_eq!(h.render.tick(t0).mood, Mood::Happiness);
        assert_eq!(h.render.tick(t0 + Duration::from_millis(3_999)).mood, Mood::Happiness);
        assert_eq!(read_mood(h.mirror.path()).expect("read"), Mood::Happiness);

        assert_eq!(h.render.tick(t0 + Duration::from_secs(4)).mood, Mood::Neutral);
        assert_eq!(read_mood(h.mirror.path()).expect("read"), Mood::Neutral);
        assert_eq!(h.frames.0.lock().expect("lock").len(), 3);
    }

    #[test]
    fn event_during_expression_is_consumed_and_mirror_keeps_shown_mood() {
        let t0 = Instant::now();
        let mut h = harness(t0);
        h.events.send(MoodChangeEvent { mood: Mood::Sadness }).expect("send");
        h.render.tick(t0);

        h.mirror.set(Mood::Happiness).expect("set");
        h.events
            .send(MoodChangeEvent {
                mood: Mood::Happiness,
            })
            .expect("send");
        assert_eq!(h.render.tick(t0 + Duration::from_secs(1)).mood, Mood::Sadness);
        assert_eq!(h.mirror.get(), Mood::Sadness);

        // Consumed: nothing left to start once the sadness ends.
        h.render.tick(t0 + Duration::from_secs(4));
        assert_eq!(h.render.tick(t0 + Duration::from_millis(4_020)).mood, Mood::Neutral);
    }

    #[test]
    fn queue_is_not_drained_while_blinking() {
        let t0 = Instant::now();
        let mut h = harness(t0);
        h.render.tick(t0 + Duration::from_secs(3));
        assert!(h.render.eyes().is_blinking());

        h.events
            .send(MoodChangeEvent {
                mood: Mood::Happiness,
            })
            .expect("send");
        assert_eq!(h.render.tick(t0 + Duration::from_millis(3_100)).mood, Mood::Neutral);

        // Blink ends at 3.2 s; the next tick after that picks the event up.
        h.render.tick(t0 + Duration::from_millis(3_200));
        assert_eq!(h.render.tick(t0 + Duration::from_millis(3_220)).mood, Mood::Happiness);
    }

    #[test]
    fn run_returns_once_stopped() {
        let t0 = Instant::now();
        let h = harness(t0);
        let stop = StopFlag::new();
        let handle = {
            let stop = stop.clone();
            std::thread::spawn(move || h.render.run(stop))
        };
        std::thread::sleep(Duration::from_millis(50));
        stop.stop();
        handle.join().expect("render thread");
    }
}
