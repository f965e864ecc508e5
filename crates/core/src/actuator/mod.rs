mod eyes;
mod mirror;
mod render;
mod server;

pub use eyes::{EyeFrame, EyeShape, Phase, Rgb, RoboEyes, Tick};
pub use mirror::{read_mood, MirrorError, MoodMirror};
pub use render::{EyeRenderer, RenderLoop, TracingRenderer};
pub use server::{ActuatorServer, Message};

use crate::config::EyesConfig;
use crate::emotion::Mood;
use crate::util::StopFlag;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc;

/// Request for the eyes to show `mood`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodChangeEvent {
    pub mood: Mood,
}

/// Handle to a render loop running on its own thread.
pub struct RenderHandle {
    pub events: mpsc::UnboundedSender<MoodChangeEvent>,
    pub thread: JoinHandle<()>,
}

/// Starts the render loop on a dedicated OS thread so frame pacing never
/// competes with the HTTP runtime.
pub fn spawn_render_loop<D>(
    config: EyesConfig,
    renderer: D,
    mirror: Arc<MoodMirror>,
    stop: StopFlag,
) -> std::io::Result<RenderHandle>
where
    D: EyeRenderer + 'static,
{
    let (events, rx) = mpsc::unbounded_channel();
    let frame_interval = config.frame_interval();
    let eyes = RoboEyes::new(config, StdRng::from_os_rng(), Instant::now());
    let render = RenderLoop::new(eyes, renderer, rx, mirror, frame_interval);
    let thread = std::thread::Builder::new()
        .name("robo-eyes".to_owned())
        .spawn(move || render.run(stop))?;
    Ok(RenderHandle { events, thread })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DurationRange;
    use std::time::Duration;

    #[test]
    fn spawned_loop_reverts_mirror_to_neutral() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mirror = Arc::new(MoodMirror::create(dir.path().join("mood.txt")).expect("mirror"));
        let config = EyesConfig {
            fps: 200,
            expression_duration: DurationRange::fixed(Duration::from_millis(100)),
            ..Default::default()
        };
        let stop = StopFlag::new();
        let handle =
            spawn_render_loop(config, TracingRenderer::default(), mirror.clone(), stop.clone())
                .expect("spawn");

        let server = ActuatorServer::new(handle.events.clone(), mirror.clone());
        let (_, msg) = server.request(Mood::Sadness);
        assert_eq!(msg, "Sadness mode activated");

        let deadline = Instant::now() + Duration::from_secs(2);
        while mirror.get() != Mood::Neutral && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(read_mood(mirror.path()).expect("read"), Mood::Neutral);

        stop.stop();
        handle.thread.join().expect("join");
    }
}
