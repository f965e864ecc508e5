use crate::actuator::mirror::MoodMirror;
use crate::actuator::MoodChangeEvent;
use crate::emotion::Mood;
use crate::service::healthcheck;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

const LOG_TARGET: &str = "actuator::server";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub message: String,
}

impl Message {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SetStatusQuery {
    mood: Option<String>,
}

/// HTTP face of the actuator. Shares the mirror with the render loop and
/// feeds it events.
#[derive(Clone, Debug)]
pub struct ActuatorServer {
    events: mpsc::UnboundedSender<MoodChangeEvent>,
    mirror: Arc<MoodMirror>,
}

impl ActuatorServer {
    pub fn new(events: mpsc::UnboundedSender<MoodChangeEvent>, mirror: Arc<MoodMirror>) -> Self {
        Self { events, mirror }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/set_status", get(set_status))
            .route("/healthcheck", get(healthcheck))
            .with_state(self)
            .layer(TraceLayer::new_for_http())
    }

    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(target: LOG_TARGET, %addr, "actuator listening");
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }

    /// Applies a request against the mirrored mood. The file is written before
    /// the event is queued so the render loop always sees the request's value
    /// when it reconciles.
    pub fn request(&self, mood: Mood) -> (StatusCode, String) {
        if self.events.is_closed() && self.mirror.get() != mood {
            return unavailable();
        }
        let previous = match self.mirror.replace_if_different(mood) {
            Ok(Some(previous)) => previous,
            Ok(None) => return (StatusCode::OK, "Mood is already active".to_owned()),
            Err(e) => {
                tracing::error!(target: LOG_TARGET, error = %e, %mood, "failed to write mood file");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to record mood".to_owned(),
                );
            }
        };
        if self.events.send(MoodChangeEvent { mood }).is_err() {
            if let Err(e) = self.mirror.set(previous) {
                tracing::warn!(target: LOG_TARGET, error = %e, "failed to restore mood file");
            }
            return unavailable();
        }
        tracing::info!(target: LOG_TARGET, from = %previous, to = %mood, "mood change requested");
        (StatusCode::OK, format!("{} mode activated", mood.title()))
    }
}

fn unavailable() -> (StatusCode, String) {
    tracing::warn!(target: LOG_TARGET, "render loop is gone");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "Mood actuator unavailable".to_owned(),
    )
}

async fn set_status(
    State(server): State<ActuatorServer>,
    Query(query): Query<SetStatusQuery>,
) -> (StatusCode, Json<Message>) {
    let raw = query.mood.unwrap_or_default();
    let mood = match raw.parse::<Mood>() {
        Ok(mood) => mood,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Message::new(format!("Unsupported mood: {raw}")),
            )
        }
    };
    let (status, text) = server.request(mood);
    (status, Message::new(text))
}
