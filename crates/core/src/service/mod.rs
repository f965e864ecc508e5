use crate::inference::{PredictionSlot, SlotReceiver};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

const LOG_TARGET: &str = "service";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_owned(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LatestPrediction {
    pub prediction: Option<PredictionSlot>,
}

/// Read side of the prediction slot. Cloning is cheap; every clone sees the
/// same latest value.
#[derive(Clone, Debug)]
pub struct PredictionService {
    slot: SlotReceiver,
}

impl PredictionService {
    pub fn new(slot: SlotReceiver) -> Self {
        Self { slot }
    }

    pub fn get_latest(&self) -> Option<PredictionSlot> {
        *self.slot.borrow()
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/healthcheck", get(healthcheck))
            .route("/get_latest_prediction", get(latest_prediction))
            .with_state(self)
            .layer(TraceLayer::new_for_http())
    }

    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(target: LOG_TARGET, %addr, "prediction service listening");
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

pub async fn healthcheck() -> Json<HealthStatus> {
    Json(HealthStatus::healthy())
}

async fn latest_prediction(State(service): State<PredictionService>) -> Json<LatestPrediction> {
    Json(LatestPrediction {
        prediction: service.get_latest(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::{EmotionLabel, SpeechScores};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tokio::sync::watch;
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn healthcheck_reports_healthy() {
        let (_tx, rx) = watch::channel(None);
        let (status, body) = get_json(PredictionService::new(rx).router(), "/healthcheck").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn latest_prediction_is_null_before_first_inference() {
        let (_tx, rx) = watch::channel(None);
        let (status, body) =
            get_json(PredictionService::new(rx).router(), "/get_latest_prediction").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"prediction": null}));
    }

    #[tokio::test]
    async fn latest_prediction_tracks_the_slot() {
        let (tx, rx) = watch::channel(None);
        let service = PredictionService::new(rx);

        tx.send_replace(Some(PredictionSlot::from_scores(SpeechScores {
            anger: 60.0,
            neutral: 40.0,
            ..Default::default()
        })));
        tx.send_replace(Some(PredictionSlot::from_scores(SpeechScores {
            happiness: 75.0,
            neutral: 25.0,
            ..Default::default()
        })));

        assert_eq!(
            service.get_latest().map(|s| s.name),
            Some(EmotionLabel::Happiness)
        );
        let (_, body) = get_json(service.router(), "/get_latest_prediction").await;
        assert_eq!(body["prediction"]["name"], "happiness");
        assert_eq!(body["prediction"]["prob"]["happiness"], 75.0);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (_tx, rx) = watch::channel(None);
        let response = PredictionService::new(rx)
            .router()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
