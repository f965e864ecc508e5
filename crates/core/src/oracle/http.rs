use crate::emotion::{Embedding, FacialScores, SpeechScores};
use crate::oracle::{FaceCrop, FacialOracle, OracleError, SpeechOracle};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const LOG_TARGET: &str = "oracle::http";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client(timeout: Duration) -> Result<Client, OracleError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(OracleError::Http)
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, OracleError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(OracleError::HttpStatus(status.as_u16(), body))
}

/// Posts each clip as `audio/wav` to a model endpoint that answers with a JSON
/// object of label to percentage.
#[derive(Clone)]
pub struct HttpSpeechOracle {
    client: Client,
    endpoint: Url,
}

impl HttpSpeechOracle {
    pub fn new(endpoint: Url) -> Result<Self, OracleError> {
        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT)?,
            endpoint,
        })
    }
}

impl SpeechOracle for HttpSpeechOracle {
    fn infer(&self, clip: PathBuf) -> BoxFuture<'_, Result<SpeechScores, OracleError>> {
        let this = self.clone();
        async move {
            let audio = tokio::fs::read(&clip).await?;
            if audio.is_empty() {
                return Err(OracleError::InvalidInput(format!(
                    "{} is empty",
                    clip.display()
                )));
            }

            tracing::debug!(
                target: LOG_TARGET,
                clip = %clip.display(),
                bytes = audio.len(),
                "sending clip to speech oracle"
            );

            let response = this
                .client
                .post(this.endpoint.clone())
                .header("Content-Type", "audio/wav")
                .body(audio)
                .send()
                .await?;
            let response = error_for_status(response).await?;

            response
                .json::<SpeechScores>()
                .await
                .map_err(|e| OracleError::InvalidResponse(format!("Failed to parse JSON: {e}")))
        }
        .boxed()
    }
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    sequence: &'a [Embedding],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    probabilities: Vec<f32>,
}

/// Facial model server exposing `POST <base>/embed` and `POST <base>/classify`.
#[derive(Clone)]
pub struct HttpFacialOracle {
    client: Client,
    embed_url: Url,
    classify_url: Url,
}

impl HttpFacialOracle {
    pub fn new(base: Url) -> Result<Self, OracleError> {
        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let join = |segment: &str| {
            base.join(segment)
                .map_err(|e| OracleError::InvalidInput(format!("bad facial oracle url: {e}")))
        };
        Ok(Self {
            client: build_client(Duration::from_secs(5))?,
            embed_url: join("embed")?,
            classify_url: join("classify")?,
        })
    }

    pub fn embed_url(&self) -> &Url {
        &self.embed_url
    }

    pub fn classify_url(&self) -> &Url {
        &self.classify_url
    }
}

impl FacialOracle for HttpFacialOracle {
    fn embed(&self, crop: FaceCrop) -> BoxFuture<'_, Result<Embedding, OracleError>> {
        async move {
            crop.validate()?;
            let response = self
                .client
                .post(self.embed_url.clone())
                .json(&crop)
                .send()
                .await?;
            let parsed: EmbedResponse = error_for_status(response)
                .await?
                .json()
                .await
                .map_err(|e| OracleError::InvalidResponse(format!("Failed to parse JSON: {e}")))?;
            Ok(Embedding::new(parsed.embedding)?)
        }
        .boxed()
    }

    fn classify(&self, window: Vec<Embedding>) -> BoxFuture<'_, Result<FacialScores, OracleError>> {
        async move {
            let response = self
                .client
                .post(self.classify_url.clone())
                .json(&ClassifyRequest { sequence: &window })
                .send()
                .await?;
            let parsed: ClassifyResponse = error_for_status(response)
                .await?
                .json()
                .await
                .map_err(|e| OracleError::InvalidResponse(format!("Failed to parse JSON: {e}")))?;
            let probs: [f32; 7] = parsed.probabilities.as_slice().try_into().map_err(|_| {
                OracleError::InvalidResponse(format!(
                    "expected 7 probabilities, got {}",
                    parsed.probabilities.len()
                ))
            })?;
            Ok(FacialScores::from_probabilities(probs))
        }
        .boxed()
    }
}
