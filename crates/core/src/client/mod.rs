use crate::emotion::Mood;
use crate::inference::PredictionSlot;
use crate::service::LatestPrediction;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use std::time::Duration;
use url::Url;

const LOG_TARGET: &str = "client";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {0}: {1}")]
    HttpStatus(u16, String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

fn build_client() -> Result<Client> {
    Ok(Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| ClientError::InvalidUrl(format!("{base} + {path}: {e}")))
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ClientError::HttpStatus(status.as_u16(), body))
}

pub trait PredictionSource: Send + Sync {
    fn fetch_latest(&self) -> BoxFuture<'_, Result<Option<PredictionSlot>>>;
}

pub trait MoodSink: Send + Sync {
    fn send_mood(&self, mood: Mood) -> BoxFuture<'_, Result<String>>;
}

#[derive(Clone, Debug)]
pub struct PredictionClient {
    client: Client,
    latest_url: Url,
}

impl PredictionClient {
    pub fn new(base: &Url) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            latest_url: join(base, "/get_latest_prediction")?,
        })
    }

    pub fn latest_url(&self) -> &Url {
        &self.latest_url
    }

    pub async fn fetch_latest(&self) -> Result<Option<PredictionSlot>> {
        let response = self.client.get(self.latest_url.clone()).send().await?;
        let body: LatestPrediction = error_for_status(response).await?.json().await?;
        tracing::trace!(
            target: LOG_TARGET,
            present = body.prediction.is_some(),
            "fetched latest prediction"
        );
        Ok(body.prediction)
    }
}

impl PredictionSource for PredictionClient {
    fn fetch_latest(&self) -> BoxFuture<'_, Result<Option<PredictionSlot>>> {
        PredictionClient::fetch_latest(self).boxed()
    }
}

#[derive(Clone, Debug)]
pub struct MoodClient {
    client: Client,
    base: Url,
}

impl MoodClient {
    pub fn new(base: Url) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base,
        })
    }

    pub fn set_status_url(&self, mood: Mood) -> Result<Url> {
        let mut url = join(&self.base, "/set_status")?;
        url.query_pairs_mut().append_pair("mood", mood.as_str());
        Ok(url)
    }

    /// Returns the actuator's reply text.
    pub async fn set_status(&self, mood: Mood) -> Result<String> {
        let url = self.set_status_url(mood)?;
        let response = self.client.get(url).send().await?;
        let text = error_for_status(response).await?.text().await?;
        tracing::debug!(target: LOG_TARGET, %mood, reply = %text, "mood request sent");
        Ok(text)
    }
}

impl MoodSink for MoodClient {
    fn send_mood(&self, mood: Mood) -> BoxFuture<'_, Result<String>> {
        self.set_status(mood).boxed()
    }
}
