//! Boundaries to the emotion models. The models themselves run elsewhere; these
//! traits are all the coordination layer knows about them.

mod http;

use crate::emotion::{Embedding, EmbeddingDimError, FacialScores, SpeechScores};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use http::{HttpFacialOracle, HttpSpeechOracle};

#[derive(thiserror::Error, Debug)]
pub enum OracleError {
    #[error("clip unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http error {0}: {1}")]
    HttpStatus(u16, String),

    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingDimError),
}

/// A cropped face, RGB, row-major.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceCrop {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl FaceCrop {
    pub fn validate(&self) -> Result<(), OracleError> {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|n| n.checked_mul(3))
            .ok_or_else(|| {
                OracleError::InvalidInput(format!("{}x{} crop is too large", self.width, self.height))
            })?;
        if self.width == 0 || self.height == 0 || self.pixels.len() != expected {
            return Err(OracleError::InvalidInput(format!(
                "{}x{} crop needs {expected} bytes, got {}",
                self.width,
                self.height,
                self.pixels.len()
            )));
        }
        Ok(())
    }
}

/// Speech emotion recognition over a recorded clip. Returns percentages.
pub trait SpeechOracle: Send + Sync {
    fn infer(&self, clip: PathBuf) -> BoxFuture<'_, Result<SpeechScores, OracleError>>;
}

/// Facial emotion recognition: a per-crop backbone and a sequence classifier
/// over the sliding window of embeddings.
pub trait FacialOracle: Send + Sync {
    fn embed(&self, crop: FaceCrop) -> BoxFuture<'_, Result<Embedding, OracleError>>;

    fn classify(&self, window: Vec<Embedding>) -> BoxFuture<'_, Result<FacialScores, OracleError>>;
}
