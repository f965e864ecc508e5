use crate::util::RingBuffer;
use serde::{Deserialize, Serialize};

pub const EMBEDDING_DIM: usize = 512;
pub const WINDOW_LEN: usize = 10;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("embedding must have {expected} values, got {0}", expected = EMBEDDING_DIM)]
pub struct EmbeddingDimError(pub usize);

/// Per-frame face feature vector produced by the facial backbone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingDimError> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingDimError(values.len()));
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = EmbeddingDimError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(e: Embedding) -> Self {
        e.0
    }
}

/// The last [`WINDOW_LEN`] embeddings fed to the sequence classifier. The first
/// embedding seeds every slot so the classifier sees a full sequence from frame one.
#[derive(Clone, Debug)]
pub struct FeatureWindow {
    frames: RingBuffer<Embedding>,
}

impl FeatureWindow {
    pub fn new() -> Self {
        Self {
            frames: RingBuffer::new(WINDOW_LEN),
        }
    }

    pub fn push(&mut self, embedding: Embedding) {
        if self.frames.is_empty() {
            self.frames.fill(embedding);
        } else {
            self.frames.push(embedding);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.frames.is_full()
    }

    /// Oldest first.
    pub fn sequence(&self) -> Vec<Embedding> {
        self.frames.iter().cloned().collect()
    }
}

impl Default for FeatureWindow {
    fn default() -> Self {
        Self::new()
    }
}
