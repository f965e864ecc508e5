mod fusion;
mod window;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use fusion::{fuse, FusionDecision, MoodTrigger};
pub use window::{Embedding, EmbeddingDimError, FeatureWindow, EMBEDDING_DIM, WINDOW_LEN};

/// Every label either perception path can produce. Declaration order is the
/// tie-break priority used by [`EmotionVector::dominant`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Neutral,
    Happiness,
    Sadness,
    Anger,
    Surprise,
    Fear,
    Disgust,
    Frustration,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 8] = [
        EmotionLabel::Neutral,
        EmotionLabel::Happiness,
        EmotionLabel::Sadness,
        EmotionLabel::Anger,
        EmotionLabel::Surprise,
        EmotionLabel::Fear,
        EmotionLabel::Disgust,
        EmotionLabel::Frustration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Happiness => "happiness",
            EmotionLabel::Sadness => "sadness",
            EmotionLabel::Anger => "anger",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Frustration => "frustration",
        }
    }

    pub fn as_mood(self) -> Option<Mood> {
        match self {
            EmotionLabel::Neutral => Some(Mood::Neutral),
            EmotionLabel::Happiness => Some(Mood::Happiness),
            EmotionLabel::Sadness => Some(Mood::Sadness),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown emotion label: {0}")]
pub struct UnknownLabel(pub String);

impl FromStr for EmotionLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmotionLabel::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownLabel(s.to_owned()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    #[default]
    Neutral,
    Happiness,
    Sadness,
}

impl Mood {
    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Neutral => "neutral",
            Mood::Happiness => "happiness",
            Mood::Sadness => "sadness",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Mood::Neutral => "Neutral",
            Mood::Happiness => "Happiness",
            Mood::Sadness => "Sadness",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported mood: {0}")]
pub struct UnsupportedMood(pub String);

impl FromStr for Mood {
    type Err = UnsupportedMood;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<EmotionLabel>()
            .ok()
            .and_then(EmotionLabel::as_mood)
            .ok_or_else(|| UnsupportedMood(s.trim().to_owned()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EmotionVector([f32; 8]);

impl EmotionVector {
    pub fn get(&self, label: EmotionLabel) -> f32 {
        self.0[label.index()]
    }

    pub fn set(&mut self, label: EmotionLabel, score: f32) {
        self.0[label.index()] = score;
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f32)> + '_ {
        EmotionLabel::ALL.into_iter().map(|l| (l, self.get(l)))
    }

    pub fn merge_max(&self, other: &EmotionVector) -> EmotionVector {
        let mut out = EmotionVector::default();
        for label in EmotionLabel::ALL {
            out.set(label, self.get(label).max(other.get(label)));
        }
        out
    }

    /// Arg-max label. Equal scores resolve to the label declared first in
    /// [`EmotionLabel`]; NaN never wins.
    pub fn dominant(&self) -> (EmotionLabel, f32) {
        let mut best = (EmotionLabel::Neutral, f32::NEG_INFINITY);
        for (label, score) in self.iter() {
            if score > best.1 {
                best = (label, score);
            }
        }
        if best.1 == f32::NEG_INFINITY {
            best.1 = 0.0;
        }
        best
    }

    pub(crate) fn mean_of(&self, labels: &[EmotionLabel]) -> f32 {
        if labels.is_empty() {
            return 0.0;
        }
        labels.iter().map(|l| self.get(*l)).sum::<f32>() / labels.len() as f32
    }
}

/// Speech oracle output: percentages for the five measured speech labels.
/// Labels the oracle leaves out read as 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechScores {
    pub neutral: f32,
    pub anger: f32,
    pub happiness: f32,
    pub sadness: f32,
    pub frustration: f32,
}

impl SpeechScores {
    pub const LABELS: [EmotionLabel; 5] = [
        EmotionLabel::Neutral,
        EmotionLabel::Anger,
        EmotionLabel::Happiness,
        EmotionLabel::Sadness,
        EmotionLabel::Frustration,
    ];

    pub fn get(&self, label: EmotionLabel) -> Option<f32> {
        match label {
            EmotionLabel::Neutral => Some(self.neutral),
            EmotionLabel::Anger => Some(self.anger),
            EmotionLabel::Happiness => Some(self.happiness),
            EmotionLabel::Sadness => Some(self.sadness),
            EmotionLabel::Frustration => Some(self.frustration),
            _ => None,
        }
    }

    /// Measured labels only, rescaled from percent to [0, 1].
    pub fn to_unit_vector(&self) -> EmotionVector {
        let mut v = EmotionVector::default();
        for label in Self::LABELS {
            let pct = self.get(label).unwrap_or(0.0);
            v.set(label, (pct / 100.0).clamp(0.0, 1.0));
        }
        v
    }

    pub fn dominant(&self) -> EmotionLabel {
        self.to_unit_vector().dominant().0
    }
}

/// Facial classifier output in the model's class order:
/// neutral, happiness, sadness, surprise, fear, disgust, anger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FacialScores {
    pub neutral: f32,
    pub happiness: f32,
    pub sadness: f32,
    pub surprise: f32,
    pub fear: f32,
    pub disgust: f32,
    pub anger: f32,
}

impl FacialScores {
    pub fn from_probabilities(p: [f32; 7]) -> Self {
        Self {
            neutral: p[0],
            happiness: p[1],
            sadness: p[2],
            surprise: p[3],
            fear: p[4],
            disgust: p[5],
            anger: p[6],
        }
    }

    pub fn to_vector(&self) -> EmotionVector {
        let mut v = EmotionVector::default();
        v.set(EmotionLabel::Neutral, self.neutral);
        v.set(EmotionLabel::Happiness, self.happiness);
        v.set(EmotionLabel::Sadness, self.sadness);
        v.set(EmotionLabel::Surprise, self.surprise);
        v.set(EmotionLabel::Fear, self.fear);
        v.set(EmotionLabel::Disgust, self.disgust);
        v.set(EmotionLabel::Anger, self.anger);
        v
    }

    pub fn dominant(&self) -> (EmotionLabel, f32) {
        self.to_vector().dominant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_parsing_is_case_insensitive() {
        assert_eq!("Happiness".parse::<EmotionLabel>(), Ok(EmotionLabel::Happiness));
        assert_eq!(" fear ".parse::<EmotionLabel>(), Ok(EmotionLabel::Fear));
        assert!("joy".parse::<EmotionLabel>().is_err());
    }

    #[test]
    fn only_three_labels_map_to_a_mood() {
        let moods: Vec<_> = EmotionLabel::ALL
            .into_iter()
            .filter_map(EmotionLabel::as_mood)
            .collect();
        assert_eq!(moods, vec![Mood::Neutral, Mood::Happiness, Mood::Sadness]);
        assert!("anger".parse::<Mood>().is_err());
        assert_eq!("sadness".parse::<Mood>(), Ok(Mood::Sadness));
    }

    #[test]
    fn dominant_ties_resolve_by_declaration_order() {
        let mut v = EmotionVector::default();
        v.set(EmotionLabel::Frustration, 0.4);
        v.set(EmotionLabel::Sadness, 0.4);
        v.set(EmotionLabel::Fear, 0.4);
        assert_eq!(v.dominant(), (EmotionLabel::Sadness, 0.4));

        assert_eq!(EmotionVector::default().dominant().0, EmotionLabel::Neutral);
    }

    #[test]
    fn dominant_skips_nan() {
        let mut v = EmotionVector::default();
        v.set(EmotionLabel::Neutral, f32::NAN);
        v.set(EmotionLabel::Anger, 0.2);
        assert_eq!(v.dominant().0, EmotionLabel::Anger);
    }

    #[test]
    fn speech_scores_accept_partial_maps() {
        let s: SpeechScores =
            serde_json::from_str(r#"{"neutral": 90.0, "anger": 10.0}"#).expect("valid json");
        assert_eq!(s.happiness, 0.0);
        let v = s.to_unit_vector();
        assert!((v.get(EmotionLabel::Neutral) - 0.9).abs() < 1e-6);
        assert_eq!(v.get(EmotionLabel::Surprise), 0.0);
    }

    #[test]
    fn facial_scores_follow_model_class_order() {
        let f = FacialScores::from_probabilities([0.1, 0.2, 0.3, 0.0, 0.0, 0.0, 0.4]);
        assert_eq!(f.sadness, 0.3);
        assert_eq!(f.dominant().0, EmotionLabel::Anger);
    }
}
