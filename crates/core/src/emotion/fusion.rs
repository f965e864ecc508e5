use crate::emotion::{EmotionLabel, EmotionVector, FacialScores, Mood, SpeechScores};
use crate::rate_limit::RateLimiter;
use crate::util::{Clock, SystemClock};

const LOG_TARGET: &str = "emotion::fusion";

/// Owner name used against the debounce limiter.
pub const DEBOUNCE_OWNER: &str = "mood";

use crate::emotion::EmotionLabel::{
    Anger, Disgust, Fear, Frustration, Happiness, Neutral, Sadness, Surprise,
};

const SPEECH_SURPRISE_FROM: [EmotionLabel; 3] = [Happiness, Anger, Frustration];
const SPEECH_FEAR_FROM: [EmotionLabel; 3] = [Sadness, Frustration, Neutral];
const SPEECH_DISGUST_FROM: [EmotionLabel; 3] = [Anger, Sadness, Frustration];
const FACIAL_FRUSTRATION_FROM: [EmotionLabel; 4] = [Anger, Surprise, Sadness, Fear];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FusionDecision {
    pub speech: EmotionVector,
    pub facial: EmotionVector,
    pub merged: EmotionVector,
    pub dominant: EmotionLabel,
    pub score: f32,
}

fn complete_speech(speech: &SpeechScores) -> EmotionVector {
    let mut v = speech.to_unit_vector();
    let surprise = v.mean_of(&SPEECH_SURPRISE_FROM);
    let fear = v.mean_of(&SPEECH_FEAR_FROM);
    let disgust = v.mean_of(&SPEECH_DISGUST_FROM);
    v.set(Surprise, surprise);
    v.set(Fear, fear);
    v.set(Disgust, disgust);
    v
}

fn complete_facial(facial: &FacialScores) -> EmotionVector {
    let mut v = facial.to_vector();
    let frustration = v.mean_of(&FACIAL_FRUSTRATION_FROM);
    v.set(Frustration, frustration);
    v
}

/// Brings both sources into the same eight-label space, keeps the larger score
/// per label and picks the arg-max.
pub fn fuse(speech: &SpeechScores, facial: &FacialScores) -> FusionDecision {
    let speech_v = complete_speech(speech);
    let facial_v = complete_facial(facial);
    let merged = speech_v.merge_max(&facial_v);
    let (dominant, score) = merged.dominant();

    tracing::debug!(
        target: LOG_TARGET,
        speech_dominant = %speech.dominant(),
        facial_dominant = %facial.dominant().0,
        dominant = %dominant,
        score,
        "fused emotion"
    );

    FusionDecision {
        speech: speech_v,
        facial: facial_v,
        merged,
        dominant,
        score,
    }
}

/// Turns fusion decisions into mood requests: only for labels the robot can
/// express, only when they differ from what the actuator shows, and at most once
/// per debounce interval.
#[derive(Debug)]
pub struct MoodTrigger<C: Clock = SystemClock> {
    limiter: RateLimiter<C>,
    last_sent: Option<Mood>,
}

impl<C: Clock> MoodTrigger<C> {
    pub fn new(limiter: RateLimiter<C>) -> Self {
        Self {
            limiter,
            last_sent: None,
        }
    }

    /// `observed` is the actuator's mood as read from its mirror file, when
    /// available. Without it the last requested mood stands in.
    pub fn evaluate(&mut self, decision: &FusionDecision, observed: Option<Mood>) -> Option<Mood> {
        let wanted = decision.dominant.as_mood()?;
        let known = observed.or(self.last_sent).unwrap_or_default();
        if wanted == known {
            return None;
        }
        if !self.limiter.acquire(DEBOUNCE_OWNER) {
            tracing::trace!(
                target: LOG_TARGET,
                mood = %wanted,
                wait_ms = self.limiter.time_until_next_request(DEBOUNCE_OWNER).as_millis() as u64,
                "mood change debounced"
            );
            return None;
        }
        self.last_sent = Some(wanted);
        Some(wanted)
    }

    pub fn last_sent(&self) -> Option<Mood> {
        self.last_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ManualClock;
    use std::time::Duration;

    fn facial(p: [f32; 7]) -> FacialScores {
        FacialScores::from_probabilities(p)
    }

    fn trigger(secs: u64) -> (MoodTrigger<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let limiter =
            RateLimiter::with_clock(Duration::from_secs(secs), clock.clone()).expect("nonzero");
        (MoodTrigger::new(limiter), clock)
    }

    fn decision_for(label: EmotionLabel) -> FusionDecision {
        let mut merged = EmotionVector::default();
        merged.set(label, 1.0);
        FusionDecision {
            speech: EmotionVector::default(),
            facial: EmotionVector::default(),
            merged,
            dominant: label,
            score: 1.0,
        }
    }

    #[test]
    fn facial_happiness_beats_speech_missing_happiness() {
        let speech = SpeechScores {
            neutral: 0.9,
            anger: 0.1,
            ..Default::default()
        };
        let d = fuse(&speech, &facial([0.1, 0.8, 0.05, 0.0, 0.0, 0.0, 0.05]));
        assert_eq!(d.dominant, Happiness);
        assert!((d.score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn speech_labels_are_synthesized_from_fixed_means() {
        let speech = SpeechScores {
            neutral: 30.0,
            anger: 60.0,
            happiness: 0.0,
            sadness: 90.0,
            frustration: 30.0,
        };
        let d = fuse(&speech, &FacialScores::default());
        assert!((d.speech.get(Surprise) - 0.3).abs() < 1e-6);
        assert!((d.speech.get(Fear) - 0.5).abs() < 1e-6);
        assert!((d.speech.get(Disgust) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn facial_frustration_is_mean_of_four() {
        let d = fuse(
            &SpeechScores::default(),
            &facial([0.0, 0.0, 0.2, 0.4, 0.6, 0.0, 0.8]),
        );
        assert!((d.facial.get(Frustration) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn merge_keeps_the_larger_score_per_label() {
        let speech = SpeechScores {
            sadness: 70.0,
            ..Default::default()
        };
        let d = fuse(&speech, &facial([0.2, 0.3, 0.1, 0.0, 0.0, 0.0, 0.4]));
        assert!((d.merged.get(Sadness) - 0.7).abs() < 1e-6);
        assert!((d.merged.get(Anger) - 0.4).abs() < 1e-6);
        assert_eq!(d.dominant, Sadness);
    }

    #[test]
    fn empty_inputs_fall_back_to_neutral() {
        let d = fuse(&SpeechScores::default(), &FacialScores::default());
        assert_eq!(d.dominant, Neutral);
    }

    #[test]
    fn trigger_fires_when_mood_differs() {
        let (mut t, _clock) = trigger(5);
        assert_eq!(t.evaluate(&decision_for(Happiness), None), Some(Mood::Happiness));
        assert_eq!(t.last_sent(), Some(Mood::Happiness));
    }

    #[test]
    fn trigger_ignores_current_mood_and_unexpressible_labels() {
        let (mut t, _clock) = trigger(5);
        assert_eq!(t.evaluate(&decision_for(Neutral), None), None);
        assert_eq!(t.evaluate(&decision_for(Anger), None), None);
        assert_eq!(t.evaluate(&decision_for(Sadness), Some(Mood::Sadness)), None);
    }

    #[test]
    fn trigger_debounces_within_interval() {
        let (mut t, clock) = trigger(5);
        assert_eq!(t.evaluate(&decision_for(Happiness), None), Some(Mood::Happiness));

        clock.advance(Duration::from_secs(1));
        assert_eq!(t.evaluate(&decision_for(Sadness), None), None);

        clock.advance(Duration::from_secs(4));
        assert_eq!(t.evaluate(&decision_for(Sadness), None), Some(Mood::Sadness));
    }

    #[test]
    fn observed_mood_overrides_last_sent() {
        let (mut t, clock) = trigger(5);
        assert_eq!(t.evaluate(&decision_for(Happiness), None), Some(Mood::Happiness));

        // The expression timed out on the actuator; its file now reads neutral.
        clock.advance(Duration::from_secs(6));
        assert_eq!(
            t.evaluate(&decision_for(Happiness), Some(Mood::Neutral)),
            Some(Mood::Happiness)
        );
    }
}
