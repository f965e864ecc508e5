use crate::config::EyesConfig;
use crate::emotion::Mood;
use rand::Rng;
use std::time::{Duration, Instant};

const IDLE_RADIUS: u32 = 75;
const HAPPY_RADIUS: u32 = 90;
const SAD_RADIUS: u32 = 85;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

pub const IDLE_COLOR: Rgb = Rgb(0, 255, 0);
pub const HAPPY_COLOR: Rgb = Rgb(0, 255, 255);
pub const SAD_COLOR: Rgb = Rgb(255, 255, 0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Open,
    Transition,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EyeShape {
    Round,
    Line,
    Arc,
    Teary,
    Slant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EyeFrame {
    pub mood: Mood,
    pub phase: Phase,
    pub shape: EyeShape,
    pub left: (i32, i32),
    pub right: (i32, i32),
    pub radius: u32,
    pub color: Rgb,
}

#[derive(Clone, Copy, Debug)]
struct Expression {
    mood: Mood,
    started: Instant,
    duration: Duration,
    hold: Duration,
}

impl Expression {
    fn phase(&self, now: Instant) -> Phase {
        let elapsed = now.saturating_duration_since(self.started);
        let half = self.duration / 2;
        if elapsed < half {
            Phase::Open
        } else if elapsed < half + self.hold {
            Phase::Transition
        } else {
            Phase::Closed
        }
    }

    fn is_over(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.duration
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    pub frame: EyeFrame,
    pub reverted: bool,
}

/// The eyes' state machine: idle with blink and drift, or a timed happy or
/// sad expression that falls back to idle on its own.
#[derive(Debug)]
pub struct RoboEyes<R> {
    config: EyesConfig,
    rng: R,
    expression: Option<Expression>,
    blink_until: Option<Instant>,
    next_blink_at: Instant,
    next_drift_at: Instant,
    drift_x: i32,
}

impl<R: Rng> RoboEyes<R> {
    pub fn new(config: EyesConfig, mut rng: R, now: Instant) -> Self {
        let next_blink_at = now + config.blink_interval.sample(&mut rng);
        let next_drift_at = now + config.drift_interval.sample(&mut rng);
        Self {
            config,
            rng,
            expression: None,
            blink_until: None,
            next_blink_at,
            next_drift_at,
            drift_x: 0,
        }
    }

    pub fn mood(&self) -> Mood {
        self.expression.map(|e| e.mood).unwrap_or_default()
    }

    pub fn is_blinking(&self) -> bool {
        self.blink_until.is_some()
    }

    pub fn drift(&self) -> i32 {
        self.drift_x
    }

    /// Starts an expression if the eyes are idle. Returns whether it took effect.
    pub fn express(&mut self, mood: Mood, now: Instant) -> bool {
        if self.expression.is_some() {
            return false;
        }
        let hold = match mood {
            Mood::Neutral => return false,
            Mood::Happiness => self.config.happy_hold,
            Mood::Sadness => self.config.sad_hold,
        };
        self.blink_until = None;
        self.expression = Some(Expression {
            mood,
            started: now,
            duration: self.config.expression_duration.sample(&mut self.rng),
            hold: hold.sample(&mut self.rng),
        });
        true
    }

    /// Advances every timer to `now` and returns the frame to draw.
    pub fn tick(&mut self, now: Instant) -> Tick {
        let mut reverted = false;
        if let Some(expr) = self.expression {
            if expr.is_over(now) {
                self.expression = None;
                self.restart_idle_timers(now);
                reverted = true;
            }
        }

        if self.expression.is_none() {
            self.advance_blink(now);
            if !self.is_blinking() {
                self.advance_drift(now);
            }
        }

        Tick {
            frame: self.frame(now),
            reverted,
        }
    }

    fn restart_idle_timers(&mut self, now: Instant) {
        self.blink_until = None;
        self.next_blink_at = now + self.config.blink_interval.sample(&mut self.rng);
        self.next_drift_at = now + self.config.drift_interval.sample(&mut self.rng);
    }

    fn advance_blink(&mut self, now: Instant) {
        match self.blink_until {
            Some(until) if now >= until => {
                self.blink_until = None;
                self.next_blink_at = now + self.config.blink_interval.sample(&mut self.rng);
            }
            Some(_) => {}
            None if now >= self.next_blink_at => {
                self.blink_until = Some(now + self.config.blink_duration.sample(&mut self.rng));
            }
            None => {}
        }
    }

    fn advance_drift(&mut self, now: Instant) {
        if now < self.next_drift_at {
            return;
        }
        let step = self.config.drift_step_px;
        let limit = self.config.drift_limit_px;
        let delta = self.rng.random_range(-step..=step);
        self.drift_x = (self.drift_x + delta).clamp(-limit, limit);
        self.next_drift_at = now + self.config.drift_interval.sample(&mut self.rng);
    }

    fn frame(&self, now: Instant) -> EyeFrame {
        let w = self.config.width as i32;
        let h = self.config.height as i32;
        let y = h / 2;
        let (mood, phase) = match self.expression {
            Some(e) => (e.mood, e.phase(now)),
            None => (Mood::Neutral, Phase::Open),
        };
        let (radius, color, shape) = match (mood, phase) {
            (Mood::Neutral, _) if self.is_blinking() => (IDLE_RADIUS, IDLE_COLOR, EyeShape::Line),
            (Mood::Neutral, _) => (IDLE_RADIUS, IDLE_COLOR, EyeShape::Round),
            (Mood::Happiness, Phase::Transition) => (HAPPY_RADIUS, HAPPY_COLOR, EyeShape::Arc),
            (Mood::Happiness, _) => (HAPPY_RADIUS, HAPPY_COLOR, EyeShape::Round),
            (Mood::Sadness, Phase::Transition) => (SAD_RADIUS, SAD_COLOR, EyeShape::Slant),
            (Mood::Sadness, _) => (SAD_RADIUS, SAD_COLOR, EyeShape::Teary),
        };
        EyeFrame {
            mood,
            phase,
            shape,
            left: (w / 4 + self.drift_x, y),
            right: (w * 3 / 4 + self.drift_x, y),
            radius,
            color,
        }
    }
}
