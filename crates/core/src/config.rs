use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use url::Url;

pub const DEFAULT_SER_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_ACTUATOR_BIND: &str = "127.0.0.1:8081";
pub const DEFAULT_SER_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_ACTUATOR_URL: &str = "http://127.0.0.1:8081";
pub const DEFAULT_CAPTURE_DIR: &str = "temp";
pub const DEFAULT_MOOD_FILE: &str = "temp/current_mood.txt";
pub const DEFAULT_CLIP_SECS: u64 = 5;
pub const DEFAULT_CLIP_RETENTION: usize = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_SER_POLL_SECS: u64 = 10;
pub const DEFAULT_DEBOUNCE_SECS: u64 = 5;
pub const DEFAULT_FPS: u32 = 50;
pub const DEFAULT_SCREEN_WIDTH: u32 = 640;
pub const DEFAULT_SCREEN_HEIGHT: u32 = 480;

#[cfg(target_os = "macos")]
pub const DEFAULT_INPUT_FORMAT: &str = "avfoundation";
#[cfg(target_os = "macos")]
pub const DEFAULT_INPUT_DEVICE: &str = ":0";
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_INPUT_FORMAT: &str = "alsa";
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_INPUT_DEVICE: &str = "default";

pub const ENV_SER_ORACLE_URL: &str = "ROBO_MOOD_SER_ORACLE_URL";
pub const ENV_FER_ORACLE_URL: &str = "ROBO_MOOD_FER_ORACLE_URL";
pub const ENV_SER_URL: &str = "ROBO_MOOD_SER_URL";
pub const ENV_ACTUATOR_URL: &str = "ROBO_MOOD_ACTUATOR_URL";
pub const ENV_MOOD_FILE: &str = "ROBO_MOOD_FILE";
pub const ENV_CAPTURE_DEVICE: &str = "ROBO_MOOD_CAPTURE_DEVICE";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be > 0")]
    Zero(&'static str),
    #[error("{name}: min {min:?} is greater than max {max:?}")]
    InvertedRange {
        name: &'static str,
        min: Duration,
        max: Duration,
    },
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("invalid url {value}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("invalid address {0}")]
    InvalidAddr(String),
}

fn nonzero(name: &'static str, d: Duration) -> Result<Duration, ConfigError> {
    if d.is_zero() {
        return Err(ConfigError::Zero(name));
    }
    Ok(d)
}

pub fn parse_url(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        value: value.to_owned(),
        reason: e.to_string(),
    })
}

pub fn parse_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidAddr(value.to_owned()))
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DurationRange {
    pub min: Duration,
    pub max: Duration,
}

impl DurationRange {
    pub fn new(name: &'static str, min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvertedRange { name, min, max });
        }
        Ok(Self { min, max })
    }

    pub const fn fixed(d: Duration) -> Self {
        Self { min: d, max: d }
    }

    const fn secs_f(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min: Duration::from_millis(min_ms),
            max: Duration::from_millis(max_ms),
        }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        Duration::from_secs_f64(rng.random_range(self.min.as_secs_f64()..self.max.as_secs_f64()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureConfig {
    pub dir: PathBuf,
    pub clip_duration: Duration,
    pub retention: usize,
    pub retry_delay: Duration,
    pub input_format: String,
    pub device: String,
}

impl CaptureConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        nonzero("clip duration", self.clip_duration)?;
        if self.retention == 0 {
            return Err(ConfigError::Zero("clip retention"));
        }
        if self.device.trim().is_empty() {
            return Err(ConfigError::Empty("capture device"));
        }
        if self.input_format.trim().is_empty() {
            return Err(ConfigError::Empty("capture input format"));
        }
        Ok(self)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_CAPTURE_DIR),
            clip_duration: Duration::from_secs(DEFAULT_CLIP_SECS),
            retention: DEFAULT_CLIP_RETENTION,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            input_format: DEFAULT_INPUT_FORMAT.to_owned(),
            device: DEFAULT_INPUT_DEVICE.to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerServiceConfig {
    pub bind: SocketAddr,
    pub oracle_url: Url,
    pub capture: CaptureConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PerceptionConfig {
    pub ser_url: Url,
    pub actuator_url: Url,
    pub fer_oracle_url: Url,
    pub ser_poll_interval: Duration,
    pub debounce_interval: Duration,
    /// Actuator mirror file, when it is reachable from this process.
    pub mood_file: Option<PathBuf>,
}

impl PerceptionConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        nonzero("ser poll interval", self.ser_poll_interval)?;
        nonzero("debounce interval", self.debounce_interval)?;
        Ok(self)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EyesConfig {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub expression_duration: DurationRange,
    pub happy_hold: DurationRange,
    pub sad_hold: DurationRange,
    pub blink_interval: DurationRange,
    pub blink_duration: DurationRange,
    pub drift_interval: DurationRange,
    pub drift_step_px: i32,
    pub drift_limit_px: i32,
}

impl EyesConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.fps == 0 {
            return Err(ConfigError::Zero("fps"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Zero("screen size"));
        }
        for (name, r) in [
            ("expression duration", self.expression_duration),
            ("happy hold", self.happy_hold),
            ("sad hold", self.sad_hold),
            ("blink interval", self.blink_interval),
            ("blink duration", self.blink_duration),
            ("drift interval", self.drift_interval),
        ] {
            DurationRange::new(name, r.min, r.max)?;
            nonzero(name, r.max)?;
        }
        Ok(self)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

impl Default for EyesConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            width: DEFAULT_SCREEN_WIDTH,
            height: DEFAULT_SCREEN_HEIGHT,
            expression_duration: DurationRange::secs_f(3_000, 6_000),
            happy_hold: DurationRange::secs_f(1_000, 2_000),
            sad_hold: DurationRange::secs_f(100, 400),
            blink_interval: DurationRange::secs_f(3_000, 6_000),
            blink_duration: DurationRange::secs_f(100, 400),
            drift_interval: DurationRange::secs_f(2_000, 5_000),
            drift_step_px: 10,
            drift_limit_px: 40,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActuatorConfig {
    pub bind: SocketAddr,
    pub mood_file: PathBuf,
    pub eyes: EyesConfig,
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}

pub fn resolve_url(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> Result<Url, ConfigError> {
    parse_url(&resolve_string_with_default(cli_value, env_key, env, default))
}

/// Like [`resolve_url`] but with no fallback: the value must come from the flag
/// or the environment.
pub fn resolve_required_url(
    cli_value: Option<String>,
    env_key: &'static str,
    env: &impl Env,
) -> Result<Url, ConfigError> {
    match resolve_optional_string(cli_value, env_key, env) {
        Some(v) if !v.trim().is_empty() => parse_url(&v),
        _ => Err(ConfigError::Empty(env_key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn url_cli_takes_precedence_over_env() {
        let env = MapEnv::default().with_var(ENV_SER_URL, "http://env:1");
        let url = resolve_url(Some("http://cli:2".to_owned()), ENV_SER_URL, &env, DEFAULT_SER_URL)
            .expect("valid url");
        assert_eq!(url.as_str(), "http://cli:2/");
    }

    #[test]
    fn url_env_used_when_cli_missing() {
        let env = MapEnv::default().with_var(ENV_SER_URL, "http://env:1");
        let url = resolve_url(None, ENV_SER_URL, &env, DEFAULT_SER_URL).expect("valid url");
        assert_eq!(url.port(), Some(1));
    }

    #[test]
    fn url_default_used_when_both_missing() {
        let url =
            resolve_url(None, ENV_SER_URL, &MapEnv::default(), DEFAULT_SER_URL).expect("valid");
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn required_url_errors_when_absent() {
        let err = resolve_required_url(None, ENV_SER_ORACLE_URL, &MapEnv::default()).unwrap_err();
        assert_eq!(err, ConfigError::Empty(ENV_SER_ORACLE_URL));

        let err = resolve_required_url(Some("not a url".to_owned()), ENV_SER_ORACLE_URL, &MapEnv::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn resolve_string_with_default_default_used_when_both_missing() {
        let v = resolve_string_with_default(None, ENV_CAPTURE_DEVICE, &MapEnv::default(), "def");
        assert_eq!(v, "def");
    }

    #[test]
    fn capture_config_rejects_zero_retention_and_duration() {
        let cfg = CaptureConfig {
            retention: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("clip retention")));

        let cfg = CaptureConfig {
            clip_duration: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("clip duration")));
    }

    #[test]
    fn eyes_config_defaults_are_valid() {
        let cfg = EyesConfig::default().validate().expect("valid");
        assert_eq!(cfg.frame_interval(), Duration::from_millis(20));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = DurationRange::new("blink", Duration::from_secs(2), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvertedRange { name: "blink", .. }));
    }

    #[test]
    fn range_samples_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let r = DurationRange::new("d", Duration::from_secs(3), Duration::from_secs(6)).expect("ok");
        for _ in 0..200 {
            let d = r.sample(&mut rng);
            assert!(d >= r.min && d <= r.max);
        }
        let fixed = DurationRange::fixed(Duration::from_secs(4));
        assert_eq!(fixed.sample(&mut rng), Duration::from_secs(4));
    }
}
