use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

mod color;
mod observable;
mod store;
pub mod ui;

pub use color::{Color, ParseColorError};
pub use observable::{Observable, Subscription};
pub use store::{SettingsSource, SettingsStore};

/// Frame delay used until a settings source says otherwise.
pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(10);
const MAX_FRAME_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub version: u32,
    /// Image shown behind the particles; empty means solid color only.
    pub background_uri: String,
    pub background_color: Color,
    #[serde(
        deserialize_with = "deserialize_millis",
        serialize_with = "serialize_millis"
    )]
    pub frame_delay: Duration,
    pub particles: ParticleSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            background_uri: String::new(),
            background_color: Color::BLACK,
            frame_delay: DEFAULT_FRAME_DELAY,
            particles: ParticleSettings::default(),
        }
    }
}

/// Parameters forwarded to the particle simulator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ParticleSettings {
    /// Number of particles in the field.
    pub density: u32,
    /// Used for both dots and connection lines.
    pub color: Color,
    pub dot_radius_min: f32,
    pub dot_radius_max: f32,
    /// Connection line thickness in pixels.
    pub line_scale: f32,
    /// Particles further apart than this are not connected.
    pub line_distance: f32,
    pub speed_factor: f32,
}

impl Default for ParticleSettings {
    fn default() -> Self {
        Self {
            density: 60,
            color: Color::WHITE,
            dot_radius_min: 1.0,
            dot_radius_max: 3.0,
            line_scale: 1.0,
            line_distance: 86.0,
            speed_factor: 1.0,
        }
    }
}

impl Settings {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: Settings = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.frame_delay.is_zero() {
            return Err(ConfigError::Invalid(
                "frame_delay must be greater than zero".into(),
            ));
        }

        if self.frame_delay.subsec_nanos() % 1_000_000 != 0 {
            return Err(ConfigError::Invalid(format!(
                "frame_delay must be a whole number of milliseconds (got {:?})",
                self.frame_delay
            )));
        }

        if self.frame_delay > MAX_FRAME_DELAY {
            return Err(ConfigError::Invalid(format!(
                "frame_delay must not exceed {}ms",
                MAX_FRAME_DELAY.as_millis()
            )));
        }

        self.particles.validate()
    }
}

impl ParticleSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = [
            ("dot_radius_min", self.dot_radius_min),
            ("dot_radius_max", self.dot_radius_max),
            ("line_scale", self.line_scale),
            ("line_distance", self.line_distance),
            ("speed_factor", self.speed_factor),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "particles.{name} must be a finite number"
                )));
            }
        }

        if self.dot_radius_min < 0.0 || self.dot_radius_max < 0.0 {
            return Err(ConfigError::Invalid(
                "particle dot radii must be non-negative".into(),
            ));
        }

        if self.dot_radius_min > self.dot_radius_max {
            return Err(ConfigError::Invalid(format!(
                "particles.dot_radius_min ({}) exceeds dot_radius_max ({})",
                self.dot_radius_min, self.dot_radius_max
            )));
        }

        if self.line_scale <= 0.0 {
            return Err(ConfigError::Invalid(
                "particles.line_scale must be greater than zero".into(),
            ));
        }

        if self.line_distance < 0.0 {
            return Err(ConfigError::Invalid(
                "particles.line_distance must be non-negative".into(),
            ));
        }

        if self.speed_factor < 0.0 {
            return Err(ConfigError::Invalid(
                "particles.speed_factor must be non-negative".into(),
            ));
        }

        Ok(())
    }
}

fn serialize_millis<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(value.as_millis() as u64)
}

/// Integers are milliseconds; strings go through `humantime` (`"16ms"`).
fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a delay as number of milliseconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_millis(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v / 1000.0))
        }
    }

    deserializer.deserialize_any(Visitor)
}
