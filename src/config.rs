//! Per-track encoding settings and playback tuning.
//!
//! The host owns persistence; the core only reads these values. Fields are
//! addressed at runtime through the explicit [`TrackField`] schema.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::spectral::MAX_ITEMS_PER_TICK;

fn default_preload() -> bool {
    true
}

fn default_ticks_per_second() -> u32 {
    20
}

fn default_max_sound_number() -> usize {
    MAX_ITEMS_PER_TICK
}

/// Encoding settings for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackConfig {
    /// Decode the whole source up front instead of reading per tick.
    #[serde(default = "default_preload")]
    pub preload: bool,
    /// Nominal tick rate.
    #[serde(default = "default_ticks_per_second")]
    pub ticks_per_second: u32,
    /// Upper bound on spectral items per tick, further capped by the frame budget.
    #[serde(default = "default_max_sound_number")]
    pub max_sound_number: usize,
    /// Coefficients with a normalized magnitude below this are dropped.
    #[serde(default)]
    pub minimum_volume_absolute: f64,
    /// Fraction of the tick's own magnitude range below which coefficients are dropped.
    #[serde(default)]
    pub minimum_volume_relative_percent: f64,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            preload: default_preload(),
            ticks_per_second: default_ticks_per_second(),
            max_sound_number: default_max_sound_number(),
            minimum_volume_absolute: 0.0,
            minimum_volume_relative_percent: 0.0,
        }
    }
}

impl TrackConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Effective item cap after applying the wire frame budget.
    pub fn item_cap(&self) -> usize {
        self.max_sound_number.min(MAX_ITEMS_PER_TICK)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_second == 0 {
            return Err(invalid(TrackField::TicksPerSecond, "0", "must be at least 1"));
        }
        if self.max_sound_number == 0 {
            return Err(invalid(TrackField::MaxSoundNumber, "0", "must be at least 1"));
        }
        let absolute = self.minimum_volume_absolute;
        if !absolute.is_finite() || absolute < 0.0 {
            return Err(invalid(
                TrackField::MinimumVolumeAbsolute,
                &absolute.to_string(),
                "must be a non-negative number",
            ));
        }
        let relative = self.minimum_volume_relative_percent;
        if !(0.0..=1.0).contains(&relative) {
            return Err(invalid(
                TrackField::MinimumVolumeRelativePercent,
                &relative.to_string(),
                "must be within 0..=1",
            ));
        }
        Ok(())
    }

    /// Parse `value` as the type of `field` and store it.
    ///
    /// The config is left untouched when parsing or validation fails.
    pub fn set(&mut self, field: TrackField, value: &str) -> Result<(), ConfigError> {
        let mut updated = self.clone();
        match field {
            TrackField::Preload => updated.preload = parse(field, value)?,
            TrackField::TicksPerSecond => updated.ticks_per_second = parse(field, value)?,
            TrackField::MaxSoundNumber => updated.max_sound_number = parse(field, value)?,
            TrackField::MinimumVolumeAbsolute => {
                updated.minimum_volume_absolute = parse(field, value)?
            }
            TrackField::MinimumVolumeRelativePercent => {
                updated.minimum_volume_relative_percent = parse(field, value)?
            }
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn get(&self, field: TrackField) -> String {
        match field {
            TrackField::Preload => self.preload.to_string(),
            TrackField::TicksPerSecond => self.ticks_per_second.to_string(),
            TrackField::MaxSoundNumber => self.max_sound_number.to_string(),
            TrackField::MinimumVolumeAbsolute => self.minimum_volume_absolute.to_string(),
            TrackField::MinimumVolumeRelativePercent => {
                self.minimum_volume_relative_percent.to_string()
            }
        }
    }
}

fn parse<T: FromStr>(field: TrackField, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(field, value, &e.to_string()))
}

fn invalid(field: TrackField, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.key(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// The editable fields of [`TrackConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackField {
    Preload,
    TicksPerSecond,
    MaxSoundNumber,
    MinimumVolumeAbsolute,
    MinimumVolumeRelativePercent,
}

impl TrackField {
    pub const ALL: [TrackField; 5] = [
        TrackField::Preload,
        TrackField::TicksPerSecond,
        TrackField::MaxSoundNumber,
        TrackField::MinimumVolumeAbsolute,
        TrackField::MinimumVolumeRelativePercent,
    ];

    /// Key used in JSON and on the command line.
    pub fn key(self) -> &'static str {
        match self {
            TrackField::Preload => "preload",
            TrackField::TicksPerSecond => "ticksPerSecond",
            TrackField::MaxSoundNumber => "maxSoundNumber",
            TrackField::MinimumVolumeAbsolute => "minimumVolumeAbsolute",
            TrackField::MinimumVolumeRelativePercent => "minimumVolumeRelativePercent",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            TrackField::Preload => "Preload",
            TrackField::TicksPerSecond => "Ticks per second",
            TrackField::MaxSoundNumber => "Max items per tick",
            TrackField::MinimumVolumeAbsolute => "Minimum volume (absolute)",
            TrackField::MinimumVolumeRelativePercent => "Minimum volume (relative)",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            TrackField::Preload => {
                "Read the whole file before playing instead of streaming it (true/false)"
            }
            TrackField::TicksPerSecond => {
                "Spectra computed per second. Lower costs more CPU per tick and loses detail, \
                 higher costs more bandwidth. Recommended 1..30"
            }
            TrackField::MaxSoundNumber => {
                "Upper bound on frequency bins sent per tick. Higher keeps more detail"
            }
            TrackField::MinimumVolumeAbsolute => {
                "Drop bins quieter than this normalized magnitude. Recommended 0..0.1"
            }
            TrackField::MinimumVolumeRelativePercent => {
                "Drop bins in the bottom fraction of the tick's own loudness range. \
                 0 is the quietest bin, 1 the loudest"
            }
        }
    }
}

impl fmt::Display for TrackField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for TrackField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackField::ALL
            .into_iter()
            .find(|field| field.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownField(s.to_string()))
    }
}

/// Tuning for the adaptive playback buffer and the output device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaybackConfig {
    /// Buffer length the scheduler starts with and returns to.
    pub default_buffer_secs: f64,
    pub max_buffer_secs: f64,
    /// Multiplier applied to the buffer length after a starved cycle.
    pub growth_factor: f64,
    /// Fraction of the excess over the default kept after a healthy cycle.
    pub decay_factor: f64,
    pub idle_interval_ms: u64,
    /// Backlog beyond this many targets is dropped.
    pub runaway_factor: usize,
    /// Hard cap on queued ticks regardless of target.
    pub max_backlog: usize,
    pub output_sample_rate: u32,
    pub headroom: f64,
    /// Audio the device sink accepts ahead of the playhead.
    pub device_buffer_secs: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_buffer_secs: 1.0,
            max_buffer_secs: 10.0,
            growth_factor: 1.2,
            decay_factor: 0.9,
            idle_interval_ms: 10,
            runaway_factor: 3,
            max_backlog: 4096,
            output_sample_rate: 48000,
            headroom: 0.9,
            device_buffer_secs: 1.0,
        }
    }
}

impl PlaybackConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the buffer strictly grows when starved, decays towards the
    /// default otherwise and that every size and rate is positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let default = self.default_buffer_secs;
        if !(default.is_finite() && default > 0.0) {
            return Err(invalid_playback("defaultBufferSecs", default, "must be positive"));
        }
        let max = self.max_buffer_secs;
        if !(max.is_finite() && max >= default) {
            return Err(invalid_playback(
                "maxBufferSecs",
                max,
                "must be at least defaultBufferSecs",
            ));
        }
        let growth = self.growth_factor;
        if !(growth.is_finite() && growth > 1.0) {
            return Err(invalid_playback("growthFactor", growth, "must be greater than 1"));
        }
        if !(0.0..1.0).contains(&self.decay_factor) {
            return Err(invalid_playback(
                "decayFactor",
                self.decay_factor,
                "must be within 0..1",
            ));
        }
        if self.runaway_factor == 0 {
            return Err(invalid_playback("runawayFactor", 0, "must be at least 1"));
        }
        if self.max_backlog == 0 {
            return Err(invalid_playback("maxBacklog", 0, "must be at least 1"));
        }
        if self.output_sample_rate == 0 {
            return Err(invalid_playback("outputSampleRate", 0, "must be at least 1"));
        }
        if !(self.headroom > 0.0 && self.headroom <= 1.0) {
            return Err(invalid_playback("headroom", self.headroom, "must be within 0..=1"));
        }
        let device = self.device_buffer_secs;
        if !(device.is_finite() && device > 0.0) {
            return Err(invalid_playback("deviceBufferSecs", device, "must be positive"));
        }
        Ok(())
    }
}

fn invalid_playback(field: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = TrackConfig::from_json("{}").unwrap();
        assert_eq!(config, TrackConfig::default());
        assert!(config.preload);
        assert_eq!(config.ticks_per_second, 20);
        assert_eq!(config.item_cap(), MAX_ITEMS_PER_TICK);
    }

    #[test]
    fn test_json_uses_camel_case_keys() {
        let config = TrackConfig::from_json(
            r#"{"preload": false, "ticksPerSecond": 16, "maxSoundNumber": 100,
                "minimumVolumeAbsolute": 0.01, "minimumVolumeRelativePercent": 0.2}"#,
        )
        .unwrap();
        assert!(!config.preload);
        assert_eq!(config.ticks_per_second, 16);
        assert_eq!(config.item_cap(), 100);
        assert_eq!(config.minimum_volume_relative_percent, 0.2);

        let json = config.to_json().unwrap();
        assert!(json.contains("\"ticksPerSecond\": 16"));
    }

    #[test]
    fn test_item_cap_respects_frame_budget() {
        let config = TrackConfig {
            max_sound_number: 1_000_000,
            ..Default::default()
        };
        assert_eq!(config.item_cap(), MAX_ITEMS_PER_TICK);
    }

    #[test]
    fn test_set_by_field_name() {
        let mut config = TrackConfig::default();
        let field: TrackField = "ticksPerSecond".parse().unwrap();
        config.set(field, "30").unwrap();
        assert_eq!(config.ticks_per_second, 30);
        assert_eq!(config.get(field), "30");

        config.set(TrackField::Preload, "false").unwrap();
        assert!(!config.preload);
    }

    #[test]
    fn test_set_rejects_bad_values_and_keeps_old_config() {
        let mut config = TrackConfig::default();
        assert!(config.set(TrackField::TicksPerSecond, "fast").is_err());
        assert!(config.set(TrackField::TicksPerSecond, "0").is_err());
        assert!(config.set(TrackField::MinimumVolumeRelativePercent, "1.5").is_err());
        assert_eq!(config, TrackConfig::default());
    }

    #[test]
    fn test_unknown_field() {
        assert!(matches!(
            "volume".parse::<TrackField>(),
            Err(ConfigError::UnknownField(_))
        ));
    }

    #[test]
    fn test_every_field_documented() {
        for field in TrackField::ALL {
            assert!(!field.display_name().is_empty());
            assert!(!field.description().is_empty());
            assert_eq!(field.key().parse::<TrackField>().unwrap(), field);
        }
    }

    #[test]
    fn test_playback_config_partial_json() {
        let config = PlaybackConfig::from_json(r#"{"defaultBufferSecs": 4.0}"#).unwrap();
        assert_eq!(config.default_buffer_secs, 4.0);
        assert_eq!(config.runaway_factor, 3);
    }

    #[test]
    fn test_playback_config_rejects_unworkable_tuning() {
        let rejected = |json: &str| match PlaybackConfig::from_json(json) {
            Err(ConfigError::InvalidValue { field, .. }) => field,
            other => panic!("{json} gave {other:?}"),
        };
        assert_eq!(rejected(r#"{"growthFactor": 1.0}"#), "growthFactor");
        assert_eq!(rejected(r#"{"growthFactor": 0.5}"#), "growthFactor");
        assert_eq!(rejected(r#"{"decayFactor": 1.0}"#), "decayFactor");
        assert_eq!(rejected(r#"{"runawayFactor": 0}"#), "runawayFactor");
        assert_eq!(rejected(r#"{"maxBacklog": 0}"#), "maxBacklog");
        assert_eq!(rejected(r#"{"defaultBufferSecs": 0.0}"#), "defaultBufferSecs");
        assert_eq!(
            rejected(r#"{"defaultBufferSecs": 20.0, "maxBufferSecs": 10.0}"#),
            "maxBufferSecs"
        );
        assert_eq!(rejected(r#"{"outputSampleRate": 0}"#), "outputSampleRate");
        assert_eq!(rejected(r#"{"headroom": 1.5}"#), "headroom");
        assert_eq!(rejected(r#"{"deviceBufferSecs": -1.0}"#), "deviceBufferSecs");

        assert!(PlaybackConfig::default().validate().is_ok());
        let config = PlaybackConfig::from_json(r#"{"runawayFactor": 1000000}"#).unwrap();
        assert_eq!(config.runaway_factor, 1_000_000);
    }
}
