//! Konfiguration des CallSoundDeciders
//!
//! Standardwerte entsprechen dem Verhalten der App. Einzelne Werte können
//! über Umgebungsvariablen überschrieben werden.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const ENV_RECOVER_GRACE_SECS: &str = "CALL_SOUNDS_RECOVER_GRACE_SECS";
pub const ENV_WAITING_FOR_OTHERS_SECS: &str = "CALL_SOUNDS_WAITING_FOR_OTHERS_SECS";
pub const ENV_WAITING_ROOM_DELAY_MS: &str = "CALL_SOUNDS_WAITING_ROOM_DELAY_MS";
pub const ENV_FINISH_CALL_COUNTER_SECS: &str = "CALL_SOUNDS_FINISH_CALL_COUNTER_SECS";
pub const ENV_CUE_BUFFER: &str = "CALL_SOUNDS_CUE_BUFFER";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CallSoundConfig {
    /// Wartezeit, bevor ein 1:1-Call nach einem recoverable Abbruch aufgelegt wird
    #[serde(with = "secs")]
    pub recover_grace: Duration,

    /// Wie lange auf weitere Teilnehmer gewartet wird, bevor gemutet wird
    #[serde(with = "secs")]
    pub waiting_for_others: Duration,

    #[serde(with = "millis")]
    pub waiting_room_delay: Duration,

    /// Laufzeit des Finish-Call-Counters in ChatManagement
    #[serde(with = "secs")]
    pub finish_call_counter: Duration,

    /// Kapazität des Cue-Kanals (1 = nur der neueste Cue bleibt erhalten)
    pub cue_buffer: usize,

    /// Kapazität der Event-Kanäle im EventHub
    pub event_buffer: usize,
}

impl Default for CallSoundConfig {
    fn default() -> Self {
        Self {
            recover_grace: Duration::from_secs(10),
            waiting_for_others: Duration::from_secs(300),
            waiting_room_delay: Duration::from_millis(1000),
            finish_call_counter: Duration::from_secs(120),
            cue_buffer: 1,
            event_buffer: 100,
        }
    }
}

impl CallSoundConfig {
    /// Standardwerte, überschrieben durch gesetzte Umgebungsvariablen
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var(&lookup, ENV_RECOVER_GRACE_SECS)? {
            config.recover_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, ENV_WAITING_FOR_OTHERS_SECS)? {
            config.waiting_for_others = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&lookup, ENV_WAITING_ROOM_DELAY_MS)? {
            config.waiting_room_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var(&lookup, ENV_FINISH_CALL_COUNTER_SECS)? {
            config.finish_call_counter = Duration::from_secs(secs);
        }
        if let Some(buffer) = parse_var(&lookup, ENV_CUE_BUFFER)? {
            if buffer == 0 {
                return Err(ConfigError::InvalidValue {
                    key: ENV_CUE_BUFFER,
                    value: "0".to_string(),
                });
            }
            config.cue_buffer = buffer as usize;
        }

        Ok(config)
    }
}

fn parse_var<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = CallSoundConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, CallSoundConfig::default());
        assert_eq!(config.recover_grace, Duration::from_secs(10));
        assert_eq!(config.waiting_room_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_env_overrides() {
        let config = CallSoundConfig::from_lookup(lookup_from(&[
            (ENV_RECOVER_GRACE_SECS, "3"),
            (ENV_WAITING_ROOM_DELAY_MS, " 250 "),
            (ENV_CUE_BUFFER, "8"),
        ]))
        .unwrap();

        assert_eq!(config.recover_grace, Duration::from_secs(3));
        assert_eq!(config.waiting_room_delay, Duration::from_millis(250));
        assert_eq!(config.cue_buffer, 8);
        assert_eq!(config.waiting_for_others, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_env_value() {
        let err = CallSoundConfig::from_lookup(lookup_from(&[(ENV_WAITING_FOR_OTHERS_SECS, "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: ENV_WAITING_FOR_OTHERS_SECS,
                value: "soon".to_string(),
            }
        );

        assert!(CallSoundConfig::from_lookup(lookup_from(&[(ENV_CUE_BUFFER, "0")])).is_err());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: CallSoundConfig =
            serde_json::from_str(r#"{ "recover_grace": 4, "waiting_room_delay": 20 }"#).unwrap();
        assert_eq!(config.recover_grace, Duration::from_secs(4));
        assert_eq!(config.waiting_room_delay, Duration::from_millis(20));
        assert_eq!(config.finish_call_counter, Duration::from_secs(120));
    }
}
