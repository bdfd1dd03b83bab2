//! Shared serialization/deserialization utilities for configuration

/// Serialize a `Duration` as seconds.
///
/// Whole seconds are written as an integer, anything else as a float, so
/// sub-second grace periods survive a save/load cycle. Both forms are
/// accepted when reading.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "sm_core::config::duration_secs")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom(format!("invalid duration: {} seconds", secs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        #[serde(with = "duration_secs")]
        timeout: Duration,
    }

    #[test]
    fn test_whole_seconds_as_integer() {
        let config = TestConfig {
            timeout: Duration::from_secs(30),
        };
        assert_eq!(serde_json::to_string(&config).unwrap(), r#"{"timeout":30}"#);
    }

    #[test]
    fn test_fractional_seconds() {
        let config: TestConfig = serde_json::from_str(r#"{"timeout":0.25}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(serde_json::to_string(&config).unwrap(), r#"{"timeout":0.25}"#);
    }

    #[test]
    fn test_negative_rejected() {
        let result: Result<TestConfig, _> = serde_json::from_str(r#"{"timeout":-1}"#);
        assert!(result.is_err());
    }
}
