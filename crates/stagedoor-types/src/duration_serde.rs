//! Human-readable duration (de)serialization: `"250ms"`, `"30s"`, `"2m"`, `"1h"`.
//!
//! Use with `#[serde(with = "stagedoor_types::duration_serde")]`.

use serde::{self, Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration_str(&s).map_err(serde::de::Error::custom)
}

/// Render a duration in the shortest exact unit.
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms != 0 && ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms != 0 && ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}ms", ms)
    }
}

pub fn parse_duration_str(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(val) = s.strip_suffix("ms") {
        let n: u64 = val.trim().parse().map_err(|e| format!("invalid duration '{}': {}", s, e))?;
        Ok(Duration::from_millis(n))
    } else if let Some(val) = s.strip_suffix('s') {
        let n: u64 = val.trim().parse().map_err(|e| format!("invalid duration '{}': {}", s, e))?;
        Ok(Duration::from_secs(n))
    } else if let Some(val) = s.strip_suffix('m') {
        let n: u64 = val.trim().parse().map_err(|e| format!("invalid duration '{}': {}", s, e))?;
        scaled(s, n, 60)
    } else if let Some(val) = s.strip_suffix('h') {
        let n: u64 = val.trim().parse().map_err(|e| format!("invalid duration '{}': {}", s, e))?;
        scaled(s, n, 3600)
    } else {
        Err(format!("unknown duration format: {}", s))
    }
}

fn scaled(s: &str, n: u64, factor: u64) -> Result<Duration, String> {
    n.checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", s))
}

/// Same as the module-level functions, for `(Duration, Duration)` ranges
/// written as `["1s", "3s"]`.
pub mod range {
    use super::{format_duration, parse_duration_str};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(range: &(Duration, Duration), serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        [format_duration(range.0), format_duration(range.1)].serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<(Duration, Duration), D::Error>
    where
        D: Deserializer<'de>,
    {
        let [min, max] = <[String; 2]>::deserialize(deserializer)?;
        let min = parse_duration_str(&min).map_err(serde::de::Error::custom)?;
        let max = parse_duration_str(&max).map_err(serde::de::Error::custom)?;
        Ok((min, max))
    }
}
