//! Serde support for SolarNetwork timestamps.
//!
//! SolarNetwork renders timestamps as `2024-01-10 15:30:00.000Z` (a space
//! between date and time, optional fractional seconds). RFC 3339 strings are
//! accepted as well. Timestamps are always written back in the SolarNetwork
//! form.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

const SN_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3fZ";

/// Parse a SolarNetwork or RFC 3339 timestamp.
///
/// # Examples
///
/// ```
/// use solarnet_core::timestamp::parse_timestamp;
///
/// let a = parse_timestamp("2024-01-10 15:30:00.000Z").unwrap();
/// let b = parse_timestamp("2024-01-10T15:30:00Z").unwrap();
/// assert_eq!(a, b);
/// ```
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = value.strip_suffix('Z').unwrap_or(value);
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
}

/// Format a timestamp in SolarNetwork form.
#[must_use]
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.format(SN_FORMAT).to_string()
}

/// Serde adapter for `Option<DateTime<Utc>>` fields.
///
/// Unparseable strings deserialize to `None` rather than failing the whole
/// document.
pub mod option {
    use super::{DateTime, Deserialize, Deserializer, Serializer, Utc, format_timestamp, parse_timestamp};

    /// Serialize an optional timestamp.
    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&format_timestamp(dt)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse_timestamp))
    }
}
