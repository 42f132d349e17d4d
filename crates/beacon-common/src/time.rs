//! Timestamp formatting shared by every wire type.
//!
//! JSON bodies use `yyyy-MM-dd'T'HH:mm:ss.SSS'Z'` (UTC, millisecond
//! precision). `chrono`'s `to_rfc3339` would include a variable-width
//! offset and microsecond precision, so round-tripping through this
//! module is what keeps the format stable.

use chrono::{DateTime, TimeZone, Utc};

const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn format_millis(ts: DateTime<Utc>) -> String {
    ts.format(FORMAT).to_string()
}

pub fn parse_millis(s: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.3fZ")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// serde helper module: `#[serde(with = "beacon_common::time::millis")]`
pub mod millis {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_millis(*ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_millis(&s).ok_or_else(|| serde::de::Error::custom("invalid timestamp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_millisecond_precision() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 28, 10, 30, 0).unwrap()
            + chrono::Duration::milliseconds(123);
        let formatted = format_millis(ts);
        assert_eq!(formatted, "2026-07-28T10:30:00.123Z");
        assert_eq!(parse_millis(&formatted).unwrap(), ts);
    }
}
