//! Open/close time fields.
//!
//! Resolution order: ISO-style datetime text, then Unix epoch seconds, else
//! unset. Anything at or before the epoch (`0`, `"0"`, `"1970.01.01 00:00"`)
//! is the terminal's "not set" marker and resolves to `None`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Datetime layouts tried for naive (zone-less) text, read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y.%m.%d %H:%M:%S",
    "%Y.%m.%d %H:%M",
];

/// A raw time value as the terminal sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTime {
    Epoch(i64),
    FractionalEpoch(f64),
    Text(String),
}

impl WireTime {
    /// Resolve to an instant, or `None` for the unset sentinel / unparseable input.
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        let resolved = match self {
            Self::Epoch(secs) => from_epoch(*secs),
            Self::FractionalEpoch(secs) if secs.is_finite() => from_epoch(secs.trunc() as i64),
            Self::FractionalEpoch(_) => None,
            Self::Text(text) => parse_text(text),
        };
        resolved.filter(|t| t.timestamp() > 0)
    }
}

fn from_epoch(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    text.parse::<i64>().ok().and_then(from_epoch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn iso_text() {
        let t = WireTime::Text("2024-01-01T10:00:00".into());
        assert_eq!(t.resolve(), Some(utc(2024, 1, 1, 10, 0, 0)));
    }

    #[test]
    fn rfc3339_with_offset_is_normalised() {
        let t = WireTime::Text("2024-01-01T12:00:00+02:00".into());
        assert_eq!(t.resolve(), Some(utc(2024, 1, 1, 10, 0, 0)));
    }

    #[test]
    fn terminal_dotted_format() {
        let t = WireTime::Text("2024.03.15 09:30".into());
        assert_eq!(t.resolve(), Some(utc(2024, 3, 15, 9, 30, 0)));
    }

    #[test]
    fn epoch_number_and_epoch_text() {
        assert_eq!(WireTime::Epoch(1_704_103_200).resolve(), Some(utc(2024, 1, 1, 10, 0, 0)));
        assert_eq!(
            WireTime::Text("1704103200".into()).resolve(),
            Some(utc(2024, 1, 1, 10, 0, 0))
        );
    }

    #[test]
    fn unset_sentinels() {
        assert_eq!(WireTime::Epoch(0).resolve(), None);
        assert_eq!(WireTime::Text("0".into()).resolve(), None);
        assert_eq!(WireTime::Text("".into()).resolve(), None);
        assert_eq!(WireTime::Text("1970.01.01 00:00".into()).resolve(), None);
        assert_eq!(WireTime::Text("yesterday".into()).resolve(), None);
    }

    #[test]
    fn untagged_decoding() {
        let t: WireTime = serde_json::from_str("1704103200").unwrap();
        assert_eq!(t, WireTime::Epoch(1_704_103_200));
        let t: WireTime = serde_json::from_str("\"2024-01-01T10:00:00\"").unwrap();
        assert!(matches!(t, WireTime::Text(_)));
    }
}
