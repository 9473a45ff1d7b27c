//! Lenient serde helpers for the terminal's loosely-typed numbers.
//!
//! Accepts JSON numbers, numeric strings, and `null`/empty strings (as absent).

use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Int(i64),
    Float(f64),
    Text(String),
}

fn text_to_f64<E: de::Error>(text: &str) -> Result<Option<f64>, E> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|_| E::custom(format!("expected a number, found \"{trimmed}\"")))
}

fn text_to_i64<E: de::Error>(text: &str) -> Result<Option<i64>, E> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(Some(v));
    }
    match text_to_f64::<E>(trimmed)? {
        Some(f) => float_to_i64(f).map(Some),
        None => Ok(None),
    }
}

fn float_to_i64<E: de::Error>(f: f64) -> Result<i64, E> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Ok(f as i64)
    } else {
        Err(E::custom(format!("expected an integer, found {f}")))
    }
}

/// Optional float: number, numeric string, null, or missing (with `#[serde(default)]`).
pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Int(v)) => Ok(Some(v as f64)),
        Some(NumberOrText::Float(v)) => Ok(Some(v)),
        Some(NumberOrText::Text(s)) => text_to_f64(&s),
    }
}

/// Optional integer: integral number, numeric string, null, or missing.
pub fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Int(v)) => Ok(Some(v)),
        Some(NumberOrText::Float(v)) => float_to_i64(v).map(Some),
        Some(NumberOrText::Text(s)) => text_to_i64(&s),
    }
}

/// Required integer with the same leniency as [`opt_i64`].
pub fn i64_value<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    opt_i64(deserializer)?.ok_or_else(|| de::Error::custom("expected an integer, found nothing"))
}
