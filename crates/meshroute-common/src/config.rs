//! Coercion helpers for the flat string maps used by the property store.
//!
//! Every helper distinguishes "key absent" (use the default) from "key
//! present but unparsable" (a [`RouteError::MalformedProperty`]).

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, RouteError};

/// Flat string-keyed property bag.
pub type PropertyMap = HashMap<String, String>;

/// Parses `key` into `T`, returning `None` when the key is absent.
pub fn get_parsed<T>(map: &PropertyMap, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match map.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| RouteError::malformed(key, format!("'{}': {}", raw, e))),
    }
}

/// Parses `key` into `T`, falling back to `default` when absent.
pub fn get_or<T>(map: &PropertyMap, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(get_parsed(map, key)?.unwrap_or(default))
}

/// Parses a boolean flag, accepting `true`/`false` in any case.
pub fn get_bool(map: &PropertyMap, key: &str, default: bool) -> Result<bool> {
    match map.get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(RouteError::malformed(key, format!("'{}' is not a boolean", raw))),
        },
    }
}

/// Parses a millisecond count into a [`Duration`].
pub fn get_duration_ms(map: &PropertyMap, key: &str, default: Duration) -> Result<Duration> {
    Ok(get_parsed::<u64>(map, key)?
        .map(Duration::from_millis)
        .unwrap_or(default))
}

/// Parses a float and checks it lies in `[min, max]`.
pub fn get_f64_in(map: &PropertyMap, key: &str, default: f64, min: f64, max: f64) -> Result<f64> {
    let value = get_or(map, key, default)?;
    if !(min..=max).contains(&value) {
        return Err(RouteError::malformed(
            key,
            format!("{} is outside [{}, {}]", value, min, max),
        ));
    }
    Ok(value)
}

/// Parses a list value.
///
/// The store writes lists either as a JSON array of strings or as a single
/// bare value; both forms are accepted.
pub fn get_list(map: &PropertyMap, key: &str) -> Result<Option<Vec<String>>> {
    let Some(raw) = map.get(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        let values: Vec<String> = serde_json::from_str(trimmed)
            .map_err(|e| RouteError::malformed(key, e.to_string()))?;
        Ok(Some(values))
    } else if trimmed.is_empty() {
        Ok(Some(Vec::new()))
    } else {
        Ok(Some(vec![trimmed.to_string()]))
    }
}
