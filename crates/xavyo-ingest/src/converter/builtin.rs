//! Built-in converter catalogue.
//!
//! Every converter passes `null` through unchanged and returns the original
//! value (with a warning) when the input cannot be interpreted.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use std::fmt::Write;
use tracing::warn;

use super::{ConverterError, ConverterParams, FnConverter};
use crate::record::is_empty_value;

/// Converters available to every registry.
pub static BUILTIN_CONVERTERS: &[FnConverter] = &[
    FnConverter::new("split", split),
    FnConverter::new("mac_address", mac_address),
    FnConverter::new("uppercase", uppercase),
    FnConverter::new("lowercase", lowercase),
    FnConverter::new("trim", trim),
    FnConverter::new("date_format", date_format),
    FnConverter::new("timestamp", timestamp),
    FnConverter::new("epoch", epoch),
    FnConverter::new("first_from_full_name", first_from_full_name),
    FnConverter::new("last_from_full_name", last_from_full_name),
    FnConverter::new("uuid", canonical_uuid),
    FnConverter::new("bytes_to_gb", bytes_to_gb),
    FnConverter::new("default", default_value),
    FnConverter::new("prefix", prefix),
    FnConverter::new("boolean", boolean),
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y", "%Y%m%d"];

type ConvertResult = Result<Value, ConverterError>;

fn param_str<'p>(
    converter: &str,
    params: &'p ConverterParams,
    key: &str,
) -> Result<Option<&'p str>, ConverterError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ConverterError::invalid_param(converter, key, "expected a string")),
    }
}

fn param_i64(
    converter: &str,
    params: &ConverterParams,
    key: &str,
) -> Result<Option<i64>, ConverterError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| ConverterError::invalid_param(converter, key, "expected an integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConverterError::invalid_param(converter, key, "expected an integer")),
        Some(_) => Err(ConverterError::invalid_param(converter, key, "expected an integer")),
    }
}

fn unconvertible(converter: &str, field: &str, value: Value, reason: &str) -> ConvertResult {
    warn!(converter, field, value = %value, reason, "Value left unconverted");
    Ok(value)
}

fn split(field: &str, _record: &Value, value: Value, params: &ConverterParams) -> ConvertResult {
    let on = param_str("split", params, "on")?.unwrap_or(",");
    if on.is_empty() {
        return Err(ConverterError::invalid_param("split", "on", "separator must not be empty"));
    }
    let index = param_i64("split", params, "index")?;

    let text = match value {
        Value::Null => return Ok(Value::Null),
        Value::String(ref s) => s.as_str(),
        other => return unconvertible("split", field, other, "not a string"),
    };

    let parts: Vec<&str> = text.split(on).collect();
    let Some(index) = index else {
        return Ok(Value::Array(
            parts.into_iter().map(|p| Value::String(p.to_string())).collect(),
        ));
    };

    let resolved = if index < 0 {
        parts.len().checked_sub(index.unsigned_abs() as usize)
    } else {
        Some(index as usize)
    };
    Ok(resolved
        .and_then(|i| parts.get(i))
        .map_or(Value::Null, |p| Value::String((*p).to_string())))
}

fn mac_address(
    field: &str,
    _record: &Value,
    value: Value,
    _params: &ConverterParams,
) -> ConvertResult {
    let Value::String(raw) = &value else {
        return if value.is_null() {
            Ok(Value::Null)
        } else {
            unconvertible("mac_address", field, value, "not a string")
        };
    };

    let hex: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.' | ' '))
        .collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return unconvertible("mac_address", field, value, "not a 48-bit MAC address");
    }

    let upper = hex.to_ascii_uppercase();
    let octets: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
    Ok(Value::String(octets.join(":")))
}

fn map_text(name: &str, field: &str, value: Value, f: fn(&str) -> String) -> ConvertResult {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(f(&s))),
        other => unconvertible(name, field, other, "not a string"),
    }
}

fn uppercase(
    field: &str,
    _record: &Value,
    value: Value,
    _params: &ConverterParams,
) -> ConvertResult {
    map_text("uppercase", field, value, str::to_uppercase)
}

fn lowercase(
    field: &str,
    _record: &Value,
    value: Value,
    _params: &ConverterParams,
) -> ConvertResult {
    map_text("lowercase", field, value, str::to_lowercase)
}

fn trim(field: &str, _record: &Value, value: Value, _params: &ConverterParams) -> ConvertResult {
    map_text("trim", field, value, |s| s.trim().to_string())
}

/// Parse a date or date-time with an explicit format, or by trying common formats.
fn parse_datetime(text: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    let text = text.trim();

    if let Some(format) = format {
        return NaiveDateTime::parse_from_str(text, format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            });
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn date_format(
    field: &str,
    _record: &Value,
    value: Value,
    params: &ConverterParams,
) -> ConvertResult {
    let from_format = param_str("date_format", params, "from_format")?;
    let to_format = param_str("date_format", params, "to_format")?.unwrap_or("%Y-%m-%d");

    let parsed = match &value {
        Value::Null => return Ok(Value::Null),
        Value::String(s) => parse_datetime(s, from_format),
        _ => None,
    };
    let Some(parsed) = parsed else {
        return unconvertible("date_format", field, value, "unrecognized date");
    };

    let mut out = String::new();
    write!(out, "{}", parsed.format(to_format)).map_err(|_| {
        ConverterError::invalid_param(
            "date_format",
            "to_format",
            format!("invalid format '{to_format}'"),
        )
    })?;
    Ok(Value::String(out))
}

fn timestamp(
    field: &str,
    _record: &Value,
    value: Value,
    params: &ConverterParams,
) -> ConvertResult {
    let unit = param_str("timestamp", params, "unit")?.unwrap_or("auto");
    if !matches!(unit, "auto" | "s" | "ms") {
        return Err(ConverterError::invalid_param(
            "timestamp",
            "unit",
            "expected 'auto', 's' or 'ms'",
        ));
    }

    let epoch = match &value {
        Value::Null => return Ok(Value::Null),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
                let utc = dt.with_timezone(&Utc);
                return Ok(Value::String(utc.to_rfc3339_opts(SecondsFormat::Secs, true)));
            }
            s.trim().parse::<i64>().ok()
        }
        _ => None,
    };
    let Some(epoch) = epoch else {
        return unconvertible("timestamp", field, value, "not an epoch value");
    };

    let millis = match unit {
        "ms" => true,
        "s" => false,
        _ => epoch.unsigned_abs() > 100_000_000_000,
    };
    let converted = if millis {
        DateTime::<Utc>::from_timestamp_millis(epoch)
    } else {
        DateTime::<Utc>::from_timestamp(epoch, 0)
    };

    match converted {
        Some(dt) => Ok(Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true))),
        None => unconvertible("timestamp", field, value, "epoch out of range"),
    }
}

fn epoch(field: &str, _record: &Value, value: Value, params: &ConverterParams) -> ConvertResult {
    let from_format = param_str("epoch", params, "from_format")?;
    match &value {
        Value::Null | Value::Number(_) => Ok(value),
        Value::String(s) => match parse_datetime(s, from_format) {
            Some(naive) => Ok(Value::from(Utc.from_utc_datetime(&naive).timestamp())),
            None => unconvertible("epoch", field, value, "unrecognized date"),
        },
        _ => unconvertible("epoch", field, value, "not a date string"),
    }
}

/// Split "Last, First Middle" or "First Middle Last" into (first, last).
fn split_full_name(name: &str) -> (Option<String>, Option<String>) {
    if let Some((last, rest)) = name.split_once(',') {
        let first = rest.split_whitespace().next().map(str::to_string);
        let last = Some(last.trim().to_string()).filter(|l| !l.is_empty());
        return (first, last);
    }

    let words: Vec<&str> = name.split_whitespace().collect();
    match words.as_slice() {
        [] => (None, None),
        [only] => (Some((*only).to_string()), None),
        [first, .., last] => (Some((*first).to_string()), Some((*last).to_string())),
    }
}

fn first_from_full_name(
    field: &str,
    _record: &Value,
    value: Value,
    _params: &ConverterParams,
) -> ConvertResult {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(split_full_name(&s).0.map_or(Value::Null, Value::String)),
        other => unconvertible("first_from_full_name", field, other, "not a string"),
    }
}

fn last_from_full_name(
    field: &str,
    _record: &Value,
    value: Value,
    _params: &ConverterParams,
) -> ConvertResult {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(split_full_name(&s).1.map_or(Value::Null, Value::String)),
        other => unconvertible("last_from_full_name", field, other, "not a string"),
    }
}

fn canonical_uuid(
    field: &str,
    _record: &Value,
    value: Value,
    _params: &ConverterParams,
) -> ConvertResult {
    let Value::String(s) = &value else {
        return if value.is_null() {
            Ok(Value::Null)
        } else {
            unconvertible("uuid", field, value, "not a string")
        };
    };

    match uuid::Uuid::parse_str(s.trim()) {
        Ok(id) => Ok(Value::String(id.hyphenated().to_string())),
        Err(_) => unconvertible("uuid", field, value, "not a UUID"),
    }
}

fn bytes_to_gb(
    field: &str,
    _record: &Value,
    value: Value,
    params: &ConverterParams,
) -> ConvertResult {
    let precision = param_i64("bytes_to_gb", params, "precision")?.unwrap_or(2);
    if !(0..=9).contains(&precision) {
        return Err(ConverterError::invalid_param(
            "bytes_to_gb",
            "precision",
            "must be between 0 and 9",
        ));
    }

    let bytes = match &value {
        Value::Null => return Ok(Value::Null),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(bytes) = bytes else {
        return unconvertible("bytes_to_gb", field, value, "not a number");
    };

    let factor = 10f64.powi(precision as i32);
    let gb = (bytes / 1024f64.powi(3) * factor).round() / factor;
    Ok(Value::from(gb))
}

fn default_value(
    _field: &str,
    _record: &Value,
    value: Value,
    params: &ConverterParams,
) -> ConvertResult {
    let Some(fallback) = params.get("value") else {
        return Err(ConverterError::invalid_param("default", "value", "required"));
    };
    if is_empty_value(&value) {
        Ok(fallback.clone())
    } else {
        Ok(value)
    }
}

fn prefix(field: &str, _record: &Value, value: Value, params: &ConverterParams) -> ConvertResult {
    let Some(prefix) = param_str("prefix", params, "value")? else {
        return Err(ConverterError::invalid_param("prefix", "value", "required"));
    };
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) if s.starts_with(prefix) => Ok(Value::String(s)),
        Value::String(s) => Ok(Value::String(format!("{prefix}{s}"))),
        other => unconvertible("prefix", field, other, "not a string"),
    }
}

fn boolean(field: &str, _record: &Value, value: Value, _params: &ConverterParams) -> ConvertResult {
    let parsed = match &value {
        Value::Null => return Ok(Value::Null),
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "on" | "enabled" => Some(true),
            "false" | "no" | "n" | "0" | "off" | "disabled" => Some(false),
            _ => None,
        },
        _ => None,
    };

    match parsed {
        Some(b) => Ok(Value::Bool(b)),
        None => unconvertible("boolean", field, value, "not a boolean"),
    }
}
