//! Coercion between declared data types.
//!
//! Rules are applied in a fixed order: array wrapping of a matching scalar,
//! then the per-target conversions for string, boolean, chat-message, number
//! and object. The control-flow-excluded sentinel never coerces to anything.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde_json::{json, Number, Value};

use super::data_type::{DataType, ScalarType};
use super::data_value::{ChatMessage, DataValue, LazyValue, Payload};
use crate::error::{NodeError, NodeResult};

/// Best-effort type of a raw JSON payload.
pub fn infer_type(value: &Value) -> DataType {
    match value {
        Value::Null => DataType::ANY,
        Value::String(_) => DataType::STRING,
        Value::Number(_) => DataType::NUMBER,
        Value::Bool(_) => DataType::BOOLEAN,
        Value::Array(items) => match items.first().map(infer_type) {
            Some(DataType::Scalar(s)) if s != ScalarType::Any => DataType::Array(s),
            _ => DataType::Array(ScalarType::Any),
        },
        Value::Object(map) => {
            if map.get("type").is_some_and(Value::is_string)
                && map.get("message").is_some_and(Value::is_string)
            {
                DataType::CHAT_MESSAGE
            } else {
                DataType::OBJECT
            }
        }
    }
}

/// Splits an array-typed value into per-element values. `any` and `object`
/// values are also split when their payload is a runtime array.
fn elements(value: &DataValue) -> Option<Vec<DataValue>> {
    let payload = value.value();
    match value.data_type {
        DataType::Array(scalar) => {
            let items = match payload {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            Some(
                items
                    .into_iter()
                    .map(|item| {
                        let t = if scalar == ScalarType::Any {
                            infer_type(&item)
                        } else {
                            DataType::Scalar(scalar)
                        };
                        DataValue::new(t, item)
                    })
                    .collect(),
            )
        }
        DataType::Scalar(ScalarType::Any | ScalarType::Object) => match payload {
            Value::Array(items) => Some(
                items
                    .into_iter()
                    .map(|item| DataValue::new(infer_type(&item), item))
                    .collect(),
            ),
            _ => None,
        },
        _ => None,
    }
}

fn format_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

fn json_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number(n),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_number_prefix(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(n) = text.parse::<f64>() {
        return Some(n);
    }
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let digits_start = end;
    let mut seen_dot = false;
    while let Some(&b) = bytes.get(end) {
        match b {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    if !text[digits_start..end].bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    text[..end].trim_end_matches('.').parse::<f64>().ok()
}

fn parse_epoch_millis(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis() as f64);
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc().timestamp_millis() as f64);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis() as f64);
    }
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(text, format) {
            return Some(
                time.num_seconds_from_midnight() as f64 * 1000.0
                    + (time.nanosecond() / 1_000_000) as f64,
            );
        }
    }
    None
}

pub fn coerce_to_string(value: Option<&DataValue>) -> Option<String> {
    let value = value?.unwrap_function();
    if value.is_excluded() {
        return None;
    }
    if let Some(items) = elements(&value) {
        return Some(
            items
                .iter()
                .filter_map(|item| coerce_to_string(Some(item)))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    let payload = value.value();
    match value.data_type.scalar_type() {
        ScalarType::Any => {
            if payload.is_null() {
                None
            } else {
                coerce_to_string(Some(&DataValue::new(infer_type(&payload), payload)))
            }
        }
        ScalarType::ChatMessage => payload.get("message").map(json_to_text),
        ScalarType::Object | ScalarType::Vector | ScalarType::GptFunction => match payload {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        },
        _ => match payload {
            Value::Null => None,
            other => Some(json_to_text(&other)),
        },
    }
}

pub fn coerce_to_bool(value: Option<&DataValue>) -> bool {
    let Some(value) = value else {
        return false;
    };
    let value = value.unwrap_function();
    if value.is_excluded() {
        return false;
    }
    if let Some(items) = elements(&value) {
        return !items.is_empty() && items.iter().all(|item| coerce_to_bool(Some(item)));
    }
    let payload = value.value();
    match value.data_type.scalar_type() {
        ScalarType::Any => {
            !payload.is_null() && coerce_to_bool(Some(&DataValue::new(infer_type(&payload), payload)))
        }
        ScalarType::String => {
            let text = json_to_text(&payload);
            !text.is_empty() && text != "false"
        }
        ScalarType::Number => payload.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        ScalarType::Boolean => payload.as_bool().unwrap_or(false),
        ScalarType::ChatMessage => payload
            .get("message")
            .and_then(Value::as_str)
            .is_some_and(|m| !m.is_empty()),
        _ => !payload.is_null(),
    }
}

pub fn coerce_to_number(value: Option<&DataValue>) -> Option<f64> {
    let value = value?.unwrap_function();
    if value.is_excluded() || value.data_type.is_array() {
        return None;
    }
    let payload = value.value();
    match value.data_type.scalar_type() {
        ScalarType::Any => {
            if payload.is_null() || payload.is_array() {
                None
            } else {
                coerce_to_number(Some(&DataValue::new(infer_type(&payload), payload)))
            }
        }
        ScalarType::String => parse_number_prefix(&json_to_text(&payload)),
        ScalarType::Number => payload.as_f64(),
        ScalarType::Boolean => payload.as_bool().map(|b| if b { 1.0 } else { 0.0 }),
        ScalarType::Date | ScalarType::Time | ScalarType::DateTime => match &payload {
            Value::Number(n) => n.as_f64(),
            other => parse_epoch_millis(&json_to_text(other)),
        },
        ScalarType::ChatMessage => payload
            .get("message")
            .and_then(Value::as_str)
            .and_then(parse_number_prefix),
        _ => payload.as_f64(),
    }
}

pub fn coerce_to_chat_message(value: Option<&DataValue>) -> Option<ChatMessage> {
    let value = value?.unwrap_function();
    if value.is_excluded() {
        return None;
    }
    let payload = value.value();
    match value.data_type {
        DataType::Scalar(ScalarType::String) => Some(ChatMessage::user(json_to_text(&payload))),
        DataType::Scalar(ScalarType::ChatMessage | ScalarType::Object | ScalarType::Any) => {
            match payload {
                Value::String(s) => Some(ChatMessage::user(s)),
                other => serde_json::from_value(other).ok(),
            }
        }
        _ => None,
    }
}

pub fn coerce_to_object(value: Option<&DataValue>) -> Option<Value> {
    let value = value?.unwrap_function();
    if value.is_excluded() {
        return None;
    }
    Some(value.value()).filter(|v| !v.is_null())
}

fn coerce_to_temporal(value: &DataValue, scalar: ScalarType) -> Option<DataValue> {
    let target = DataType::Scalar(scalar);
    match value.value() {
        Value::String(s) => Some(DataValue::new(target, Value::String(s))),
        Value::Number(n) => {
            let millis = n.as_f64()? as i64;
            let dt = DateTime::from_timestamp_millis(millis)?;
            let text = match scalar {
                ScalarType::Date => dt.format("%Y-%m-%d").to_string(),
                ScalarType::Time => dt.format("%H:%M:%S").to_string(),
                _ => dt.to_rfc3339(),
            };
            Some(DataValue::new(target, Value::String(text)))
        }
        _ => None,
    }
}

/// Converts `value` to `target`, returning `None` when no conversion applies.
pub fn coerce_type_optional(value: Option<&DataValue>, target: DataType) -> Option<DataValue> {
    let value = value?;
    if value.is_excluded() {
        return None;
    }

    if target.is_function() {
        if value.data_type.is_function() {
            return Some(value.clone());
        }
        let produced = coerce_type_optional(Some(value), target.unwrap_function())?.value();
        return Some(DataValue {
            data_type: target,
            payload: Payload::Lazy(LazyValue::constant(produced)),
        });
    }

    let value = value.unwrap_function();
    if value.data_type == target {
        return Some(value);
    }

    match target {
        DataType::Array(ScalarType::Any) => {
            let items = elements(&value).unwrap_or_else(|| vec![value.clone()]);
            Some(DataValue::new(
                target,
                Value::Array(items.iter().map(DataValue::value).collect()),
            ))
        }
        DataType::Array(element) => {
            let items = elements(&value).unwrap_or_else(|| vec![value.clone()]);
            let coerced = items
                .iter()
                .map(|item| {
                    coerce_type_optional(Some(item), DataType::Scalar(element)).map(|d| d.value())
                })
                .collect::<Option<Vec<_>>>()?;
            Some(DataValue::new(target, Value::Array(coerced)))
        }
        DataType::Scalar(scalar) => match scalar {
            ScalarType::Any => Some(value),
            ScalarType::String => coerce_to_string(Some(&value)).map(DataValue::string),
            ScalarType::Boolean => Some(DataValue::boolean(coerce_to_bool(Some(&value)))),
            ScalarType::Number => coerce_to_number(Some(&value)).map(DataValue::number),
            ScalarType::ChatMessage => {
                coerce_to_chat_message(Some(&value)).map(DataValue::chat_message)
            }
            ScalarType::Object => coerce_to_object(Some(&value)).map(DataValue::object),
            ScalarType::Date | ScalarType::Time | ScalarType::DateTime => {
                coerce_to_temporal(&value, scalar)
            }
            ScalarType::Vector => {
                let payload = value.value();
                let numeric = payload
                    .as_array()
                    .is_some_and(|items| items.iter().all(Value::is_number));
                numeric.then(|| DataValue::new(target, payload))
            }
            ScalarType::GptFunction => {
                let payload = value.value();
                payload.is_object().then(|| DataValue::new(target, payload))
            }
            ScalarType::ControlFlowExcluded => None,
        },
        DataType::Function { .. } => None,
    }
}

/// Like [`coerce_type_optional`], failing with a type mismatch instead of `None`.
pub fn coerce_type(value: Option<&DataValue>, target: DataType) -> NodeResult<DataValue> {
    coerce_type_optional(value, target).ok_or_else(|| NodeError::TypeMismatch {
        expected: target.to_string(),
        actual: value
            .map(|v| v.data_type.to_string())
            .unwrap_or_else(|| "undefined".to_string()),
    })
}

/// Strict check: the tag must match exactly, except that `any` accepts
/// everything and an array type accepts a scalar of its element type or an
/// `any`/`object` value carrying a runtime array.
pub fn expect_type(value: Option<&DataValue>, expected: DataType) -> NodeResult<Value> {
    let mismatch = |actual: String| NodeError::TypeMismatch {
        expected: expected.to_string(),
        actual,
    };
    let value = value.ok_or_else(|| mismatch("undefined".to_string()))?;

    if expected == DataType::ANY
        || expected == DataType::Array(ScalarType::Any)
        || value.data_type == expected
    {
        return Ok(value.value());
    }
    if let DataType::Array(element) = expected {
        if value.data_type == DataType::Scalar(element) {
            return Ok(json!([value.value()]));
        }
        let lenient = matches!(
            value.data_type,
            DataType::Scalar(ScalarType::Any | ScalarType::Object)
        );
        let payload = value.value();
        if lenient && payload.is_array() {
            return Ok(payload);
        }
    }
    Err(mismatch(value.data_type.to_string()))
}
