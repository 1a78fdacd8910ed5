use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use super::data_type::{DataType, ScalarType};

/// Payload of the excluded sentinel emitted on a loop controller's `break`
/// port while the loop is still iterating.
pub const LOOP_NOT_BROKEN: &str = "loop-not-broken";

/// Zero-argument producer backing an on-demand (`fn<...>`) value.
#[derive(Clone)]
pub struct LazyValue(Arc<dyn Fn() -> Value + Send + Sync>);

impl LazyValue {
    pub fn new(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn constant(value: Value) -> Self {
        Self::new(move || value.clone())
    }

    pub fn evaluate(&self) -> Value {
        (self.0)()
    }
}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LazyValue(..)")
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Json(Value),
    Lazy(LazyValue),
}

/// A chat message payload (`{"type": "user", "message": "..."}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub role: String,
    pub message: String,
}

impl ChatMessage {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            message: message.into(),
        }
    }
}

/// A typed value flowing through a port.
#[derive(Debug, Clone)]
pub struct DataValue {
    pub data_type: DataType,
    pub payload: Payload,
}

impl DataValue {
    pub fn new(data_type: DataType, value: Value) -> Self {
        Self {
            data_type,
            payload: Payload::Json(value),
        }
    }

    /// An on-demand value of type `fn<produces>`.
    pub fn lazy(produces: DataType, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            data_type: produces.function_of(),
            payload: Payload::Lazy(LazyValue::new(f)),
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(DataType::STRING, Value::String(s.into()))
    }

    pub fn number(n: f64) -> Self {
        Self::new(DataType::NUMBER, json!(n))
    }

    pub fn boolean(b: bool) -> Self {
        Self::new(DataType::BOOLEAN, Value::Bool(b))
    }

    pub fn object(v: Value) -> Self {
        Self::new(DataType::OBJECT, v)
    }

    pub fn any(v: Value) -> Self {
        Self::new(DataType::ANY, v)
    }

    pub fn chat_message(message: ChatMessage) -> Self {
        Self::new(DataType::CHAT_MESSAGE, json!(message))
    }

    pub fn string_array(items: Vec<String>) -> Self {
        Self::new(DataType::Array(ScalarType::String), json!(items))
    }

    pub fn excluded() -> Self {
        Self::new(DataType::EXCLUDED, Value::Null)
    }

    pub fn loop_not_broken() -> Self {
        Self::new(DataType::EXCLUDED, Value::String(LOOP_NOT_BROKEN.to_string()))
    }

    pub fn is_excluded(&self) -> bool {
        self.data_type == DataType::EXCLUDED
    }

    pub fn is_loop_not_broken(&self) -> bool {
        self.is_excluded()
            && matches!(&self.payload, Payload::Json(Value::String(s)) if s == LOOP_NOT_BROKEN)
    }

    /// The payload, evaluating the producer of an on-demand value.
    pub fn value(&self) -> Value {
        match &self.payload {
            Payload::Json(v) => v.clone(),
            Payload::Lazy(lazy) => lazy.evaluate(),
        }
    }

    /// Borrow the payload when it is not on-demand.
    pub fn as_json(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Json(v) => Some(v),
            Payload::Lazy(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    /// Evaluates an on-demand value into its produced type; identity otherwise.
    pub fn unwrap_function(&self) -> DataValue {
        match &self.payload {
            Payload::Lazy(lazy) => DataValue::new(self.data_type.unwrap_function(), lazy.evaluate()),
            Payload::Json(_) => self.clone(),
        }
    }
}

impl PartialEq for DataValue {
    fn eq(&self, other: &Self) -> bool {
        self.data_type == other.data_type && self.value() == other.value()
    }
}

#[derive(Serialize, Deserialize)]
struct DataValueRepr {
    #[serde(rename = "type")]
    data_type: DataType,
    #[serde(default)]
    value: Value,
}

impl Serialize for DataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DataValueRepr {
            data_type: self.data_type,
            value: self.value(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DataValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = DataValueRepr::deserialize(deserializer)?;
        let payload = if repr.data_type.is_function() {
            Payload::Lazy(LazyValue::constant(repr.value))
        } else {
            Payload::Json(repr.value)
        };
        Ok(DataValue {
            data_type: repr.data_type,
            payload,
        })
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::string(s)
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::string(s)
    }
}

impl From<f64> for DataValue {
    fn from(n: f64) -> Self {
        DataValue::number(n)
    }
}

impl From<i64> for DataValue {
    fn from(n: i64) -> Self {
        DataValue::new(DataType::NUMBER, json!(n))
    }
}

impl From<i32> for DataValue {
    fn from(n: i32) -> Self {
        DataValue::new(DataType::NUMBER, json!(n))
    }
}

impl From<bool> for DataValue {
    fn from(b: bool) -> Self {
        DataValue::boolean(b)
    }
}

impl From<Vec<String>> for DataValue {
    fn from(items: Vec<String>) -> Self {
        DataValue::string_array(items)
    }
}
