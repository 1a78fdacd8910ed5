use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scalar data types a port value may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Any,
    String,
    Number,
    Boolean,
    Date,
    Time,
    DateTime,
    Object,
    ChatMessage,
    GptFunction,
    Vector,
    ControlFlowExcluded,
}

impl ScalarType {
    pub const ALL: [ScalarType; 12] = [
        ScalarType::Any,
        ScalarType::String,
        ScalarType::Number,
        ScalarType::Boolean,
        ScalarType::Date,
        ScalarType::Time,
        ScalarType::DateTime,
        ScalarType::Object,
        ScalarType::ChatMessage,
        ScalarType::GptFunction,
        ScalarType::Vector,
        ScalarType::ControlFlowExcluded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::Any => "any",
            ScalarType::String => "string",
            ScalarType::Number => "number",
            ScalarType::Boolean => "boolean",
            ScalarType::Date => "date",
            ScalarType::Time => "time",
            ScalarType::DateTime => "datetime",
            ScalarType::Object => "object",
            ScalarType::ChatMessage => "chat-message",
            ScalarType::GptFunction => "gpt-function",
            ScalarType::Vector => "vector",
            ScalarType::ControlFlowExcluded => "control-flow-excluded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

/// Declared type of a value: a scalar, an array of a scalar (`string[]`), or an
/// on-demand function producing either (`fn<string>`, `fn<string[]>`).
///
/// Shape is derived from the tag only, never from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    Scalar(ScalarType),
    Array(ScalarType),
    Function { scalar: ScalarType, array: bool },
}

impl DataType {
    pub const ANY: DataType = DataType::Scalar(ScalarType::Any);
    pub const STRING: DataType = DataType::Scalar(ScalarType::String);
    pub const NUMBER: DataType = DataType::Scalar(ScalarType::Number);
    pub const BOOLEAN: DataType = DataType::Scalar(ScalarType::Boolean);
    pub const OBJECT: DataType = DataType::Scalar(ScalarType::Object);
    pub const CHAT_MESSAGE: DataType = DataType::Scalar(ScalarType::ChatMessage);
    pub const EXCLUDED: DataType = DataType::Scalar(ScalarType::ControlFlowExcluded);

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            DataType::Scalar(s) | DataType::Array(s) => *s,
            DataType::Function { scalar, .. } => *scalar,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, DataType::Array(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, DataType::Function { .. })
    }

    /// The type produced by evaluating a function type; identity otherwise.
    pub fn unwrap_function(&self) -> DataType {
        match *self {
            DataType::Function { scalar, array: true } => DataType::Array(scalar),
            DataType::Function { scalar, array: false } => DataType::Scalar(scalar),
            other => other,
        }
    }

    /// Array element type; identity for scalars.
    pub fn element_type(&self) -> DataType {
        DataType::Scalar(self.unwrap_function().scalar_type())
    }

    pub fn array_of(&self) -> DataType {
        DataType::Array(self.scalar_type())
    }

    pub fn function_of(&self) -> DataType {
        DataType::Function {
            scalar: self.scalar_type(),
            array: self.unwrap_function().is_array(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Scalar(s) => f.write_str(s.as_str()),
            DataType::Array(s) => write!(f, "{}[]", s.as_str()),
            DataType::Function { scalar, array } => {
                write!(f, "fn<{}{}>", scalar.as_str(), if *array { "[]" } else { "" })
            }
        }
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || format!("unknown data type '{}'", s);
        if let Some(inner) = s.strip_prefix("fn<").and_then(|r| r.strip_suffix('>')) {
            return match inner.parse::<DataType>()? {
                DataType::Scalar(scalar) => Ok(DataType::Function { scalar, array: false }),
                DataType::Array(scalar) => Ok(DataType::Function { scalar, array: true }),
                DataType::Function { .. } => Err(unknown()),
            };
        }
        if let Some(inner) = s.strip_suffix("[]") {
            return ScalarType::parse(inner).map(DataType::Array).ok_or_else(unknown);
        }
        ScalarType::parse(s).map(DataType::Scalar).ok_or_else(unknown)
    }
}

impl TryFrom<String> for DataType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}
