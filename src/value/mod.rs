//! Value model: typed port values and the coercion rules between them.
//!
//! Every value flowing along a connection is a [`DataValue`], a payload tagged
//! with a [`DataType`]. The `control-flow-excluded` scalar is the sentinel for
//! "this branch was not taken" and is never coerced.

pub mod coercion;
pub mod data_type;
pub mod data_value;

use std::collections::HashMap;

pub use coercion::{
    coerce_to_bool, coerce_to_chat_message, coerce_to_number, coerce_to_object,
    coerce_to_string, coerce_type, coerce_type_optional, expect_type, infer_type,
};
pub use data_type::{DataType, ScalarType};
pub use data_value::{ChatMessage, DataValue, LazyValue, Payload, LOOP_NOT_BROKEN};

/// Port id → value, as consumed by a node computation.
pub type Inputs = HashMap<String, DataValue>;
/// Port id → value, as produced by a node computation.
pub type Outputs = HashMap<String, DataValue>;
/// Graph input id → value.
pub type GraphInputs = HashMap<String, DataValue>;
/// Graph output id → value.
pub type GraphOutputs = HashMap<String, DataValue>;
