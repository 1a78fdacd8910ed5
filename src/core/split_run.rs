//! Per-index fan-out over array inputs.

use std::future::Future;

use futures::future::join_all;
use serde_json::Value;

use crate::error::{NodeError, NodeResult};
use crate::value::{DataType, DataValue, Inputs, Outputs};

/// Number of computations a split run performs: the longest array input,
/// scalars counting as one, capped at `max`.
pub fn split_count(inputs: &Inputs, max: usize) -> usize {
    inputs
        .values()
        .map(|value| match value.value() {
            Value::Array(items) if value.data_type.is_array() => items.len(),
            _ => 1,
        })
        .max()
        .unwrap_or(1)
        .min(max)
}

/// Inputs of one index: array inputs contribute their `index`th element,
/// scalars are passed unchanged. Arrays shorter than `index` drop the port.
pub fn slice_inputs(inputs: &Inputs, index: usize) -> Inputs {
    let mut sliced = Inputs::new();
    for (port, value) in inputs {
        if !value.data_type.is_array() {
            sliced.insert(port.clone(), value.clone());
            continue;
        }
        if let Value::Array(items) = value.value() {
            if let Some(item) = items.get(index) {
                sliced.insert(
                    port.clone(),
                    DataValue::new(value.data_type.element_type(), item.clone()),
                );
            }
        }
    }
    sliced
}

/// Runs `compute` once per index concurrently and folds the per-index
/// outputs back into arrays, in index order.
pub async fn run_split<F, Fut>(inputs: &Inputs, max: usize, compute: F) -> NodeResult<Outputs>
where
    F: Fn(usize, Inputs) -> Fut,
    Fut: Future<Output = NodeResult<Outputs>>,
{
    let count = split_count(inputs, max);
    let results = join_all((0..count).map(|i| compute(i, slice_inputs(inputs, i)))).await;
    aggregate(results)
}

fn aggregate(results: Vec<NodeResult<Outputs>>) -> NodeResult<Outputs> {
    let mut per_index = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(outputs) => per_index.push(outputs),
            Err(e) => errors.push(e),
        }
    }

    if errors.iter().any(NodeError::is_aborted) {
        return Err(NodeError::Aborted);
    }
    if errors.len() == 1 {
        return Err(errors.remove(0));
    }
    if !errors.is_empty() {
        let message = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        return Err(NodeError::SplitRun(message));
    }

    let mut ports: Vec<&String> = per_index.iter().flat_map(|o| o.keys()).collect();
    ports.sort();
    ports.dedup();

    let mut outputs = Outputs::new();
    for port in ports {
        let values: Vec<&DataValue> = per_index.iter().filter_map(|o| o.get(port)).collect();
        if values.iter().all(|v| v.is_excluded()) {
            outputs.insert(port.clone(), DataValue::excluded());
            continue;
        }
        let element = values
            .first()
            .map(|v| v.data_type.clone())
            .filter(|t| !t.is_array() && *t != DataType::EXCLUDED)
            .unwrap_or(DataType::ANY);
        let items: Vec<Value> = values.iter().map(|v| v.value()).collect();
        outputs.insert(
            port.clone(),
            DataValue::new(element.array_of(), Value::Array(items)),
        );
    }
    Ok(outputs)
}
