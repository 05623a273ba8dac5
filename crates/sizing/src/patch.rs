//! Rendering of final container budgets into JSON patch operations.

use json_patch::AddOperation;
use json_patch::PatchOperation;
use json_patch::ReplaceOperation;
use serde_json::Value;

use crate::properties::ResourceProperties;

/// JSON-pointer path of the status annotation, `/` escaped per RFC 6901.
const STATUS_ANNOTATION_PATH: &str = "/metadata/annotations/node-sizing.dev~1status";

/// One `replace` per binding of the container's final budget, at the
/// container's requests/limits path. Requests sort before limits, resources
/// by name; the output order is deterministic.
pub(crate) fn container_operations(
    container_index: usize,
    budget: &ResourceProperties,
) -> Vec<PatchOperation> {
    budget
        .bindings()
        .map(|binding| {
            PatchOperation::Replace(ReplaceOperation {
                path: binding.json_path(container_index),
                value: Value::String(binding.human_value()),
            })
        })
        .collect()
}

/// The single trailing status annotation recording how many replace
/// operations the mutation emitted.
pub(crate) fn status_operation(patch_count: usize) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: STATUS_ANNOTATION_PATH.to_string(),
        value: Value::String(format!("patch_count={patch_count}")),
    })
}
