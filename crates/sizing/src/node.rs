//! Extraction of the pinned node name from a pod's required node affinity.

use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;

use crate::error::SizingError;

fn unresolvable(message: impl Into<String>) -> Report<SizingError> {
    Report::new(SizingError::NodeResolution {
        message: message.into(),
    })
}

/// Resolve the node a pod is pinned to.
///
/// At admission time `spec.nodeName` is still unset for CREATE, so the
/// target node is read from the required node affinity instead. Eligible
/// pods must carry this exact shape and nothing else:
///
/// ```yaml
/// spec:
///   affinity:
///     nodeAffinity:
///       requiredDuringSchedulingIgnoredDuringExecution:
///         nodeSelectorTerms:
///         - matchFields:
///           - key: metadata.name
///             operator: In
///             values:
///             - some-node-name
/// ```
///
/// # Errors
///
/// - [`SizingError::NodeResolution`] on any deviation: missing affinity,
///   more than one term, field or value, wrong key or operator
pub fn pinned_node_name(pod: &Pod) -> Result<String, Report<SizingError>> {
    let terms = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.affinity.as_ref())
        .and_then(|affinity| affinity.node_affinity.as_ref())
        .and_then(|node_affinity| {
            node_affinity
                .required_during_scheduling_ignored_during_execution
                .as_ref()
        })
        .map(|selector| &selector.node_selector_terms)
        .ok_or_else(|| unresolvable("pod has no required node affinity"))?;

    let [term] = terms.as_slice() else {
        return Err(unresolvable(format!(
            "expected exactly one node selector term, found {}",
            terms.len()
        )));
    };

    let fields = term.match_fields.as_deref().unwrap_or_default();
    let [field] = fields else {
        return Err(unresolvable(format!(
            "expected exactly one match field, found {}",
            fields.len()
        )));
    };

    if field.key != "metadata.name" || field.operator != "In" {
        return Err(unresolvable(format!(
            "expected a metadata.name In match field, found {} {}",
            field.key, field.operator
        )));
    }

    let values = field.values.as_deref().unwrap_or_default();
    let [value] = values else {
        return Err(unresolvable(format!(
            "expected exactly one node name value, found {}",
            values.len()
        )));
    };

    Ok(value.clone())
}
