//! The sizing pipeline: pod + node snapshot + annotations in, patch out.

use error_stack::Report;
use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use crate::allocator;
use crate::annotations::SizingAnnotations;
use crate::budget;
use crate::budget::NodeCapacityProvider;
use crate::error::SizingError;
use crate::node;
use crate::patch;

/// Compute the sizing patch for one admission request.
///
/// The whole computation is synchronous and stateless: a fresh read of the
/// node snapshot, no I/O, no retries. It either returns the complete patch
/// or an error; a partial patch is never produced. A pod with no sizing
/// annotations (or nothing eligible to resize) yields an empty patch and is
/// admitted unchanged.
///
/// The stage order is a strict invariant: the pod budget is clamped against
/// the configured bounds *before* distribution, and requests are forced
/// under limits only *after* distribution. Reordering changes results.
///
/// # Errors
///
/// - [`SizingError::InvalidAnnotationValue`] on malformed annotations or
///   container quantities
/// - [`SizingError::NodeResolution`] if the pinned node cannot be
///   determined or is absent from the snapshot
pub fn build_patch(
    pod: &Pod,
    nodes: &dyn NodeCapacityProvider,
) -> Result<Patch, Report<SizingError>> {
    let pod_annotations = pod.metadata.annotations.clone().unwrap_or_default();
    let sizing = SizingAnnotations::from_pod_annotations(&pod_annotations)?;
    if sizing.is_noop() {
        return Ok(Patch(Vec::new()));
    }

    let node_name = node::pinned_node_name(pod)?;
    let capacity = nodes.node_allocatable(&node_name).ok_or_else(|| {
        Report::new(SizingError::NodeResolution {
            message: format!("node {node_name} is not in the capacity snapshot"),
        })
    })?;

    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();
    let allocation = allocator::allocate(containers, &sizing.excluded_containers)?;

    let mut pod_budget = budget::pod_budget(&capacity, &sizing.properties, &allocation.excluded_totals);
    pod_budget.clamp(&sizing.properties);
    debug!(node = %node_name, budget = %pod_budget, "pod budget computed");

    let mut operations = Vec::new();
    for (index, share) in allocation.shares.iter().enumerate() {
        let Some(share) = share else { continue };
        let mut container_budget = share.mul(&pod_budget);
        container_budget.force_limit_above_request();
        operations.extend(patch::container_operations(index, &container_budget));
    }

    if !operations.is_empty() {
        operations.push(patch::status_operation(operations.len()));
    }
    debug!(operations = operations.len(), "sizing patch built");

    Ok(Patch(operations))
}
