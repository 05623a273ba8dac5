//! Pod-level resource budgets derived from node capacity.

use std::collections::BTreeMap;

use crate::properties::ResourceKind;
use crate::properties::ResourceName;
use crate::properties::ResourceProperties;
use crate::properties::ResourceProperty;

/// Synchronous read access to the cluster's node capacity snapshot.
///
/// The snapshot itself is maintained elsewhere, by a watch kept warm in the
/// background; the pipeline only performs an in-memory lookup per request
/// and never blocks or retries. `None` for an unknown node surfaces as a
/// node resolution failure upstream.
pub trait NodeCapacityProvider {
    /// Allocatable capacity of `node_name`, as approximate floats per
    /// resource, or `None` if the node is not in the snapshot.
    fn node_allocatable(&self, node_name: &str) -> Option<BTreeMap<ResourceName, f64>>;
}

/// Derive the pod's absolute budget from node capacity and the configured
/// fractions:
///
/// `budget = node_allocatable * fraction - excluded_container_totals`
///
/// Resources with no configured fraction (or absent from the node) are
/// omitted from the budget; downstream `mul` then drops them, leaving those
/// container values unmodified. Exclusion sums can push a budget below
/// zero; that passes through unguarded.
pub fn pod_budget(
    capacity: &BTreeMap<ResourceName, f64>,
    fractions: &ResourceProperties,
    excluded_totals: &ResourceProperties,
) -> ResourceProperties {
    let mut budget = ResourceProperties::new();

    for binding in fractions.bindings() {
        // The pod-minimum/pod-maximum bounds live in the same set; only the
        // request/limit fractions scale node capacity.
        if !matches!(
            binding.property(),
            ResourceProperty::Requests | ResourceProperty::Limits
        ) {
            continue;
        }
        let Some(node_value) = capacity.get(binding.resource()) else {
            continue;
        };
        let excluded = excluded_totals
            .get(binding.property(), binding.resource())
            .unwrap_or(0.0);
        budget.bind_value(
            ResourceKind::Quantity,
            binding.property(),
            binding.resource().clone(),
            node_value * binding.value() - excluded,
        );
    }

    budget
}
