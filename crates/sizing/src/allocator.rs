//! Per-container proportional shares of a pod's declared resources.
//!
//! ```text
//!     Memory    Compute
//!     MR   ML   CR   CL
//!    ------------------
//! C1| 1    2    1    2         <- container absolute requirements (input)
//! C2| 2    2    2    2
//! C3| 3    5    3    5
//!
//! T | 6    9    6    9         <- pod totals (intermediate)
//!
//! P1| .16  .22  .16  .22       <- per-container share of the totals
//! P2| .33  .22  .33  .22          (output; sums to 1 per column)
//! P3| .50  .55  .50  .55
//! ```

use std::collections::BTreeSet;

use error_stack::Report;
use k8s_openapi::api::core::v1::Container;

use crate::error::SizingError;
use crate::properties::ResourceKind;
use crate::properties::ResourceProperties;

/// The allocator's view of one pod: a share set per container, in pod
/// order, and the summed resources of the excluded containers (the budget
/// calculator subtracts those from the pod's allotment).
#[derive(Debug, Default)]
pub struct PodAllocation {
    /// `None` marks an excluded container; it is never touched downstream.
    pub shares: Vec<Option<ResourceProperties>>,
    pub excluded_totals: ResourceProperties,
}

fn declared_properties(container: &Container) -> Result<ResourceProperties, Report<SizingError>> {
    let mut props = ResourceProperties::new();
    if let Some(resources) = &container.resources {
        props.bind_requirements(resources)?;
    }
    Ok(props)
}

/// Derive every container's relative share of the pod's own declared
/// resources, honoring the exclusion list.
///
/// For each (property, resource), a non-excluded container's share is its
/// declared value divided by the sum over all non-excluded containers. A
/// zero total yields no share for that coordinate: dividing by zero is
/// meaningless, not zero, and the containers are left untouched for it.
///
/// # Errors
///
/// - [`SizingError::InvalidAnnotationValue`] if a container declares an
///   unparseable quantity
pub fn allocate(
    containers: &[Container],
    excluded: &BTreeSet<String>,
) -> Result<PodAllocation, Report<SizingError>> {
    let declared: Vec<ResourceProperties> = containers
        .iter()
        .map(declared_properties)
        .collect::<Result<_, _>>()?;

    let mut totals = ResourceProperties::new();
    let mut excluded_totals = ResourceProperties::new();

    for (container, declared) in containers.iter().zip(&declared) {
        if excluded.contains(&container.name) {
            excluded_totals.add(declared);
        } else {
            totals.add(declared);
        }
    }

    let mut shares = Vec::with_capacity(containers.len());
    for (container, declared) in containers.iter().zip(&declared) {
        if excluded.contains(&container.name) {
            shares.push(None);
            continue;
        }

        let mut share = ResourceProperties::new();
        for binding in declared.bindings() {
            match totals.get(binding.property(), binding.resource()) {
                Some(total) if total != 0.0 => share.bind_value(
                    ResourceKind::Fraction,
                    binding.property(),
                    binding.resource().clone(),
                    binding.value() / total,
                ),
                // Zero totals only happen when every container declares 0;
                // no share means the coordinate is left alone downstream.
                _ => {}
            }
        }
        shares.push(Some(share));
    }

    Ok(PodAllocation {
        shares,
        excluded_totals,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::ResourceRequirements;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    use super::*;
    use crate::properties::ResourceName;
    use crate::properties::ResourceProperty;

    fn container(name: &str, requests: &[(&str, &str)], limits: &[(&str, &str)]) -> Container {
        let to_map = |entries: &[(&str, &str)]| -> Option<BTreeMap<String, Quantity>> {
            if entries.is_empty() {
                return None;
            }
            Some(
                entries
                    .iter()
                    .map(|(resource, value)| (resource.to_string(), Quantity(value.to_string())))
                    .collect(),
            )
        };
        Container {
            name: name.to_string(),
            resources: Some(ResourceRequirements {
                requests: to_map(requests),
                limits: to_map(limits),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn shares_are_declared_value_over_total() {
        let containers = vec![
            container("c1", &[("cpu", "100m"), ("memory", "100Mi")], &[]),
            container("c2", &[("cpu", "300m"), ("memory", "900Mi")], &[]),
        ];

        let allocation = allocate(&containers, &BTreeSet::new()).unwrap();
        let c1 = allocation.shares[0].as_ref().unwrap();
        let c2 = allocation.shares[1].as_ref().unwrap();

        let cpu = ResourceName::cpu();
        let memory = ResourceName::memory();
        assert!((c1.get(ResourceProperty::Requests, &cpu).unwrap() - 0.25).abs() < 1e-9);
        assert!((c2.get(ResourceProperty::Requests, &cpu).unwrap() - 0.75).abs() < 1e-9);
        assert!((c1.get(ResourceProperty::Requests, &memory).unwrap() - 0.1).abs() < 1e-9);
        assert!((c2.get(ResourceProperty::Requests, &memory).unwrap() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn shares_sum_to_one_per_coordinate() {
        let containers = vec![
            container("a", &[("cpu", "150m")], &[("memory", "1Gi")]),
            container("b", &[("cpu", "250m")], &[("memory", "3Gi")]),
            container("c", &[("cpu", "600m")], &[("memory", "512Mi")]),
        ];

        let allocation = allocate(&containers, &BTreeSet::new()).unwrap();
        for (property, resource) in [
            (ResourceProperty::Requests, ResourceName::cpu()),
            (ResourceProperty::Limits, ResourceName::memory()),
        ] {
            let sum: f64 = allocation
                .shares
                .iter()
                .flatten()
                .filter_map(|share| share.get(property, &resource))
                .sum();
            assert!((sum - 1.0).abs() < 1e-9, "{property}/{resource}: {sum}");
        }
    }

    #[test]
    fn excluded_containers_get_no_share_and_sum_separately() {
        let containers = vec![
            container("app", &[("cpu", "200m")], &[]),
            container("sidecar", &[("cpu", "600m")], &[]),
        ];
        let excluded = BTreeSet::from(["sidecar".to_string()]);

        let allocation = allocate(&containers, &excluded).unwrap();

        let app = allocation.shares[0].as_ref().unwrap();
        assert_eq!(
            app.get(ResourceProperty::Requests, &ResourceName::cpu()),
            Some(1.0),
            "the only included container owns the whole pod"
        );
        assert!(allocation.shares[1].is_none());
        assert!(
            (allocation
                .excluded_totals
                .get(ResourceProperty::Requests, &ResourceName::cpu())
                .unwrap()
                - 0.6)
                .abs()
                < 1e-9
        );
    }

    #[test]
    fn zero_total_yields_no_share() {
        let containers = vec![
            container("a", &[("cpu", "0")], &[]),
            container("b", &[("cpu", "0")], &[]),
        ];
        let allocation = allocate(&containers, &BTreeSet::new()).unwrap();
        for share in allocation.shares.iter().flatten() {
            assert_eq!(
                share.get(ResourceProperty::Requests, &ResourceName::cpu()),
                None
            );
        }
    }

    #[test]
    fn containers_without_resources_produce_empty_shares() {
        let containers = vec![Container {
            name: "bare".to_string(),
            ..Default::default()
        }];
        let allocation = allocate(&containers, &BTreeSet::new()).unwrap();
        assert!(allocation.shares[0].as_ref().unwrap().is_empty());
    }

    #[test]
    fn malformed_container_quantity_is_an_error() {
        let containers = vec![container("bad", &[("cpu", "lots")], &[])];
        assert!(allocate(&containers, &BTreeSet::new()).is_err());
    }
}
