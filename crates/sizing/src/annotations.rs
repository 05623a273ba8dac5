//! Recognized sizing annotations and their mapping into algebra bindings.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use error_stack::Report;
use error_stack::ResultExt;

use crate::error::SizingError;
use crate::properties::ResourceKind;
use crate::properties::ResourceName;
use crate::properties::ResourceProperties;
use crate::properties::ResourceProperty;

/// Domain prefix for sizing annotations.
pub const SIZING_DOMAIN: &str = "node-sizing.dev";

/// Name of the status annotation written back into patched pods.
pub const STATUS_ANNOTATION: &str = "node-sizing.dev/status";

/// Fixed key table. Anything outside it is ignored; nothing here is
/// runtime-extensible on purpose.
const SUPPORTED: &[(&str, ResourceKind, ResourceProperty, &str)] = &[
    (
        "request-cpu-fraction",
        ResourceKind::Fraction,
        ResourceProperty::Requests,
        "cpu",
    ),
    (
        "request-memory-fraction",
        ResourceKind::Fraction,
        ResourceProperty::Requests,
        "memory",
    ),
    (
        "limit-cpu-fraction",
        ResourceKind::Fraction,
        ResourceProperty::Limits,
        "cpu",
    ),
    (
        "limit-memory-fraction",
        ResourceKind::Fraction,
        ResourceProperty::Limits,
        "memory",
    ),
    (
        "minimum-cpu",
        ResourceKind::Quantity,
        ResourceProperty::PodMinimum,
        "cpu",
    ),
    (
        "minimum-memory",
        ResourceKind::Quantity,
        ResourceProperty::PodMinimum,
        "memory",
    ),
    (
        "maximum-cpu",
        ResourceKind::Quantity,
        ResourceProperty::PodMaximum,
        "cpu",
    ),
    (
        "maximum-memory",
        ResourceKind::Quantity,
        ResourceProperty::PodMaximum,
        "memory",
    ),
];

/// Everything the operator configured on one pod: fraction and bound
/// bindings, plus the containers exempt from resizing.
#[derive(Debug, Clone, Default)]
pub struct SizingAnnotations {
    pub properties: ResourceProperties,
    pub excluded_containers: BTreeSet<String>,
}

impl SizingAnnotations {
    /// Parse the sizing annotations present on a pod.
    ///
    /// Unrecognized keys are ignored. A single malformed value fails the
    /// whole parse; a partially bound set is never returned.
    ///
    /// # Errors
    ///
    /// - [`SizingError::InvalidAnnotationValue`] if any recognized value is
    ///   malformed
    pub fn from_pod_annotations(
        annotations: &BTreeMap<String, String>,
    ) -> Result<Self, Report<SizingError>> {
        let mut result = Self::default();

        for (name, kind, property, resource) in SUPPORTED {
            let Some(value) = annotations.get(&format!("{SIZING_DOMAIN}/{name}")) else {
                continue;
            };
            result
                .properties
                .bind_parsed(*kind, *property, ResourceName::from(*resource), value)
                .attach_printable_lazy(|| format!("annotation {SIZING_DOMAIN}/{name}"))?;
        }

        if let Some(list) = annotations.get(&format!("{SIZING_DOMAIN}/exclude-containers")) {
            result.excluded_containers = list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(result)
    }

    /// A pod with no fraction or bound bindings has nothing to resize.
    pub fn is_noop(&self) -> bool {
        self.properties.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(key, value)| (format!("{SIZING_DOMAIN}/{key}"), value.to_string()))
            .collect()
    }

    #[test]
    fn parses_fractions_and_bounds() {
        let parsed = SizingAnnotations::from_pod_annotations(&annotations(&[
            ("request-cpu-fraction", "0.1"),
            ("limit-memory-fraction", "0.5"),
            ("minimum-cpu", "500m"),
            ("maximum-memory", "2Gi"),
        ]))
        .unwrap();

        let props = &parsed.properties;
        assert_eq!(
            props.get(ResourceProperty::Requests, &ResourceName::cpu()),
            Some(0.1)
        );
        assert_eq!(
            props.get(ResourceProperty::Limits, &ResourceName::memory()),
            Some(0.5)
        );
        assert_eq!(
            props.get(ResourceProperty::PodMinimum, &ResourceName::cpu()),
            Some(0.5)
        );
        assert_eq!(
            props.get(ResourceProperty::PodMaximum, &ResourceName::memory()),
            Some(2.0 * 1024.0 * 1024.0 * 1024.0)
        );
    }

    #[test]
    fn ignores_unrecognized_keys() {
        let mut map = annotations(&[("request-cpu-fraction", "0.2")]);
        map.insert("other.domain/annotation".to_string(), "junk".to_string());
        map.insert(
            format!("{SIZING_DOMAIN}/not-a-real-key"),
            "junk".to_string(),
        );

        let parsed = SizingAnnotations::from_pod_annotations(&map).unwrap();
        assert_eq!(
            parsed
                .properties
                .get(ResourceProperty::Requests, &ResourceName::cpu()),
            Some(0.2)
        );
        assert!(!parsed.is_noop());
    }

    #[test]
    fn malformed_value_fails_the_whole_parse() {
        let err = SizingAnnotations::from_pod_annotations(&annotations(&[
            ("request-cpu-fraction", "0.1"),
            ("request-memory-fraction", "1.5"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err.current_context(),
            SizingError::InvalidAnnotationValue { .. }
        ));
    }

    #[test]
    fn exclusion_list_is_split_and_trimmed() {
        let parsed = SizingAnnotations::from_pod_annotations(&annotations(&[
            ("request-cpu-fraction", "0.1"),
            ("exclude-containers", "istio-proxy, linkerd-init,,"),
        ]))
        .unwrap();
        assert_eq!(
            parsed.excluded_containers,
            ["istio-proxy", "linkerd-init"]
                .into_iter()
                .map(str::to_string)
                .collect()
        );
    }

    #[test]
    fn empty_annotations_are_a_noop() {
        let parsed = SizingAnnotations::from_pod_annotations(&BTreeMap::new()).unwrap();
        assert!(parsed.is_noop());
        assert!(parsed.excluded_containers.is_empty());
    }
}
