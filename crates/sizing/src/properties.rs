//! Typed algebra over per-(property, resource) numeric bindings.
//!
//! Unlike the upstream API types, requests and limits (and the pod-level
//! bounds) are programmatically the same thing here: a float bound to a
//! (property, resource) coordinate. That uniformity keeps the arithmetic
//! short, at the cost of leaning on floats and their round-trip quirks.
//!
//! An absent binding always means "unset", never zero. `mul` and `div` drop
//! or reject unmatched bindings instead of conjuring zeros.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use error_stack::Report;
use k8s_openapi::api::core::v1::ResourceRequirements;
use tracing::warn;

use crate::error::SizingError;
use crate::quantity;

/// Identifies one resource dimension, `cpu` or `memory` in practice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn cpu() -> Self {
        Self("cpu".to_string())
    }

    pub fn memory() -> Self {
        Self("memory".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ResourceName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// The logical bucket a binding belongs to.
///
/// The declaration order is load-bearing for patch output: requests sort
/// before limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum ResourceProperty {
    #[display("requests")]
    Requests,
    #[display("limits")]
    Limits,
    #[display("pod-minimum")]
    PodMinimum,
    #[display("pod-maximum")]
    PodMaximum,
}

/// Tags how a value is parsed from and rendered back to text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A unitless ratio in (0, 1].
    Fraction,
    /// An absolute amount with a suffixed textual form.
    Quantity,
}

/// A value at one (kind, property, resource) coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    kind: ResourceKind,
    property: ResourceProperty,
    resource: ResourceName,
    value: f64,
}

impl Binding {
    pub fn new(
        kind: ResourceKind,
        property: ResourceProperty,
        resource: ResourceName,
        value: f64,
    ) -> Self {
        Self {
            kind,
            property,
            resource,
            value,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn property(&self) -> ResourceProperty {
        self.property
    }

    pub fn resource(&self) -> &ResourceName {
        &self.resource
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Canonical text form: fractions as plain decimals, quantities in the
    /// usual suffixed notation (`400m`, `2G`).
    pub fn human_value(&self) -> String {
        match self.kind {
            ResourceKind::Fraction => format!("{}", self.value),
            ResourceKind::Quantity => quantity::render(self.value),
        }
    }

    /// JSON-pointer path of this binding inside a pod's container list.
    pub fn json_path(&self, container_index: usize) -> String {
        format!(
            "/spec/containers/{container_index}/resources/{}/{}",
            self.property, self.resource
        )
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}={}={} ({:?})",
            self.property,
            self.resource,
            self.value,
            self.human_value(),
            self.kind
        )
    }
}

fn parse_fraction(text: &str) -> Result<f64, Report<SizingError>> {
    let value: f64 = text.trim().parse().map_err(|_| {
        Report::new(SizingError::InvalidAnnotationValue {
            message: format!("{text} is not a decimal fraction"),
        })
    })?;

    // NaN slips past both range checks below.
    if !value.is_finite() {
        return Err(Report::new(SizingError::InvalidAnnotationValue {
            message: format!("{text} is not a finite fraction"),
        }));
    }
    // 0 is forbidden too: it makes no sense as a request or limit.
    if value <= 0.0 {
        return Err(Report::new(SizingError::InvalidAnnotationValue {
            message: format!("{text} is not a valid fraction: cannot be <= 0"),
        }));
    }
    if value > 1.0 {
        return Err(Report::new(SizingError::InvalidAnnotationValue {
            message: format!("{text} is not a valid fraction: cannot be > 1"),
        }));
    }

    Ok(value)
}

/// One container's or pod's bindings at a pipeline stage.
///
/// At most one binding exists per (property, resource). Operations either
/// return a fresh set or mutate the receiver in place; two sets never share
/// a mutable binding.
#[derive(Debug, Clone, Default)]
pub struct ResourceProperties {
    props: BTreeMap<(ResourceProperty, ResourceName), Binding>,
}

impl ResourceProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Value of an existing binding, or `None` for an unbound coordinate.
    pub fn get(&self, property: ResourceProperty, resource: &ResourceName) -> Option<f64> {
        self.props
            .get(&(property, resource.clone()))
            .map(Binding::value)
    }

    /// Iterate bindings in (property, resource) order.
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.props.values()
    }

    /// Every resource name bound under any property.
    fn resource_names(&self) -> BTreeSet<ResourceName> {
        self.props
            .keys()
            .map(|(_, resource)| resource.clone())
            .collect()
    }

    /// Bind a value, creating the binding or overwriting an existing value.
    /// An existing binding keeps its kind; only the value moves.
    pub fn bind_value(
        &mut self,
        kind: ResourceKind,
        property: ResourceProperty,
        resource: ResourceName,
        value: f64,
    ) {
        match self.props.entry((property, resource)) {
            Entry::Occupied(mut occupied) => occupied.get_mut().value = value,
            Entry::Vacant(vacant) => {
                let (property, resource) = vacant.key().clone();
                vacant.insert(Binding::new(kind, property, resource, value));
            }
        }
    }

    /// Bind a value parsed from annotation text.
    ///
    /// Fractions must be decimals in (0, 1]; quantities accept anything the
    /// quantity grammar accepts, SI suffixes included.
    ///
    /// # Errors
    ///
    /// - [`SizingError::InvalidAnnotationValue`] if the text does not parse
    pub fn bind_parsed(
        &mut self,
        kind: ResourceKind,
        property: ResourceProperty,
        resource: ResourceName,
        text: &str,
    ) -> Result<(), Report<SizingError>> {
        let value = match kind {
            ResourceKind::Fraction => parse_fraction(text)?,
            ResourceKind::Quantity => quantity::parse(text)?,
        };
        self.bind_value(kind, property, resource, value);
        Ok(())
    }

    /// Merge a container's declared requests and limits into the receiver
    /// as quantity bindings.
    ///
    /// # Errors
    ///
    /// - [`SizingError::InvalidAnnotationValue`] if a declared quantity does
    ///   not parse
    pub fn bind_requirements(
        &mut self,
        requirements: &ResourceRequirements,
    ) -> Result<(), Report<SizingError>> {
        for (property, declared) in [
            (ResourceProperty::Requests, &requirements.requests),
            (ResourceProperty::Limits, &requirements.limits),
        ] {
            let Some(declared) = declared else { continue };
            for (name, declared_quantity) in declared {
                self.bind_value(
                    ResourceKind::Quantity,
                    property,
                    ResourceName::from(name.as_str()),
                    quantity::parse(&declared_quantity.0)?,
                );
            }
        }
        Ok(())
    }

    /// Sum the operand into the receiver, in place, creating bindings for
    /// coordinates the receiver does not have yet.
    pub fn add(&mut self, operand: &Self) {
        for (key, other) in &operand.props {
            match self.props.get_mut(key) {
                Some(ours) => ours.value += other.value,
                None => {
                    self.props.insert(key.clone(), other.clone());
                }
            }
        }
    }

    /// Multiply into a new set, over the intersection of both operands.
    /// Coordinates set on only one side are absent from the result, not
    /// zero. The result is a fraction only when both inputs are fractions.
    #[must_use]
    pub fn mul(&self, operand: &Self) -> Self {
        let mut result = Self::new();
        for (key, ours) in &self.props {
            let Some(theirs) = operand.props.get(key) else {
                continue;
            };
            let kind = if ours.kind == ResourceKind::Fraction && theirs.kind == ResourceKind::Fraction
            {
                ResourceKind::Fraction
            } else {
                ResourceKind::Quantity
            };
            result.bind_value(kind, key.0, key.1.clone(), ours.value * theirs.value);
        }
        result
    }

    /// Divide into a new set, driven by the receiver's bindings.
    ///
    /// Dividing two like kinds yields a fraction, mixed kinds a quantity.
    ///
    /// # Errors
    ///
    /// - [`SizingError::MissingBinding`] if a receiver binding has no
    ///   matching operand binding; like a division by zero, that is a
    ///   contract violation and never silently skipped
    pub fn div(&self, operand: &Self) -> Result<Self, Report<SizingError>> {
        let mut result = Self::new();
        for (key, ours) in &self.props {
            let theirs = operand.props.get(key).ok_or_else(|| {
                Report::new(SizingError::MissingBinding {
                    property: key.0,
                    resource: key.1.clone(),
                })
            })?;
            let kind = if ours.kind == theirs.kind {
                ResourceKind::Fraction
            } else {
                ResourceKind::Quantity
            };
            result.bind_value(kind, key.0, key.1.clone(), ours.value / theirs.value);
        }
        Ok(result)
    }

    /// Lower any request above its limit down to the limit, in place.
    ///
    /// Float imprecision occasionally leaves a distributed request a hair
    /// above its limit; this is the one silent correction in the pipeline,
    /// and it is idempotent. It never raises the limit.
    pub fn force_limit_above_request(&mut self) {
        for resource in self.resource_names() {
            let request = self.get(ResourceProperty::Requests, &resource);
            let limit = self.get(ResourceProperty::Limits, &resource);
            if let (Some(request), Some(limit)) = (request, limit) {
                if request > limit {
                    warn!(
                        resource = %resource,
                        request,
                        limit,
                        "lowering request to limit to absorb float rounding"
                    );
                    self.bind_value(
                        ResourceKind::Quantity,
                        ResourceProperty::Requests,
                        resource,
                        limit,
                    );
                }
            }
        }
    }

    /// Clamp every bound request and limit against the pod-minimum and
    /// pod-maximum bindings of `bounds`, in place. Resources without a
    /// configured bound are left alone.
    pub fn clamp(&mut self, bounds: &Self) {
        for resource in self.resource_names() {
            let minimum = bounds.get(ResourceProperty::PodMinimum, &resource);
            let maximum = bounds.get(ResourceProperty::PodMaximum, &resource);

            for property in [ResourceProperty::Limits, ResourceProperty::Requests] {
                let Some(binding) = self.props.get_mut(&(property, resource.clone())) else {
                    continue;
                };
                if let Some(minimum) = minimum {
                    if binding.value < minimum {
                        binding.value = minimum;
                    }
                }
                if let Some(maximum) = maximum {
                    if binding.value > maximum {
                        binding.value = maximum;
                    }
                }
            }
        }
    }
}

impl fmt::Display for ResourceProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for binding in self.bindings() {
            writeln!(f, "{binding}")?;
        }
        Ok(())
    }
}
