use thiserror::Error;

use crate::properties::ResourceName;
use crate::properties::ResourceProperty;

/// Errors produced by the sizing pipeline.
///
/// Every variant is terminal for the admission request at hand: the caller
/// must drop the whole mutation instead of applying a partial patch. Whether
/// the pod is then admitted unchanged or rejected is a transport decision.
#[derive(Debug, Error)]
pub enum SizingError {
    /// A recognized annotation carries a value that does not parse, or a
    /// fraction outside (0, 1].
    #[error("invalid annotation value: {message}")]
    InvalidAnnotationValue { message: String },
    /// The pod does not carry the required single-node affinity shape, or
    /// the named node is missing from the capacity snapshot.
    #[error("cannot resolve target node: {message}")]
    NodeResolution { message: String },
    /// An operand binding expected by the algebra is absent. This is a
    /// contract violation with well-formed pods and fails loudly rather
    /// than defaulting to zero.
    #[error("no {property}/{resource} binding on operand")]
    MissingBinding {
        property: ResourceProperty,
        resource: ResourceName,
    },
}
