//! Node-proportional pod resource sizing.
//!
//! Given a pod pinned to a node, the annotations its operator configured,
//! and a snapshot of node capacities, this crate computes the JSON patch
//! that resizes the pod's container requests and limits proportionally to
//! the node's capacity. The main pieces are:
//!
//! - [`properties`]: a typed algebra over per-(property, resource) bindings
//! - [`annotations`]: the recognized annotation keys and their parsing
//! - [`allocator`]: per-container shares of the pod's declared resources
//! - [`budget`]: the pod-level budget from node capacity and fractions
//! - [`node`]: pinned-node resolution from required node affinity
//! - [`build_patch`]: the pipeline tying it all together
//!
//! Each admission request is computed independently from fresh inputs; the
//! crate holds no state, performs no I/O and exposes nothing async.

pub mod allocator;
pub mod annotations;
pub mod budget;
pub mod error;
pub mod node;
mod patch;
mod pipeline;
pub mod properties;
pub mod quantity;

pub use annotations::SizingAnnotations;
pub use budget::NodeCapacityProvider;
pub use error::SizingError;
pub use pipeline::build_patch;
