//! Generic resource framework: path routing, entity validation and field
//! projection shared by every resource.

pub mod fields;
pub mod router;
pub mod runtime;

pub use fields::{EntityView, FieldMap, FieldSource, Projection, ProjectionError};
pub use router::{PathRouter, RouteError, Verb};
pub use runtime::{
    HandlerCall, ResourceDefinition, ResourceHandler, ResourceRequest, ResourceRuntime,
};
