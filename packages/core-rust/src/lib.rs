//! Tollgate Core: transport-neutral data model for the gateway engine.
//!
//! Records published into the gateway (`Service`, `Application`) and the
//! structured rejection type (`PolicyFailure`) shared by policies, the
//! executor and failure translators.

pub mod failure;
pub mod policy;
pub mod route;
pub mod types;

pub use failure::{codes, FailureKind, PolicyFailure};
pub use policy::{PolicyConfig, ResponseOrder};
pub use route::{has_dot_segment, is_dot_segment, normalize_path, RouteError, RoutePattern};
pub use types::{
    Application, ApplicationKey, Contract, Endpoint, EndpointType, Service, ServiceKey, ServiceRef,
};
