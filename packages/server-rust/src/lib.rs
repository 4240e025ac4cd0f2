//! Tollgate Server: policy-enforcing API gateway engine.
//!
//! Requests resolve to a published service, pass through the policy chain
//! built from the caller's contract and the service, and are forwarded to
//! the backend exactly once; any policy failure short-circuits into a
//! translated response.

pub mod connector;
pub mod engine;
pub mod failure;
pub mod network;
pub mod pipeline;
pub mod policy;
pub mod registry;
pub mod service;
pub mod state;
pub mod traits;
pub mod worker;

pub use engine::{Gateway, GatewayBuilder, GatewayConfig};
pub use failure::HttpFailureTranslator;
pub use traits::{Connector, ConnectorFactory, FailureTranslator, PolicyFactory, Registry, SharedStateStore};
