//! Request pipeline: transport-neutral messages and the policy executor.
//!
//! - [`body`]: streaming body representation
//! - [`message`]: `GatewayRequest` / `GatewayResponse`
//! - [`executor`]: the per-request state machine

pub mod body;
pub mod executor;
pub mod message;

pub use body::{Body, BoxError};
pub use executor::{ExecutionOutcome, PhaseTimeouts, PipelineState, PolicyExecutor};
pub use message::{GatewayRequest, GatewayResponse};
