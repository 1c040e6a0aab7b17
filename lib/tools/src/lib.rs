//! Tool registry for mobility-relay.
//!
//! This crate provides:
//!
//! - **OpenAPI import**: turns the Mobility API description into tool
//!   definitions, one per operation
//! - **Tool Registry**: the immutable name -> definition map presented to the
//!   model and used for dispatch
//! - **Invoker**: executes a tool call against the upstream REST API

pub mod definition;
pub mod error;
pub mod invoke;
pub mod openapi;
pub mod registry;

pub use definition::{
    BodyEncoding, BodyShape, BodySpec, HttpMethod, ParameterLocation, ToolDefinition,
};
pub use error::{InvokerConfigError, SchemaError, ToolExecutionError};
pub use invoke::{ApiInvoker, ApiInvokerConfig, PreparedBody, PreparedRequest, ToolInvoker};
pub use registry::ToolRegistry;
