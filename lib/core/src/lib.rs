//! Core domain types and utilities for mobility-relay.
//!
//! This crate provides the identifiers, addressing types and error handling
//! shared by the ingress, the state store and the conversation worker.

pub mod address;
pub mod error;
pub mod id;

pub use address::{CorrelationId, SenderAddress};
pub use error::Result;
pub use id::{DeadLetterId, TurnId};
