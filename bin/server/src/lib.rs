//! mobility-relay server.
//!
//! Hosts the webhook ingress and the conversation worker pool in one
//! process. Both sides meet only at the NATS-backed queue and stores.

pub mod config;
pub mod error;
pub mod ingress;
