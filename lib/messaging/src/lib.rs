//! WhatsApp provider integration.
//!
//! Inbound webhook parsing and signature checks for ingress, and the reply
//! sender used by workers. Infobip is the only provider wired up.

pub mod error;
pub mod inbound;
pub mod infobip;
pub mod signature;

pub use error::{InboundError, SendError, SignatureError};
pub use inbound::{InboundMessage, Provider};
pub use infobip::{InfobipClient, InfobipConfig, MAX_REPLY_CHARS, ReplySender};
pub use signature::{SIGNATURE_HEADER, sign, verify_signature};
