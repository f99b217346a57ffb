//! # gatelink-proto
//!
//! Wire definitions for the real-time event gateway: the JSON envelope,
//! opcodes, close codes, and the typed payloads exchanged during the
//! handshake.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod close;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod opcode;
pub mod payload;

pub use close::CloseCode;
pub use endpoint::{GatewayEndpoint, SessionStartLimit};
pub use error::ProtoError;
pub use handshake::{ConnectionProperties, Hello, Identify, Intents, Ready, Resume};
pub use opcode::OpCode;
pub use payload::{decode, encode, Payload};
