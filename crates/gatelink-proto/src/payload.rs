//! The wire envelope shared by both directions.
//!
//! Every frame is a JSON object `{op, d, s, t}`. `s` (sequence) and `t`
//! (event name) are only meaningful on dispatches; client-originated frames
//! omit them entirely.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtoError;
use crate::opcode::OpCode;

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// Operation code.
    pub op: OpCode,
    /// Opcode-specific data.
    pub d: Value,
    /// Sequence number, only set on dispatches.
    pub s: Option<u64>,
    /// Event name, only set on dispatches.
    pub t: Option<String>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    op: u64,
    #[serde(default)]
    d: Value,
    s: Option<u64>,
    t: Option<String>,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a, T: Serialize + ?Sized> {
    op: u64,
    d: &'a T,
}

impl Payload {
    /// Create a non-dispatch payload.
    #[must_use]
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// Create a dispatch payload with a sequence number and event name.
    #[must_use]
    pub fn dispatch(sequence: u64, name: impl Into<String>, d: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d,
            s: Some(sequence),
            t: Some(name.into()),
        }
    }

    /// Deserialize the `d` field into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Decoding`] if the data does not match `T`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, ProtoError> {
        T::deserialize(&self.d).map_err(|e| ProtoError::Decoding(format!("{} data: {e}", self.op)))
    }

    /// Serialize the full envelope, including `s` and `t` when set.
    ///
    /// This is the server-side shape; clients send frames through [`encode`].
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown opcode.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        if !self.op.is_known() {
            return Err(ProtoError::InvalidOpCode(self.op.code()));
        }
        let mut envelope = serde_json::Map::new();
        envelope.insert("op".into(), Value::from(self.op.code()));
        envelope.insert("d".into(), self.d.clone());
        if let Some(s) = self.s {
            envelope.insert("s".into(), Value::from(s));
        }
        if let Some(t) = &self.t {
            envelope.insert("t".into(), Value::from(t.as_str()));
        }
        serde_json::to_string(&envelope).map_err(|e| ProtoError::Encoding(e.to_string()))
    }
}

/// Encode a client-originated frame. `s` and `t` are never written.
///
/// # Errors
///
/// Returns [`ProtoError::InvalidOpCode`] for [`OpCode::Unknown`] and
/// [`ProtoError::Encoding`] if `data` fails to serialize.
pub fn encode<T: Serialize + ?Sized>(op: OpCode, data: &T) -> Result<String, ProtoError> {
    if !op.is_known() {
        return Err(ProtoError::InvalidOpCode(op.code()));
    }
    serde_json::to_string(&OutboundEnvelope { op: op.code(), d: data })
        .map_err(|e| ProtoError::Encoding(e.to_string()))
}

/// Decode a frame.
///
/// Any structural failure is an `Err`; callers drop the frame and carry on.
/// An unrecognised opcode is not a failure: it decodes to
/// [`OpCode::Unknown`]. Sequence and event name are discarded on anything
/// that is not a dispatch.
///
/// # Errors
///
/// Returns [`ProtoError::Decoding`] if the bytes are not a JSON object with an
/// unsigned integer `op`.
pub fn decode(bytes: impl AsRef<[u8]>) -> Result<Payload, ProtoError> {
    let value: Value =
        serde_json::from_slice(bytes.as_ref()).map_err(|e| ProtoError::Decoding(e.to_string()))?;
    if !value.is_object() {
        return Err(ProtoError::Decoding("envelope is not an object".to_string()));
    }
    let raw = RawEnvelope::deserialize(value).map_err(|e| ProtoError::Decoding(e.to_string()))?;

    let op = OpCode::from_code(raw.op);
    let (s, t) = if op == OpCode::Dispatch {
        (raw.s, raw.t)
    } else {
        (None, None)
    };

    Ok(Payload { op, d: raw.d, s, t })
}
