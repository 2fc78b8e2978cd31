//! Event encoding.
//!
//! Storage persists opaque payloads; a [`Codec`] turns events into bytes
//! and back. Decoding the output of `encode_event` must yield an equivalent
//! event.

use crate::model::TraceEvent;

/// Error type returned by codecs. Storage passes it through untouched.
pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

/// Encodes and decodes single trace events.
pub trait Codec: Send + Sync {
    fn encode_event(&self, event: &TraceEvent) -> Result<Vec<u8>, CodecError>;
    fn decode_event(&self, data: &[u8]) -> Result<TraceEvent, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode_event(&self, event: &TraceEvent) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(event)?)
    }

    fn decode_event(&self, data: &[u8]) -> Result<TraceEvent, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }
}
