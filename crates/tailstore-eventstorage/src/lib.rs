//! Event storage for tail-based sampling over TailStore
//!
//! Buffers trace events per trace until a sampling decision is made, and
//! records that decision durably.
//!
//! # Architecture
//!
//! - [`Storage`] binds an engine, a [`Codec`], an entry TTL and a storage
//!   limit, and hands out writers
//! - [`ReadWriter`] wraps one engine transaction: buffered writes,
//!   read-your-own-writes lookups, per-trace prefix scans, explicit flush
//! - [`ShardedReadWriter`] pins each trace ID to one of a fixed set of
//!   ReadWriters so traces can be ingested in parallel
//!
//! Keys are `trace_id` for decisions and `trace_id ':' event_id` for
//! events; see [`keys`].

pub mod codec;
pub mod config;
pub mod error;
pub mod flusher;
pub mod keys;
pub mod model;
pub mod readwriter;
pub mod sharded;
pub mod storage;

pub use codec::{Codec, CodecError, JsonCodec};
pub use config::{open_storage, parse_byte_size, TailSamplingConfig};
pub use error::{Result, StorageError};
pub use flusher::{spawn_flusher, FlusherHandle};
pub use model::{Batch, EventKind, Outcome, TraceEvent};
pub use readwriter::ReadWriter;
pub use sharded::ShardedReadWriter;
pub use storage::Storage;
