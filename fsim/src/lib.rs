//! Query protocol and database file format for fingerprint similarity
//! search, where the actual nearest-neighbor scan runs in a separate
//! long-lived backend process.
//!
//! What lives here:
//! - a typed binary codec (big-endian, length-prefixed strings and blocks)
//!   shared by the file format and the wire protocol
//! - the versioned `.fsim` container: three parallel sharded arrays of
//!   fingerprints, SMILES, and external ids
//! - offline database construction and O(shards) merging
//! - request/response framing with request-id correlation
//! - a channel adapter covering both the synchronous socket echo and the
//!   polled shared-region delivery path
//! - fan-out of one query across many databases with a merged, re-sorted
//!   result set
//!
//! Fingerprinting itself is an external concern behind
//! [`data::Fingerprinter`]; search ranking belongs to the backend.

pub mod builder;
pub mod channel;
pub mod codec;
pub mod data;
pub mod database;
pub mod error;
pub mod fanout;
pub mod protocol;
