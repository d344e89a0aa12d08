//! Binary record codec.
//!
//! Records use a fixed big-endian envelope followed by a type-specific body,
//! bit-exact with the wire format the stages under test parse. This module
//! provides:
//! - Envelope layout constants and field accessors
//! - Typed records with one encoder and decoder per variant
//! - Stream framing that reads and writes whole records

pub mod envelope;
mod framing;
mod records;

pub use envelope::{
    is_stop_marker, peek_length, peek_type, RecordType, ENVELOPE_LEN, STOP_MARKER_LEN,
};
pub use framing::{Frame, RecordReader, RecordWriter, DEFAULT_MAX_RECORD_LEN};
pub use records::{
    body, decode, encode, encode_into, AggregationRequest, CompositeResult, Element, Hit, Record,
    TimeWindow,
};
