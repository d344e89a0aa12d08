//! Envelope layout, byte offsets and bounds-checked field access.
//!
//! Every record starts with the same 16-byte big-endian envelope:
//!
//! ```text
//! offset 0: int32  total length (bytes, including this field)
//! offset 4: int32  record type id
//! offset 8: int64  primary timestamp
//! offset 16..: type-specific body
//! ```
//!
//! The stop marker is the exception: it is only the 4-byte length field.

use crate::errors::MalformedRecordError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset of the total-length field.
pub const LENGTH_OFFSET: usize = 0;
/// Offset of the type id.
pub const TYPE_OFFSET: usize = 4;
/// Offset of the primary timestamp.
pub const TIMESTAMP_OFFSET: usize = 8;
/// Offset where type-specific bodies start.
pub const BODY_OFFSET: usize = 16;
/// Size of the fixed envelope.
pub const ENVELOPE_LEN: usize = 16;
/// Size of the stop marker, which carries only its length field.
pub const STOP_MARKER_LEN: usize = 4;

/// Hit body offsets.
pub mod hit {
    /// Detector id (int32).
    pub const DETECTOR_ID: usize = 16;
    /// Configuration id (int32).
    pub const CONFIG_ID: usize = 20;
    /// Source id (int32).
    pub const SOURCE_ID: usize = 24;
    /// Device id (int16).
    pub const DEVICE_ID: usize = 28;
    /// Mode (int16).
    pub const MODE: usize = 30;
    /// Total encoded length of a hit.
    pub const LEN: usize = 32;
}

/// Header shared by aggregation requests and composite results.
pub mod windowed {
    /// Unique id (int64).
    pub const UNIQUE_ID: usize = 16;
    /// Window start timestamp (int64).
    pub const WINDOW_START: usize = 24;
    /// Window end timestamp (int64).
    pub const WINDOW_END: usize = 32;
    /// Source id (int32).
    pub const SOURCE_ID: usize = 40;
    /// Count of nested entries (int32).
    pub const COUNT: usize = 44;
    /// First nested entry.
    pub const ENTRIES: usize = 48;
}

/// Layout of one aggregation-request element, relative to the element start.
pub mod element {
    /// Source id (int32).
    pub const SOURCE_ID: usize = 0;
    /// Element type (int32).
    pub const ELEMENT_TYPE: usize = 4;
    /// Element timestamp (int64).
    pub const TIMESTAMP: usize = 8;
    /// Encoded size of one element.
    pub const LEN: usize = 16;
}

/// Record kinds the harness understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// A single sensor hit.
    Hit,
    /// A request to aggregate elements in a time window.
    AggregationRequest,
    /// An aggregated result carrying child hits.
    CompositeResult,
}

impl RecordType {
    /// Wire type id.
    #[must_use]
    pub const fn id(self) -> i32 {
        match self {
            Self::Hit => 1,
            Self::AggregationRequest => 2,
            Self::CompositeResult => 3,
        }
    }

    /// Looks up a wire type id.
    #[must_use]
    pub const fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Self::Hit),
            2 => Some(Self::AggregationRequest),
            3 => Some(Self::CompositeResult),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "hit"),
            Self::AggregationRequest => write!(f, "aggregation_request"),
            Self::CompositeResult => write!(f, "composite_result"),
        }
    }
}

fn field<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], MalformedRecordError> {
    buf.get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            MalformedRecordError::new(
                format!("{N}-byte field runs past end of {}-byte buffer", buf.len()),
                offset,
            )
        })
}

/// Reads a big-endian int16 at `offset`.
pub fn read_i16(buf: &[u8], offset: usize) -> Result<i16, MalformedRecordError> {
    field::<2>(buf, offset).map(i16::from_be_bytes)
}

/// Reads a big-endian int32 at `offset`.
pub fn read_i32(buf: &[u8], offset: usize) -> Result<i32, MalformedRecordError> {
    field::<4>(buf, offset).map(i32::from_be_bytes)
}

/// Reads a big-endian int64 at `offset`.
pub fn read_i64(buf: &[u8], offset: usize) -> Result<i64, MalformedRecordError> {
    field::<8>(buf, offset).map(i64::from_be_bytes)
}

/// Writes a big-endian int32 at `offset`; the buffer must already cover it.
pub fn write_i32(buf: &mut [u8], offset: usize, value: i32) -> Result<(), MalformedRecordError> {
    let len = buf.len();
    let slot = buf.get_mut(offset..offset + 4).ok_or_else(|| {
        MalformedRecordError::new(format!("cannot write int32 into {len}-byte buffer"), offset)
    })?;
    slot.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Returns the declared total length, if at least four bytes are present.
#[must_use]
pub fn peek_length(buf: &[u8]) -> Option<i32> {
    read_i32(buf, LENGTH_OFFSET).ok()
}

/// Returns the record type, if the envelope is present and the id is known.
#[must_use]
pub fn peek_type(buf: &[u8]) -> Option<RecordType> {
    if buf.len() < ENVELOPE_LEN {
        return None;
    }
    read_i32(buf, TYPE_OFFSET).ok().and_then(RecordType::from_id)
}

/// Returns true if the bytes are exactly a stop marker.
#[must_use]
pub fn is_stop_marker(buf: &[u8]) -> bool {
    buf.len() == STOP_MARKER_LEN && peek_length(buf) == Some(STOP_MARKER_LEN as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_ids() {
        for kind in [
            RecordType::Hit,
            RecordType::AggregationRequest,
            RecordType::CompositeResult,
        ] {
            assert_eq!(RecordType::from_id(kind.id()), Some(kind));
        }
        assert_eq!(RecordType::from_id(0), None);
        assert_eq!(RecordType::from_id(4), None);
    }

    #[test]
    fn test_read_big_endian() {
        let buf = [0x00, 0x00, 0x01, 0x02, 0xFF, 0xFE];
        assert_eq!(read_i32(&buf, 0).unwrap(), 0x0102);
        assert_eq!(read_i16(&buf, 4).unwrap(), -2);
    }

    #[test]
    fn test_read_past_end_reports_offset() {
        let buf = [0u8; 6];
        let err = read_i64(&buf, 2).unwrap_err();
        assert_eq!(err.offset, 2);
    }

    #[test]
    fn test_write_i32_backfill() {
        let mut buf = vec![0u8; 8];
        write_i32(&mut buf, 4, 0x0A0B_0C0D).unwrap();
        assert_eq!(&buf[4..], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert!(write_i32(&mut buf, 6, 1).is_err());
    }

    #[test]
    fn test_stop_marker_detection() {
        assert!(is_stop_marker(&4i32.to_be_bytes()));
        assert!(!is_stop_marker(&5i32.to_be_bytes()));
        assert!(!is_stop_marker(&[0, 0, 0, 4, 0]));
    }

    #[test]
    fn test_peek_type_requires_envelope() {
        let mut buf = vec![0u8; ENVELOPE_LEN];
        write_i32(&mut buf, TYPE_OFFSET, 3).unwrap();
        assert_eq!(peek_type(&buf), Some(RecordType::CompositeResult));
        assert_eq!(peek_type(&buf[..8]), None);
    }
}
