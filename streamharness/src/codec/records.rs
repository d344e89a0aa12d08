//! Typed records and their bit-exact encoders/decoders.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::envelope::{
    self, element, hit, read_i16, read_i32, read_i64, windowed, write_i32, RecordType,
    BODY_OFFSET, ENVELOPE_LEN, LENGTH_OFFSET, STOP_MARKER_LEN, TIMESTAMP_OFFSET, TYPE_OFFSET,
};
use crate::core::SourceId;
use crate::errors::MalformedRecordError;

/// A half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start timestamp.
    pub start: i64,
    /// Exclusive end timestamp.
    pub end: i64,
}

impl TimeWindow {
    /// Creates a window.
    #[must_use]
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Returns true if the window covers no time.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Returns true if `ts` falls inside the window.
    #[must_use]
    pub const fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// A single sensor hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hit {
    /// Primary timestamp.
    pub timestamp: i64,
    /// Detector that fired.
    pub detector_id: i32,
    /// Configuration the detector ran under.
    pub config_id: i32,
    /// Subsystem that produced the hit.
    pub source_id: SourceId,
    /// Readout device.
    pub device_id: i16,
    /// Readout mode.
    pub mode: i16,
}

/// One element listed in an aggregation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Element {
    /// Subsystem the element refers to.
    pub source_id: SourceId,
    /// Kind of element requested.
    pub element_type: i32,
    /// Element timestamp.
    pub timestamp: i64,
}

/// A request to aggregate data over a time window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationRequest {
    /// Primary timestamp.
    pub timestamp: i64,
    /// Request id, unique within a run.
    pub unique_id: i64,
    /// Window to aggregate over.
    pub window: TimeWindow,
    /// Requesting subsystem.
    pub source_id: SourceId,
    /// Elements to include.
    pub elements: Vec<Element>,
}

/// An aggregated result carrying the hits it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeResult {
    /// Primary timestamp.
    pub timestamp: i64,
    /// Result id, unique within a run.
    pub unique_id: i64,
    /// Window the children were collected over.
    pub window: TimeWindow,
    /// Aggregating subsystem.
    pub source_id: SourceId,
    /// Child hits.
    pub children: Vec<Hit>,
}

/// Any record that can cross a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Record {
    /// A sensor hit.
    Hit(Hit),
    /// An aggregation request.
    AggregationRequest(AggregationRequest),
    /// A composite result.
    CompositeResult(CompositeResult),
    /// End of stream.
    StopMarker,
}

impl Record {
    /// The record's type, or `None` for the stop marker.
    #[must_use]
    pub fn record_type(&self) -> Option<RecordType> {
        match self {
            Self::Hit(_) => Some(RecordType::Hit),
            Self::AggregationRequest(_) => Some(RecordType::AggregationRequest),
            Self::CompositeResult(_) => Some(RecordType::CompositeResult),
            Self::StopMarker => None,
        }
    }

    /// The primary timestamp, absent on the stop marker.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Self::Hit(h) => Some(h.timestamp),
            Self::AggregationRequest(r) => Some(r.timestamp),
            Self::CompositeResult(c) => Some(c.timestamp),
            Self::StopMarker => None,
        }
    }

    /// Source id embedded in the record body.
    #[must_use]
    pub fn source_id(&self) -> Option<SourceId> {
        match self {
            Self::Hit(h) => Some(h.source_id),
            Self::AggregationRequest(r) => Some(r.source_id),
            Self::CompositeResult(c) => Some(c.source_id),
            Self::StopMarker => None,
        }
    }

    /// Returns true for the end-of-stream marker.
    #[must_use]
    pub fn is_stop_marker(&self) -> bool {
        matches!(self, Self::StopMarker)
    }

    /// Number of bytes `encode` will produce.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Hit(_) => hit::LEN,
            Self::AggregationRequest(r) => windowed::ENTRIES + r.elements.len() * element::LEN,
            Self::CompositeResult(c) => windowed::ENTRIES + c.children.len() * hit::LEN,
            Self::StopMarker => STOP_MARKER_LEN,
        }
    }
}

impl From<Hit> for Record {
    fn from(hit: Hit) -> Self {
        Self::Hit(hit)
    }
}

impl From<AggregationRequest> for Record {
    fn from(req: AggregationRequest) -> Self {
        Self::AggregationRequest(req)
    }
}

impl From<CompositeResult> for Record {
    fn from(result: CompositeResult) -> Self {
        Self::CompositeResult(result)
    }
}

/// Encodes a record into a fresh buffer.
pub fn encode(record: &Record) -> Result<Bytes, MalformedRecordError> {
    let mut buf = BytesMut::with_capacity(record.encoded_len());
    encode_into(record, &mut buf)?;
    Ok(buf.freeze())
}

/// Appends the encoding of `record` to `buf`.
///
/// The length field is written as a placeholder and backfilled once the
/// body, including any nested entries, is in place.
pub fn encode_into(record: &Record, buf: &mut BytesMut) -> Result<(), MalformedRecordError> {
    let start = buf.len();
    match record {
        Record::StopMarker => {
            buf.put_i32(STOP_MARKER_LEN as i32);
            return Ok(());
        }
        Record::Hit(h) => encode_hit(h, buf),
        Record::AggregationRequest(r) => {
            let count = nested_count(r.elements.len(), start)?;
            put_envelope(buf, RecordType::AggregationRequest, r.timestamp);
            put_windowed_header(buf, r.unique_id, r.window, r.source_id, count);
            for e in &r.elements {
                buf.put_i32(e.source_id.as_wire());
                buf.put_i32(e.element_type);
                buf.put_i64(e.timestamp);
            }
        }
        Record::CompositeResult(c) => {
            let count = nested_count(c.children.len(), start)?;
            put_envelope(buf, RecordType::CompositeResult, c.timestamp);
            put_windowed_header(buf, c.unique_id, c.window, c.source_id, count);
            for child in &c.children {
                encode_hit(child, buf);
            }
        }
    }
    backfill_length(buf, start)
}

fn nested_count(len: usize, start: usize) -> Result<i32, MalformedRecordError> {
    i32::try_from(len).map_err(|_| {
        MalformedRecordError::new(format!("{len} nested entries exceed int32"), start)
    })
}

fn put_envelope(buf: &mut BytesMut, kind: RecordType, timestamp: i64) {
    buf.put_i32(0);
    buf.put_i32(kind.id());
    buf.put_i64(timestamp);
}

fn put_windowed_header(
    buf: &mut BytesMut,
    unique_id: i64,
    window: TimeWindow,
    source_id: SourceId,
    count: i32,
) {
    buf.put_i64(unique_id);
    buf.put_i64(window.start);
    buf.put_i64(window.end);
    buf.put_i32(source_id.as_wire());
    buf.put_i32(count);
}

fn encode_hit(h: &Hit, buf: &mut BytesMut) {
    let start = buf.len();
    buf.put_i32(hit::LEN as i32);
    buf.put_i32(RecordType::Hit.id());
    buf.put_i64(h.timestamp);
    buf.put_i32(h.detector_id);
    buf.put_i32(h.config_id);
    buf.put_i32(h.source_id.as_wire());
    buf.put_i16(h.device_id);
    buf.put_i16(h.mode);
    debug_assert_eq!(buf.len() - start, hit::LEN);
}

fn backfill_length(buf: &mut BytesMut, start: usize) -> Result<(), MalformedRecordError> {
    let written = buf.len() - start;
    let len = i32::try_from(written).map_err(|_| {
        MalformedRecordError::new(format!("encoded length {written} exceeds int32"), start)
    })?;
    write_i32(&mut buf[start..], LENGTH_OFFSET, len)
}

/// Decodes one complete record.
///
/// The buffer must hold exactly the declared number of bytes. A 4-byte
/// buffer declaring length 4 is the stop marker.
pub fn decode(buf: &[u8]) -> Result<Record, MalformedRecordError> {
    let declared = read_i32(buf, LENGTH_OFFSET)?;
    if i64::from(declared) != buf.len() as i64 {
        return Err(MalformedRecordError::length_mismatch(
            i64::from(declared),
            buf.len(),
        ));
    }
    if buf.len() == STOP_MARKER_LEN {
        return Ok(Record::StopMarker);
    }
    if buf.len() < ENVELOPE_LEN {
        return Err(MalformedRecordError::new(
            format!("{}-byte record is shorter than the envelope", buf.len()),
            0,
        ));
    }

    let type_id = read_i32(buf, TYPE_OFFSET)?;
    let timestamp = read_i64(buf, TIMESTAMP_OFFSET)?;
    match RecordType::from_id(type_id) {
        Some(RecordType::Hit) => decode_hit(buf, timestamp).map(Record::Hit),
        Some(RecordType::AggregationRequest) => {
            decode_aggregation_request(buf, timestamp).map(Record::AggregationRequest)
        }
        Some(RecordType::CompositeResult) => {
            decode_composite_result(buf, timestamp).map(Record::CompositeResult)
        }
        None => Err(MalformedRecordError::unknown_type(type_id)),
    }
}

fn decode_hit(buf: &[u8], timestamp: i64) -> Result<Hit, MalformedRecordError> {
    if buf.len() != hit::LEN {
        return Err(MalformedRecordError::new(
            format!("hit must be {} bytes, got {}", hit::LEN, buf.len()),
            LENGTH_OFFSET,
        ));
    }
    Ok(Hit {
        timestamp,
        detector_id: read_i32(buf, hit::DETECTOR_ID)?,
        config_id: read_i32(buf, hit::CONFIG_ID)?,
        source_id: SourceId::from_wire(read_i32(buf, hit::SOURCE_ID)?),
        device_id: read_i16(buf, hit::DEVICE_ID)?,
        mode: read_i16(buf, hit::MODE)?,
    })
}

struct WindowedHeader {
    unique_id: i64,
    window: TimeWindow,
    source_id: SourceId,
    count: usize,
}

fn decode_windowed_header(
    buf: &[u8],
    entry_len: usize,
) -> Result<WindowedHeader, MalformedRecordError> {
    let raw_count = read_i32(buf, windowed::COUNT)?;
    let count = usize::try_from(raw_count).map_err(|_| {
        MalformedRecordError::new(format!("negative entry count {raw_count}"), windowed::COUNT)
    })?;
    let expected = count
        .checked_mul(entry_len)
        .and_then(|n| n.checked_add(windowed::ENTRIES));
    if expected != Some(buf.len()) {
        return Err(MalformedRecordError::new(
            format!(
                "{count} entries of {entry_len} bytes do not fill {}-byte record",
                buf.len()
            ),
            windowed::COUNT,
        ));
    }
    Ok(WindowedHeader {
        unique_id: read_i64(buf, windowed::UNIQUE_ID)?,
        window: TimeWindow::new(
            read_i64(buf, windowed::WINDOW_START)?,
            read_i64(buf, windowed::WINDOW_END)?,
        ),
        source_id: SourceId::from_wire(read_i32(buf, windowed::SOURCE_ID)?),
        count,
    })
}

fn decode_aggregation_request(
    buf: &[u8],
    timestamp: i64,
) -> Result<AggregationRequest, MalformedRecordError> {
    let header = decode_windowed_header(buf, element::LEN)?;
    let elements = (0..header.count)
        .map(|i| {
            let base = windowed::ENTRIES + i * element::LEN;
            Ok(Element {
                source_id: SourceId::from_wire(read_i32(buf, base + element::SOURCE_ID)?),
                element_type: read_i32(buf, base + element::ELEMENT_TYPE)?,
                timestamp: read_i64(buf, base + element::TIMESTAMP)?,
            })
        })
        .collect::<Result<Vec<_>, MalformedRecordError>>()?;

    Ok(AggregationRequest {
        timestamp,
        unique_id: header.unique_id,
        window: header.window,
        source_id: header.source_id,
        elements,
    })
}

fn decode_composite_result(
    buf: &[u8],
    timestamp: i64,
) -> Result<CompositeResult, MalformedRecordError> {
    let header = decode_windowed_header(buf, hit::LEN)?;
    let mut children = Vec::with_capacity(header.count);
    for i in 0..header.count {
        let base = windowed::ENTRIES + i * hit::LEN;
        let child = &buf[base..base + hit::LEN];
        let child_len = read_i32(child, LENGTH_OFFSET)?;
        if child_len != hit::LEN as i32 {
            return Err(MalformedRecordError::new(
                format!("child #{i} declares length {child_len}, expected {}", hit::LEN),
                base,
            ));
        }
        let child_type = read_i32(child, TYPE_OFFSET)?;
        if child_type != RecordType::Hit.id() {
            return Err(MalformedRecordError::new(
                format!("child #{i} has type id {child_type}, expected a hit"),
                base + TYPE_OFFSET,
            ));
        }
        children.push(decode_hit(child, read_i64(child, TIMESTAMP_OFFSET)?)?);
    }

    Ok(CompositeResult {
        timestamp,
        unique_id: header.unique_id,
        window: header.window,
        source_id: header.source_id,
        children,
    })
}

/// Returns the body bytes of an encoded record (empty for the stop marker).
#[must_use]
pub fn body(buf: &[u8]) -> &[u8] {
    if envelope::is_stop_marker(buf) || buf.len() < BODY_OFFSET {
        &[]
    } else {
        &buf[BODY_OFFSET..]
    }
}
