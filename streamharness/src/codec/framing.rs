//! Reading and writing whole records on a byte stream.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::envelope::{ENVELOPE_LEN, STOP_MARKER_LEN};
use super::records::{encode, Record};
use crate::errors::MalformedRecordError;

/// Default upper bound on a single record (16 MiB).
pub const DEFAULT_MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// One whole record as it appeared on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The record bytes, length field included.
    pub bytes: Bytes,
    /// Zero-based index of the record on the stream.
    pub index: u64,
    /// Stream offset of the record's first byte.
    pub offset: u64,
}

impl Frame {
    /// Returns true if this frame is the end-of-stream marker.
    #[must_use]
    pub fn is_stop_marker(&self) -> bool {
        self.bytes.len() == STOP_MARKER_LEN
    }

    /// Frame length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for a zero-length frame, which the reader never yields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn invalid(err: MalformedRecordError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Splits a byte stream into records.
///
/// Reads the 4-byte length first, then the declared remainder. A stream
/// that ends between records yields `None`; one that ends inside a record
/// is an `UnexpectedEof` error. Lengths that cannot be a record are
/// `InvalidData` errors wrapping a [`MalformedRecordError`], since the
/// stream cannot be resynchronised after them.
#[derive(Debug)]
pub struct RecordReader<R> {
    inner: R,
    max_record_len: usize,
    records: u64,
    offset: u64,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    /// Wraps a reader with the default record size limit.
    pub fn new(inner: R) -> Self {
        Self::with_max_record_len(inner, DEFAULT_MAX_RECORD_LEN)
    }

    /// Wraps a reader with a custom record size limit.
    pub fn with_max_record_len(inner: R, max_record_len: usize) -> Self {
        Self {
            inner,
            max_record_len,
            records: 0,
            offset: 0,
        }
    }

    /// Reads the next whole record.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        let mut len_buf = [0u8; STOP_MARKER_LEN];
        let mut filled = 0;
        while filled < len_buf.len() {
            let n = self.inner.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended inside length field at offset {}", self.offset),
                ));
            }
            filled += n;
        }

        let declared = i32::from_be_bytes(len_buf);
        let len = self.check_length(declared)?;

        let mut buf = BytesMut::with_capacity(len);
        buf.put_slice(&len_buf);
        buf.resize(len, 0);
        self.inner
            .read_exact(&mut buf[STOP_MARKER_LEN..])
            .await
            .map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "stream ended inside {len}-byte record at offset {}",
                            self.offset
                        ),
                    )
                } else {
                    e
                }
            })?;

        let frame = Frame {
            bytes: buf.freeze(),
            index: self.records,
            offset: self.offset,
        };
        self.records += 1;
        self.offset += len as u64;
        Ok(Some(frame))
    }

    fn check_length(&self, declared: i32) -> io::Result<usize> {
        let Ok(len) = usize::try_from(declared) else {
            return Err(invalid(MalformedRecordError::new(
                format!("negative record length {declared} at stream offset {}", self.offset),
                0,
            )));
        };
        if len == STOP_MARKER_LEN {
            return Ok(len);
        }
        if len < ENVELOPE_LEN {
            return Err(invalid(MalformedRecordError::new(
                format!(
                    "record length {len} at stream offset {} is shorter than the envelope",
                    self.offset
                ),
                0,
            )));
        }
        if len > self.max_record_len {
            return Err(invalid(MalformedRecordError::new(
                format!(
                    "record length {len} at stream offset {} exceeds limit {}",
                    self.offset, self.max_record_len
                ),
                0,
            )));
        }
        Ok(len)
    }

    /// Records read so far.
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// Bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes records onto a byte stream.
#[derive(Debug)]
pub struct RecordWriter<W> {
    inner: W,
    records: u64,
    bytes: u64,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    /// Wraps a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            records: 0,
            bytes: 0,
        }
    }

    /// Encodes and writes one record.
    pub async fn write_record(&mut self, record: &Record) -> io::Result<()> {
        let bytes = encode(record).map_err(invalid)?;
        self.write_frame(&bytes).await
    }

    /// Writes already-encoded record bytes.
    pub async fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes).await?;
        self.records += 1;
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    /// Writes the stop marker and flushes.
    pub async fn write_stop(&mut self) -> io::Result<()> {
        self.write_record(&Record::StopMarker).await?;
        self.inner.flush().await
    }

    /// Flushes buffered bytes.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    /// Flushes and closes the write side.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    /// Records written so far, stop marker included.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}
