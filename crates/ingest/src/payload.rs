//! Buffering sources into memory under a size ceiling.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::AsyncReadExt;

use kingest_core::{BoxReader, Compression, IngestError, IngestionSource, SourceKind, SourceMeta};

/// A fully buffered source, ready to post; re-used across streaming attempts.
#[derive(Debug, Clone)]
pub struct Payload {
    pub bytes: Bytes,
    pub compression: Compression,
}

impl Payload {
    pub fn new(bytes: impl Into<Bytes>, compression: Compression) -> Self {
        Self {
            bytes: bytes.into(),
            compression,
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Outcome of reading a stream with a ceiling.
pub enum Bounded {
    Complete(Bytes),
    /// More than `limit` bytes. `prefix` holds what was read, `rest` the
    /// unread remainder.
    Overflow { prefix: Bytes, rest: BoxReader },
}

/// Read at most `limit + 1` bytes to tell whether the stream fits.
pub async fn read_bounded(mut reader: BoxReader, limit: u64) -> Result<Bounded, IngestError> {
    let mut buf = Vec::new();
    (&mut reader)
        .take(limit.saturating_add(1))
        .read_to_end(&mut buf)
        .await?;
    if buf.len() as u64 > limit {
        Ok(Bounded::Overflow {
            prefix: buf.into(),
            rest: reader,
        })
    } else {
        Ok(Bounded::Complete(buf.into()))
    }
}

/// The original stream again: the buffered prefix followed by the unread
/// remainder.
pub fn rejoin(prefix: Bytes, rest: BoxReader) -> BoxReader {
    Box::new(Cursor::new(prefix).chain(rest))
}

/// Read a whole file when it fits under `limit`.
pub async fn read_file_bounded(path: &Path, limit: u64) -> Result<Option<Bytes>, IngestError> {
    let len = tokio::fs::metadata(path).await?.len();
    if len > limit {
        return Ok(None);
    }
    let data = tokio::fs::read(path).await?;
    if data.len() as u64 > limit {
        return Ok(None);
    }
    Ok(Some(data.into()))
}

/// A source either buffered for streaming or set aside for the queued path.
pub enum Prepared {
    Buffered {
        payload: Payload,
        /// Set for files, so the queued path can re-open them.
        origin: Option<PathBuf>,
    },
    TooLarge(IngestionSource),
    Unstreamable(IngestionSource),
}

/// Buffer a source under `limit` without losing it when it does not fit.
pub async fn prepare(meta: SourceMeta, kind: SourceKind, limit: u64) -> Result<Prepared, IngestError> {
    if meta.raw_size.is_some_and(|size| size > limit) {
        return Ok(Prepared::TooLarge(IngestionSource::from_parts(meta, kind)));
    }
    match kind {
        SourceKind::Blob(_) => Ok(Prepared::Unstreamable(IngestionSource::from_parts(meta, kind))),
        SourceKind::File(path) => match read_file_bounded(&path, limit).await? {
            Some(bytes) => Ok(Prepared::Buffered {
                payload: Payload::new(bytes, meta.compression),
                origin: Some(path),
            }),
            None => Ok(Prepared::TooLarge(IngestionSource::from_parts(
                meta,
                SourceKind::File(path),
            ))),
        },
        SourceKind::Stream(reader) => match read_bounded(reader, limit).await? {
            Bounded::Complete(bytes) => Ok(Prepared::Buffered {
                payload: Payload::new(bytes, meta.compression),
                origin: None,
            }),
            Bounded::Overflow { prefix, rest } => Ok(Prepared::TooLarge(
                IngestionSource::from_parts(meta, SourceKind::Stream(rejoin(prefix, rest))),
            )),
        },
    }
}

/// Turn a buffered payload back into a source for the queued path.
pub fn into_source(meta: SourceMeta, payload: Payload, origin: Option<PathBuf>) -> IngestionSource {
    let kind = match origin {
        Some(path) => SourceKind::File(path),
        None => SourceKind::Stream(Box::new(Cursor::new(payload.bytes))),
    };
    IngestionSource::from_parts(meta, kind)
}
