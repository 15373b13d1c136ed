use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::properties::DataFormat;

/// Compression already applied to the source bytes. The pipeline never
/// compresses on its own; it labels what it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Compression {
    #[default]
    None,
    GZip,
    Zip,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("gz") => Compression::GZip,
            Some("zip") => Compression::Zip,
            _ => Compression::None,
        }
    }

    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::GZip => Some("gz"),
            Compression::Zip => Some("zip"),
        }
    }

    /// The label to advertise for `format`. Binary container formats are
    /// never gzip-labelled.
    pub fn labelled_for(self, format: DataFormat) -> Self {
        match self {
            Compression::GZip if !format.is_compressible() => Compression::None,
            other => other,
        }
    }

    /// `Content-Encoding` value for streaming requests.
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Compression::GZip => Some("gzip"),
            _ => None,
        }
    }
}

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Where the bytes come from.
pub enum SourceKind {
    File(PathBuf),
    /// Blob URI, SAS included when needed.
    Blob(String),
    /// Reader consumed exactly once.
    Stream(BoxReader),
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::File(_) => "file",
            SourceKind::Blob(_) => "blob",
            SourceKind::Stream(_) => "stream",
        }
    }
}

impl fmt::Debug for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::File(p) => f.debug_tuple("File").field(p).finish(),
            SourceKind::Blob(uri) => f.debug_tuple("Blob").field(&strip_query(uri)).finish(),
            SourceKind::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Identity and size hints carried alongside the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMeta {
    pub id: Uuid,
    pub raw_size: Option<u64>,
    pub compression: Compression,
}

/// One unit of data submitted for ingestion.
#[derive(Debug)]
pub struct IngestionSource {
    meta: SourceMeta,
    kind: SourceKind,
}

impl IngestionSource {
    fn new(kind: SourceKind, compression: Compression) -> Self {
        Self {
            meta: SourceMeta {
                id: Uuid::new_v4(),
                raw_size: None,
                compression,
            },
            kind,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let compression = Compression::from_path(&path);
        Self::new(SourceKind::File(path), compression)
    }

    pub fn blob(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let compression = Compression::from_path(Path::new(strip_query(&uri)));
        Self::new(SourceKind::Blob(uri), compression)
    }

    pub fn stream<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(SourceKind::Stream(Box::new(reader)), Compression::None)
    }

    /// Rebuild a source from its parts (used when a stream is re-wrapped).
    pub fn from_parts(meta: SourceMeta, kind: SourceKind) -> Self {
        Self { meta, kind }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.meta.id = id;
        self
    }

    pub fn with_raw_size(mut self, raw_size: u64) -> Self {
        self.meta.raw_size = Some(raw_size);
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.meta.compression = compression;
        self
    }

    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    pub fn raw_size(&self) -> Option<u64> {
        self.meta.raw_size
    }

    pub fn compression(&self) -> Compression {
        self.meta.compression
    }

    pub fn meta(&self) -> SourceMeta {
        self.meta
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn into_parts(self) -> (SourceMeta, SourceKind) {
        (self.meta, self.kind)
    }

    /// Human-readable name used when naming staged blobs.
    pub fn display_name(&self, format: DataFormat) -> String {
        source_name(&self.kind, format, self.meta.compression)
    }
}

pub fn source_name(kind: &SourceKind, format: DataFormat, compression: Compression) -> String {
    match kind {
        SourceKind::File(path) => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| stream_name(format, compression)),
        SourceKind::Blob(uri) => strip_query(uri)
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| stream_name(format, compression)),
        SourceKind::Stream(_) => stream_name(format, compression),
    }
}

fn stream_name(format: DataFormat, compression: Compression) -> String {
    match compression.labelled_for(format).extension() {
        Some(ext) => format!("stream.{}.{}", format.as_str(), ext),
        None => format!("stream.{}", format.as_str()),
    }
}

/// Drop the query string (SAS) from a URI for logs and results.
pub fn strip_query(uri: &str) -> &str {
    uri.split_once('?').map(|(base, _)| base).unwrap_or(uri)
}
