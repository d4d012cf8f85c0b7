//! Sound asset sources and the identity key the decode cache uses.

use crate::error::Result;
use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// A readable byte stream over an asset's encoded bytes.
pub type ByteStream = Box<dyn Read + Send + Sync>;

/// Something that can hand out the encoded bytes of a sound, any number of times.
///
/// Looping streams reopen their asset when they reach the end, so `open` must
/// return a fresh stream positioned at the start on every call.
pub trait AssetSource: Send + Sync {
    fn open(&self) -> Result<ByteStream>;

    /// MIME type or file extension hint for the codec (e.g. `"audio/ogg"`, `"wav"`).
    fn type_hint(&self) -> Option<&str> {
        None
    }

    /// Human readable name for logs.
    fn describe(&self) -> String {
        "<asset>".to_string()
    }
}

/// Handle to a sound's byte source, compared by identity.
///
/// Clones of one key are equal; two keys created over the same bytes are not.
#[derive(Clone)]
pub struct AssetKey {
    id: Uuid,
    source: Arc<dyn AssetSource>,
}

impl AssetKey {
    pub fn new(source: impl AssetSource + 'static) -> Self {
        Self::from_arc(Arc::new(source))
    }

    pub fn from_arc(source: Arc<dyn AssetSource>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
        }
    }

    pub fn open_byte_stream(&self) -> Result<ByteStream> {
        self.source.open()
    }

    pub fn type_hint(&self) -> Option<&str> {
        self.source.type_hint()
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }
}

impl PartialEq for AssetKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AssetKey {}

impl Hash for AssetKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetKey")
            .field("id", &self.id)
            .field("source", &self.source.describe())
            .finish()
    }
}

/// An asset read from a file on disk. The extension doubles as the type hint.
pub struct FileAsset {
    path: PathBuf,
    extension: Option<String>,
}

impl FileAsset {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        Self { path, extension }
    }
}

impl AssetSource for FileAsset {
    fn open(&self) -> Result<ByteStream> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn type_hint(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// An asset held in memory.
pub struct MemoryAsset {
    bytes: Arc<[u8]>,
    hint: Option<String>,
}

impl MemoryAsset {
    pub fn new(bytes: impl Into<Arc<[u8]>>, hint: Option<&str>) -> Self {
        Self {
            bytes: bytes.into(),
            hint: hint.map(str::to_string),
        }
    }
}

struct SharedBytes(Arc<[u8]>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AssetSource for MemoryAsset {
    fn open(&self) -> Result<ByteStream> {
        Ok(Box::new(Cursor::new(SharedBytes(self.bytes.clone()))))
    }

    fn type_hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    fn describe(&self) -> String {
        format!(
            "<memory {} bytes{}>",
            self.bytes.len(),
            self.hint
                .as_deref()
                .map(|h| format!(", {}", h))
                .unwrap_or_default()
        )
    }
}
