//! Represents one transferable object and where it moves from and to.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, path::PathBuf};

/// Where an object lives: a bucket/key pair, a local file, or an HTTP URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Remote { bucket: String, key: String },
    Local(PathBuf),
    Url(String),
}

impl Location {
    pub fn remote(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Remote {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// The `(key, bucket)` pair under which checkpoints for this location are kept.
    ///
    /// Local files use their path as key and an empty bucket.
    pub fn checkpoint_scope(&self) -> (String, String) {
        match self {
            Self::Remote { bucket, key } => (key.clone(), bucket.clone()),
            Self::Local(path) => (path.to_string_lossy().into_owned(), String::new()),
            Self::Url(url) => (url.clone(), String::new()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Url(url) => write!(f, "{}", url),
        }
    }
}

/// System and user metadata carried alongside an object's bytes.
///
/// Compared field by field when deciding whether an existing destination
/// object already matches its source.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,

    /// User-defined metadata (`x-amz-meta-*` without the prefix).
    pub user: BTreeMap<String, String>,
}

impl ObjectMetadata {
    /// True when every system field and the whole user map agree.
    ///
    /// A missing field and an empty one are treated as equal, since object
    /// stores do not distinguish them on HEAD.
    pub fn matches(&self, other: &ObjectMetadata) -> bool {
        fn same(a: &Option<String>, b: &Option<String>) -> bool {
            a.as_deref().unwrap_or("") == b.as_deref().unwrap_or("")
        }

        same(&self.content_type, &other.content_type)
            && same(&self.content_language, &other.content_language)
            && same(&self.content_encoding, &other.content_encoding)
            && same(&self.cache_control, &other.cache_control)
            && same(&self.content_disposition, &other.content_disposition)
            && self.user == other.user
    }
}

/// One unit of transfer. Immutable once enumerated.
#[derive(Clone, Debug)]
pub struct ObjectDescriptor {
    pub source: Location,
    pub destination: Location,

    /// Total size in bytes.
    pub size: u64,

    pub metadata: ObjectMetadata,
}

impl ObjectDescriptor {
    pub fn new(source: Location, destination: Location, size: u64) -> Self {
        Self {
            source,
            destination,
            size,
            metadata: ObjectMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ObjectMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}
