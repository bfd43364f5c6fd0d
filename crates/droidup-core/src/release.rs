//! Release identifiers and resolved download metadata.

use chrono::{DateTime, FixedOffset};
use std::fmt;
use url::Url;

/// Which identifier an app publishes for its releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseIdKind {
    Version,
    Timestamp,
}

/// Identifies one release: an opaque version string or a zoned build timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseId {
    Version(String),
    Timestamp(DateTime<FixedOffset>),
}

impl ReleaseId {
    pub fn kind(&self) -> ReleaseIdKind {
        match self {
            ReleaseId::Version(_) => ReleaseIdKind::Version,
            ReleaseId::Timestamp(_) => ReleaseIdKind::Timestamp,
        }
    }

    /// Parse a stored value as the given kind. Timestamps must be RFC 3339.
    pub fn parse(kind: ReleaseIdKind, raw: &str) -> Result<Self, chrono::ParseError> {
        match kind {
            ReleaseIdKind::Version => Ok(ReleaseId::Version(raw.to_string())),
            ReleaseIdKind::Timestamp => DateTime::parse_from_rfc3339(raw).map(ReleaseId::Timestamp),
        }
    }

    /// Storage form; `parse(kind, &id.as_stored())` gives back an equal id.
    pub fn as_stored(&self) -> String {
        match self {
            ReleaseId::Version(v) => v.clone(),
            ReleaseId::Timestamp(ts) => ts.to_rfc3339(),
        }
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseId::Version(v) => f.write_str(v),
            ReleaseId::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// Where to download a release and which release it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    download_url: Url,
    release_id: ReleaseId,
}

impl Metadata {
    pub fn new(download_url: Url, release_id: ReleaseId) -> Self {
        Self {
            download_url,
            release_id,
        }
    }

    pub fn download_url(&self) -> &Url {
        &self.download_url
    }

    pub fn release_id(&self) -> &ReleaseId {
        &self.release_id
    }
}
