use std::fmt;

use crate::error::StorageError;

/// Suffix appended to a solver's object path to find its dependency manifest.
pub const MANIFEST_SUFFIX: &str = "_requirements.txt";

/// Where an artifact lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// `bucket/path/to/object` in the configured object store.
    Object { bucket: String, path: String },
    /// Pre-signed `http(s)` URL.
    SignedUrl(String),
}

impl StorageLocation {
    /// Parse a reference as submitted by a client.
    ///
    /// `http://` and `https://` references are signed URLs; anything else is
    /// `bucket/path`, with an optional `s3://` scheme.
    pub fn parse(reference: &str) -> Result<Self, StorageError> {
        let reference = reference.trim();
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(Self::SignedUrl(reference.to_string()));
        }

        let rest = reference.strip_prefix("s3://").unwrap_or(reference);
        let rest = rest.trim_start_matches('/');
        match rest.split_once('/') {
            Some((bucket, path)) if !bucket.is_empty() && !path.trim_matches('/').is_empty() => {
                Ok(Self::Object {
                    bucket: bucket.to_string(),
                    path: path.to_string(),
                })
            }
            _ => Err(StorageError::InvalidLocation(reference.to_string())),
        }
    }

    /// Location of the dependency manifest accompanying a solver.
    ///
    /// Signed URLs are signed per object, so no sibling can be derived.
    pub fn manifest(&self) -> Option<Self> {
        match self {
            Self::Object { bucket, path } => Some(Self::Object {
                bucket: bucket.clone(),
                path: format!("{path}{MANIFEST_SUFFIX}"),
            }),
            Self::SignedUrl(_) => None,
        }
    }

    /// Final path segment, used to name temporary copies.
    pub fn file_name(&self) -> &str {
        let path = match self {
            Self::Object { path, .. } => path.as_str(),
            Self::SignedUrl(url) => url.split(['?', '#']).next().unwrap_or(url),
        };
        path.rsplit('/').next().unwrap_or(path)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object { bucket, path } => write!(f, "{bucket}/{path}"),
            // Query strings carry signatures.
            Self::SignedUrl(url) => write!(f, "{}", url.split('?').next().unwrap_or(url)),
        }
    }
}
