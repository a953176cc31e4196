//! Parsing and path arithmetic for storage URIs.
//!
//! Backups are addressed as `scheme://host/path`. A bare filesystem path is
//! shorthand for `nodelocal://self/<path>`, i.e. a path under the configured
//! external I/O directory. Path manipulation (joining the incrementals
//! subdirectory, stripping it again, splitting a destination into directory
//! and file name) happens on the URI path so both conventions behave the same
//! regardless of backend.
//!
//! Explicit URIs go through [`url::Url`]: the query string and fragment are
//! dropped and path segments are percent-decoded. Bare paths are taken
//! literally.

use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use snafu::prelude::*;
use url::Url;

use crate::storage::{InvalidUriSnafu, StorageError, StorageResult};

/// URI path separator.
pub const URL_SEPARATOR: char = '/';

/// Bytes escaped when a path segment is rendered back into a URI.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Storage schemes with a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// `nodelocal://self/...`, rooted at the external I/O directory.
    NodeLocal,
    /// `file:///abs/path`, an absolute local path.
    File,
}

impl Scheme {
    /// Scheme name as written in URIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::NodeLocal => "nodelocal",
            Scheme::File => "file",
        }
    }
}

/// A parsed storage URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageUri {
    scheme: Scheme,
    host: String,
    path: String,
}

/// Join URL path segments, collapsing empty, `.` and `..` components.
///
/// The result always starts with `/`.
pub fn join_url_path<I, S>(base: &str, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut segments: Vec<String> = Vec::new();
    let mut push = |part: &str| {
        for seg in part.split(URL_SEPARATOR) {
            match seg {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s.to_string()),
            }
        }
    };

    push(base);
    for part in parts {
        push(part.as_ref());
    }

    format!("/{}", segments.join("/"))
}

/// Normalize a single URL path.
pub fn clean_url_path(path: &str) -> String {
    join_url_path(path, std::iter::empty::<&str>())
}

impl StorageUri {
    /// Parse a URI or bare path.
    pub fn parse(spec: &str) -> StorageResult<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return InvalidUriSnafu {
                uri: spec,
                reason: "location is empty",
            }
            .fail();
        }

        if !spec.contains("://") {
            return Ok(Self {
                scheme: Scheme::NodeLocal,
                host: "self".to_string(),
                path: clean_url_path(spec),
            });
        }

        let url = Url::parse(spec).map_err(|e| {
            InvalidUriSnafu {
                uri: spec,
                reason: e.to_string(),
            }
            .build()
        })?;

        let scheme = match url.scheme() {
            "nodelocal" => Scheme::NodeLocal,
            "file" => Scheme::File,
            other => {
                return Err(StorageError::UnsupportedScheme {
                    uri: spec.to_string(),
                    scheme: other.to_string(),
                });
            }
        };

        ensure!(
            !url.cannot_be_a_base(),
            InvalidUriSnafu {
                uri: spec,
                reason: "location has no path",
            }
        );

        let host = url.host_str().unwrap_or_default();
        match scheme {
            Scheme::NodeLocal if host != "self" => {
                return Err(StorageError::RemoteNode {
                    host: host.to_string(),
                });
            }
            Scheme::File if !(host.is_empty() || host == "localhost") => {
                return InvalidUriSnafu {
                    uri: spec,
                    reason: "file URIs must use an absolute path (file:///path)",
                }
                .fail();
            }
            _ => {}
        }

        // An empty path has no segments.
        let mut decoded = Vec::new();
        for seg in url.path_segments().into_iter().flatten() {
            let seg = percent_decode_str(seg).decode_utf8().map_err(|_| {
                InvalidUriSnafu {
                    uri: spec,
                    reason: "path is not valid UTF-8 once decoded",
                }
                .build()
            })?;
            decoded.push(seg.into_owned());
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            path: join_url_path("", decoded),
        })
    }

    /// The URI scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The URI path (always absolute).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Same scheme and host, different path.
    pub fn with_path(&self, path: &str) -> Self {
        Self {
            scheme: self.scheme,
            host: self.host.clone(),
            path: clean_url_path(path),
        }
    }

    /// Append path segments.
    pub fn join<I, S>(&self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            scheme: self.scheme,
            host: self.host.clone(),
            path: join_url_path(&self.path, parts),
        }
    }

    /// Split into the parent directory URI and the final path component.
    ///
    /// Returns `None` for the root path.
    pub fn split_file_name(&self) -> Option<(Self, String)> {
        let (dir, file) = self.path.rsplit_once(URL_SEPARATOR)?;
        if file.is_empty() {
            return None;
        }
        Some((self.with_path(dir), file.to_string()))
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.host)?;
        let segments = self.path.split(URL_SEPARATOR).filter(|s| !s.is_empty());
        let mut empty = true;
        for seg in segments {
            write!(f, "/{}", utf8_percent_encode(seg, SEGMENT))?;
            empty = false;
        }
        if empty {
            f.write_str("/")?;
        }
        Ok(())
    }
}
