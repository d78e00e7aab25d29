//! Normalized webdav resource paths.
//!
//! A [`DavPath`] is the server-relative identity of a resource: absolute,
//! forward-slash separated, with `.` and `..` collapsed. The configured
//! prefix is stripped on the way in and re-attached when generating hrefs.

use std::fmt;
use std::path::PathBuf;

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

use crate::errors::DavError;

/// The error for paths that cannot name a resource: relative, empty,
/// or containing NUL or backslash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid path")]
pub struct ParsePathError;

// Characters that get percent-encoded when generating an href.
const URL_ENCODE: &AsciiSet = &CONTROLS
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

pub(crate) fn url_encode(path: &str) -> String {
    percent_encode(path.as_bytes(), URL_ENCODE).to_string()
}

/// A normalized, absolute resource path.
#[derive(Clone)]
pub struct DavPath {
    // starts with '/', no trailing slash (except the root itself).
    path: String,
    // request or backend said this is a collection.
    is_coll: bool,
    // stripped url prefix, used when generating hrefs.
    prefix: String,
}

impl DavPath {
    /// Build a path from a raw, already-decoded string. No prefix.
    pub fn new(raw: &str) -> Result<DavPath, ParsePathError> {
        DavPath::from_raw(raw, String::new()).map_err(|_| ParsePathError)
    }

    /// Build a path from a request URI, stripping `prefix`.
    pub(crate) fn from_uri_and_prefix(uri: &http::Uri, prefix: &str) -> Result<DavPath, DavError> {
        let decoded = percent_decode_str(uri.path())
            .decode_utf8()
            .map_err(|_| DavError::Utf8Error)?;
        let prefix = prefix.trim_end_matches('/');
        let rest = if prefix.is_empty() {
            decoded.as_ref()
        } else if decoded.as_ref() == prefix {
            "/"
        } else {
            match decoded.strip_prefix(prefix) {
                Some(r) if r.starts_with('/') => r,
                _ => return Err(DavError::PrefixMismatch),
            }
        };
        DavPath::from_raw(rest, prefix.to_string())
    }

    fn from_raw(raw: &str, prefix: String) -> Result<DavPath, DavError> {
        if raw.is_empty() || raw.contains('\0') || raw.contains('\\') {
            return Err(DavError::InvalidPath);
        }
        if !raw.starts_with('/') {
            return Err(DavError::InvalidPath);
        }
        let mut segs: Vec<&str> = Vec::new();
        for seg in raw.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    // never escapes the root.
                    segs.pop();
                }
                s => segs.push(s),
            }
        }
        let path = if segs.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", segs.join("/"))
        };
        let is_coll = raw.ends_with('/') || path == "/";
        Ok(DavPath {
            path,
            is_coll,
            prefix,
        })
    }

    /// The normalized path, without trailing slash (the root is `/`).
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Did the request path (or a later fixup) mark this as a collection.
    pub fn is_collection(&self) -> bool {
        self.is_coll
    }

    /// Mark this path as referring to a collection.
    pub fn add_slash(&mut self) {
        self.is_coll = true;
    }

    /// The parent collection of this path.
    pub fn parent(&self) -> DavPath {
        let parent = match self.path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => self.path[..idx].to_string(),
        };
        DavPath {
            path: parent,
            is_coll: true,
            prefix: self.prefix.clone(),
        }
    }

    /// Last path segment; empty for the root.
    pub fn file_name(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) if self.path.len() > 1 => &self.path[idx + 1..],
            _ => "",
        }
    }

    /// Percent-encoded URL form, without the prefix.
    pub fn as_url_string(&self) -> String {
        let mut s = percent_encode(self.path.as_bytes(), URL_ENCODE).to_string();
        if self.is_coll && !s.ends_with('/') {
            s.push('/');
        }
        s
    }

    /// Percent-encoded URL form, prefix included. This is the href form.
    pub fn as_url_string_with_prefix(&self) -> String {
        let mut s = percent_encode(self.prefix.as_bytes(), URL_ENCODE).to_string();
        s.push_str(&self.as_url_string());
        s
    }

    /// The path relative to a backend root directory.
    pub fn as_rel_ospath(&self) -> PathBuf {
        let mut p = PathBuf::new();
        for seg in self.path.split('/').filter(|s| !s.is_empty()) {
            p.push(seg);
        }
        p
    }

}

impl PartialEq for DavPath {
    fn eq(&self, other: &DavPath) -> bool {
        self.path == other.path
    }
}

impl Eq for DavPath {}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> http::Uri {
        s.parse().unwrap()
    }

    #[test]
    fn normalizes_dots() {
        let p = DavPath::from_uri_and_prefix(&uri("/a/./b/../c"), "").unwrap();
        assert_eq!(p.as_str(), "/a/c");
        assert!(!p.is_collection());
    }

    #[test]
    fn never_escapes_root() {
        let p = DavPath::from_uri_and_prefix(&uri("/../../etc/passwd"), "").unwrap();
        assert_eq!(p.as_str(), "/etc/passwd");
    }

    #[test]
    fn decodes_and_reencodes() {
        let p = DavPath::from_uri_and_prefix(&uri("/a%20b/c"), "").unwrap();
        assert_eq!(p.as_str(), "/a b/c");
        assert_eq!(p.as_url_string(), "/a%20b/c");
    }

    #[test]
    fn collection_flag() {
        let p = DavPath::from_uri_and_prefix(&uri("/dir/"), "").unwrap();
        assert_eq!(p.as_str(), "/dir");
        assert!(p.is_collection());
        assert_eq!(p.as_url_string(), "/dir/");
    }

    #[test]
    fn prefix_strip() {
        let p = DavPath::from_uri_and_prefix(&uri("/dav/x/y"), "/dav").unwrap();
        assert_eq!(p.as_str(), "/x/y");
        assert_eq!(p.as_url_string_with_prefix(), "/dav/x/y");

        let p = DavPath::from_uri_and_prefix(&uri("/dav"), "/dav").unwrap();
        assert_eq!(p.as_str(), "/");

        assert!(matches!(
            DavPath::from_uri_and_prefix(&uri("/other/x"), "/dav"),
            Err(DavError::PrefixMismatch)
        ));
    }

    #[test]
    fn rejects_bad_paths() {
        assert!(DavPath::new("").is_err());
        assert!(DavPath::new("relative/path").is_err());
        assert!(DavPath::new("/a\\b").is_err());
        assert!(DavPath::new("/a\0b").is_err());
    }

    #[test]
    fn parent_and_file_name() {
        let p = DavPath::new("/a/b/c").unwrap();
        assert_eq!(p.parent().as_str(), "/a/b");
        assert_eq!(p.file_name(), "c");
        assert_eq!(DavPath::new("/").unwrap().parent().as_str(), "/");
        assert_eq!(DavPath::new("/").unwrap().file_name(), "");
    }
}
