use std::io::{Cursor, Write};
use std::time::SystemTime;

use bitflags::bitflags;
use bytes::Bytes;
use headers::Header;

use crate::errors::{DavError, DavResult};

/// The methods this handler understands: plain HTTP plus the RFC4918 extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DavMethod {
    Options,
    Get,
    Head,
    Post,
    Put,
    Delete,
    MkCol,
    Copy,
    Move,
    Lock,
    Unlock,
    PropFind,
    PropPatch,
}

bitflags! {
    /// A set of [`DavMethod`]s, used to restrict what a handler instance serves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethodSet: u16 {
        const OPTIONS = 0x0001;
        const GET = 0x0002;
        const HEAD = 0x0004;
        const POST = 0x0008;
        const PUT = 0x0010;
        const DELETE = 0x0020;
        const MKCOL = 0x0040;
        const COPY = 0x0080;
        const MOVE = 0x0100;
        const LOCK = 0x0200;
        const UNLOCK = 0x0400;
        const PROPFIND = 0x0800;
        const PROPPATCH = 0x1000;

        const HTTP_RO = Self::OPTIONS.bits() | Self::GET.bits()
            | Self::HEAD.bits() | Self::POST.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits() | Self::DELETE.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
    }
}

impl DavMethodSet {
    pub const WEBDAV_RW: Self = Self::all();

    pub fn contains_method(&self, m: DavMethod) -> bool {
        self.contains(m.bit())
    }
}

impl DavMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            DavMethod::Options => "OPTIONS",
            DavMethod::Get => "GET",
            DavMethod::Head => "HEAD",
            DavMethod::Post => "POST",
            DavMethod::Put => "PUT",
            DavMethod::Delete => "DELETE",
            DavMethod::MkCol => "MKCOL",
            DavMethod::Copy => "COPY",
            DavMethod::Move => "MOVE",
            DavMethod::Lock => "LOCK",
            DavMethod::Unlock => "UNLOCK",
            DavMethod::PropFind => "PROPFIND",
            DavMethod::PropPatch => "PROPPATCH",
        }
    }

    pub(crate) fn bit(self) -> DavMethodSet {
        match self {
            DavMethod::Options => DavMethodSet::OPTIONS,
            DavMethod::Get => DavMethodSet::GET,
            DavMethod::Head => DavMethodSet::HEAD,
            DavMethod::Post => DavMethodSet::POST,
            DavMethod::Put => DavMethodSet::PUT,
            DavMethod::Delete => DavMethodSet::DELETE,
            DavMethod::MkCol => DavMethodSet::MKCOL,
            DavMethod::Copy => DavMethodSet::COPY,
            DavMethod::Move => DavMethodSet::MOVE,
            DavMethod::Lock => DavMethodSet::LOCK,
            DavMethod::Unlock => DavMethodSet::UNLOCK,
            DavMethod::PropFind => DavMethodSet::PROPFIND,
            DavMethod::PropPatch => DavMethodSet::PROPPATCH,
        }
    }
}

// translate the http method into our own enum that has webdav methods as well.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::OPTIONS => DavMethod::Options,
        http::Method::GET => DavMethod::Get,
        http::Method::HEAD => DavMethod::Head,
        http::Method::POST => DavMethod::Post,
        http::Method::PUT => DavMethod::Put,
        http::Method::DELETE => DavMethod::Delete,
        _ => match m.as_str() {
            "MKCOL" => DavMethod::MkCol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            "PROPFIND" => DavMethod::PropFind,
            "PROPPATCH" => DavMethod::PropPatch,
            _ => return Err(DavError::UnknownDavMethod),
        },
    };
    Ok(m)
}

pub(crate) fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v[0].to_str().unwrap().to_owned()
}

// A buffer that implements "Write", so an xml EventWriter can produce
// into it and the bytes can be taken out incrementally.
#[derive(Clone)]
pub(crate) struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_httpdate() {
        assert_eq!(
            systemtime_to_httpdate(UNIX_EPOCH),
            "Thu, 01 Jan 1970 00:00:00 GMT"
        );
    }

    #[test]
    fn test_method_set() {
        assert!(DavMethodSet::HTTP_RO.contains_method(DavMethod::Get));
        assert!(!DavMethodSet::HTTP_RO.contains_method(DavMethod::Put));
        assert!(DavMethodSet::WEBDAV_RW.contains_method(DavMethod::PropPatch));
        assert!(dav_method(&http::Method::from_bytes(b"PROPFIND").unwrap()).is_ok());
        assert!(dav_method(&http::Method::from_bytes(b"BREW").unwrap()).is_err());
    }
}
