//! Internal error type, and the mapping from backend errors to HTTP status codes.

use std::error::Error;
use std::fmt;
use std::io;

use http::StatusCode;

use crate::fs::FsError;

pub(crate) type DavResult<T> = Result<T, DavError>;

#[derive(Debug)]
pub(crate) enum DavError {
    UnknownDavMethod,
    Utf8Error,
    XmlReadError,
    XmlWriteError,
    InvalidPath,
    PrefixMismatch,
    Status(StatusCode),
    StatusClose(StatusCode),
    Fs(FsError),
    Io(io::Error),
}

impl DavError {
    /// The HTTP status code this error maps to.
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::UnknownDavMethod => StatusCode::BAD_REQUEST,
            DavError::Utf8Error => StatusCode::BAD_REQUEST,
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlWriteError => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::PrefixMismatch => StatusCode::NOT_FOUND,
            DavError::Status(s) | DavError::StatusClose(s) => *s,
            DavError::Fs(e) => fs_to_status(e),
            DavError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the connection must be closed after this error. Set when
    /// we errored out without draining the request body.
    pub(crate) fn must_close(&self) -> bool {
        matches!(self, DavError::StatusClose(_))
    }
}

fn fs_to_status(e: &FsError) -> StatusCode {
    match e {
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::PermissionDenied => StatusCode::FORBIDDEN,
        FsError::Exists => StatusCode::PRECONDITION_FAILED,
        FsError::DeadlineExceeded => StatusCode::SERVICE_UNAVAILABLE,
        FsError::ParentNotFound => StatusCode::CONFLICT,
        FsError::IsCollection => StatusCode::METHOD_NOT_ALLOWED,
        FsError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl fmt::Display for DavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DavError::UnknownDavMethod => write!(f, "method not supported"),
            DavError::Utf8Error => write!(f, "invalid utf-8 in request path"),
            DavError::XmlReadError => write!(f, "invalid xml request body"),
            DavError::XmlWriteError => write!(f, "error generating xml response"),
            DavError::InvalidPath => write!(f, "invalid path"),
            DavError::PrefixMismatch => write!(f, "path prefix mismatch"),
            DavError::Status(s) | DavError::StatusClose(s) => write!(f, "{s}"),
            DavError::Fs(e) => write!(f, "{e}"),
            DavError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::Fs(e) => Some(e),
            DavError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StatusCode> for DavError {
    fn from(s: StatusCode) -> Self {
        DavError::Status(s)
    }
}

impl From<FsError> for DavError {
    fn from(e: FsError) -> Self {
        DavError::Fs(e)
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::Io(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(_: xml::writer::Error) -> Self {
        DavError::XmlWriteError
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(_: xmltree::ParseError) -> Self {
        DavError::XmlReadError
    }
}
