//! The backend contract between the protocol layer and a concrete store.
//!
//! The handlers never touch storage directly; they go through
//! [`DavFileSystem`]. Two implementations ship with the crate: a local
//! directory ([`localfs::LocalFs`]) and an ephemeral in-memory tree
//! ([`memfs::MemFs`]).

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::stream::Stream;
use thiserror::Error;

use crate::davheaders::ETagList;
use crate::davpath::DavPath;

#[cfg(feature = "localfs")]
pub mod localfs;
#[cfg(feature = "memfs")]
pub mod memfs;

pub type FsResult<T> = Result<T, FsError>;
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;
pub type FsStream<T> = Pin<Box<dyn Stream<Item = FsResult<T>> + Send + 'static>>;

/// Request body chunks, as handed to [`DavFileSystem::create`].
pub type FsBody = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// Categorized backend errors. The protocol layer translates these to
/// HTTP status codes centrally; backends must not leak native path
/// strings through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("precondition failed")]
    Exists,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("parent collection not found")]
    ParentNotFound,
    #[error("target is a collection")]
    IsCollection,
    #[error("insufficient storage")]
    InsufficientStorage,
    #[error("not implemented")]
    NotImplemented,
    #[error("general failure")]
    GeneralFailure,
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> FsError {
        match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
            io::ErrorKind::AlreadyExists => FsError::Exists,
            io::ErrorKind::TimedOut => FsError::DeadlineExceeded,
            _ => match e.raw_os_error() {
                Some(libc::ENOSPC) => FsError::InsufficientStorage,
                _ => FsError::GeneralFailure,
            },
        }
    }
}

/// Immutable description of a resource, as returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Server-relative path.
    pub path: String,
    /// Size in bytes (0 for collections).
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
    /// Is this a collection.
    pub is_dir: bool,
    /// Media type, if the backend knows one.
    pub mime_type: Option<String>,
    /// Strong validator; changes whenever the content does.
    pub etag: String,
}

impl FileInfo {
    /// The canonical etag: modification time (nanoseconds) and size,
    /// both in hex. Cheap, and collision free across genuine
    /// modifications within one backend.
    pub fn make_etag(modified: SystemTime, size: u64) -> String {
        let ns = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("{ns:x}{size:x}")
    }
}

/// If-Match / If-None-Match preconditions, evaluated by the backend
/// before any write.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    pub if_match: Option<ETagList>,
    pub if_none_match: Option<ETagList>,
}

impl Conditions {
    /// Check against the current etag (`None` if the resource does not
    /// exist). A failed precondition surfaces as [`FsError::Exists`],
    /// which maps to 412.
    pub fn check(&self, current: Option<&str>) -> FsResult<()> {
        if let Some(m) = &self.if_match {
            if !m.matches(current) {
                return Err(FsError::Exists);
            }
        }
        if let Some(m) = &self.if_none_match {
            if m.matches(current) {
                return Err(FsError::Exists);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    /// Fail with [`FsError::Exists`] instead of replacing an existing
    /// destination.
    pub no_overwrite: bool,
    /// Only create the destination collection, do not copy members.
    pub no_recursive: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MoveOptions {
    pub no_overwrite: bool,
}

/// A webdav filesystem backend.
///
/// All methods return boxed futures so the trait stays object safe;
/// implementations usually wrap an `async move` block with
/// `FutureExt::boxed`.
pub trait DavFileSystem: Send + Sync + 'static {
    /// Open a resource for reading and return its content as a stream.
    fn open<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FsStream<Bytes>>;

    /// Return the metadata of a resource.
    fn stat<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FileInfo>;

    /// List a collection. The stream yields the collection itself
    /// first, then its members; the entire subtree when `recursive`.
    fn read_dir<'a>(&'a self, path: &'a DavPath, recursive: bool)
        -> FsFuture<'a, FsStream<FileInfo>>;

    /// Create or replace a resource from a body stream.
    ///
    /// Preconditions are checked before the first write. A missing
    /// parent is [`FsError::ParentNotFound`], an existing collection at
    /// the target is [`FsError::IsCollection`]. On a write error the
    /// partial target is removed (best effort). Returns the post-write
    /// metadata and whether the resource was newly created.
    fn create<'a>(
        &'a self,
        path: &'a DavPath,
        body: FsBody,
        conditions: &'a Conditions,
    ) -> FsFuture<'a, (FileInfo, bool)>;

    /// Remove a resource, recursively for collections.
    fn remove_all<'a>(&'a self, path: &'a DavPath, conditions: &'a Conditions)
        -> FsFuture<'a, ()>;

    /// Create a collection. The target existing is [`FsError::Exists`],
    /// a missing parent [`FsError::ParentNotFound`].
    fn mkdir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Copy `src` to `dst`. Returns true if the destination was newly
    /// created, false if it replaced an existing resource.
    fn copy<'a>(
        &'a self,
        src: &'a DavPath,
        dst: &'a DavPath,
        options: CopyOptions,
    ) -> FsFuture<'a, bool>;

    /// Move `src` to `dst`, by rename when possible, otherwise by
    /// recursive copy plus removal of the source.
    fn move_all<'a>(
        &'a self,
        src: &'a DavPath,
        dst: &'a DavPath,
        options: MoveOptions,
    ) -> FsFuture<'a, bool>;
}
