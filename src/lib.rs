//! ## Generic async HTTP/Webdav server handler
//!
//! Webdav (RFC4918) is HTTP (GET/HEAD/PUT/DELETE) plus a set of
//! extension methods to manage collections (MKCOL, PROPFIND), copy and
//! move resources (COPY, MOVE), attach properties to them (PROPPATCH),
//! and coordinate writers (LOCK, UNLOCK).
//!
//! This library maps that protocol onto a filesystem abstraction. A
//! [`DavHandler`] takes an `http::Request`, runs the method against a
//! [`DavFileSystem`][fs::DavFileSystem] backend, and produces an
//! `http::Response` with a [`Body`][body::Body] that works with hyper
//! and anything else speaking the `http` / `http_body` types.
//!
//! The moving parts, all replaceable:
//!
//! - a filesystem backend: [`LocalFs`][fs::localfs::LocalFs] serves a
//!   local directory, [`MemFs`][fs::memfs::MemFs] an in-memory tree.
//! - the [`LockManager`][locks::LockManager]: an in-memory table of
//!   RFC4918 write locks, consulted by every mutating method.
//! - a [`PropStore`][props::PropStore] holding dead properties; the
//!   default keeps them in memory.
//!
//! ## Example
//!
//! A server on hyper, sharing /tmp read/write:
//!
//! ```no_run
//! use std::convert::Infallible;
//! use davkit::{DavHandler, fs::localfs::LocalFs, locks::LockManager};
//!
//! #[tokio::main]
//! async fn main() {
//!     let dav = DavHandler::builder()
//!         .filesystem(LocalFs::new("/tmp", false))
//!         .locksystem(LockManager::new())
//!         .build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav = dav.clone();
//!         async move {
//!             Ok::<_, Infallible>(hyper::service::service_fn(move |req| {
//!                 let dav = dav.clone();
//!                 async move { Ok::<_, Infallible>(dav.handle(req).await) }
//!             }))
//!         }
//!     });
//!
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!     let _ = hyper::Server::bind(&addr).serve(make_service).await;
//! }
//! ```

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

pub mod body;
pub mod davheaders;
pub mod davpath;
mod errors;
pub mod fs;
mod handler;
pub mod locks;
mod multistatus;
pub mod props;
mod util;
mod xmlcodec;

pub use crate::handler::{DavConfig, DavHandler, Logger};
pub use crate::util::{DavMethod, DavMethodSet};
