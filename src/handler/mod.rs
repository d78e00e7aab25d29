//
// The handler: configuration, dispatch, and the lock confirmation
// step shared by all mutating methods.
//
use std::collections::HashMap;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use bytes::Buf;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{request_chunks, Body};
use crate::davheaders::{IfHeader, IfItem};
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::fs::{DavFileSystem, FsBody};
use crate::locks::{ConfirmError, LockGuard, LockManager, LockParams, ResolvedList};
use crate::props::{MemPropStore, PropStore};
use crate::util::{dav_method, DavMethod, DavMethodSet};

pub mod handle_copymove;
pub mod handle_delete;
pub mod handle_gethead;
pub mod handle_lock;
pub mod handle_mkcol;
pub mod handle_options;
pub mod handle_props;
pub mod handle_put;

// XML request bodies are pre-read and bounded.
const MAX_XML_BODY: usize = 65536;

/// Hook invoked with `(status, error)` after every failed request.
pub type Logger = dyn Fn(StatusCode, &(dyn StdError + 'static)) + Send + Sync;

/// Configuration builder for [`DavHandler`].
#[derive(Clone, Default)]
pub struct DavConfig {
    prefix: String,
    fs: Option<Arc<dyn DavFileSystem>>,
    locks: Option<Arc<LockManager>>,
    props: Option<Arc<dyn PropStore>>,
    allow: Option<DavMethodSet>,
    logger: Option<Arc<Logger>>,
}

impl DavConfig {
    /// Strip this prefix off the request path before mapping it to a
    /// backend path.
    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// The filesystem backend. Requests fail with 500 without one.
    pub fn filesystem(mut self, fs: Arc<dyn DavFileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// The lock manager. Requests fail with 500 without one.
    pub fn locksystem(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// The dead-property store. Defaults to an in-memory store.
    pub fn propstore(mut self, props: Arc<dyn PropStore>) -> Self {
        self.props = Some(props);
        self
    }

    /// Which methods to serve (default: all of them).
    pub fn methods(mut self, allow: DavMethodSet) -> Self {
        self.allow = Some(allow);
        self
    }

    /// Hook called with the status and cause of each failed request.
    pub fn logger(
        mut self,
        logger: impl Fn(StatusCode, &(dyn StdError + 'static)) + Send + Sync + 'static,
    ) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    pub fn build(self) -> DavHandler {
        DavHandler {
            prefix: Arc::new(self.prefix.trim_end_matches('/').to_string()),
            fs: self.fs,
            locks: self.locks,
            props: self.props.unwrap_or_else(|| MemPropStore::new() as _),
            allow: self.allow.unwrap_or(DavMethodSet::WEBDAV_RW),
            logger: self.logger,
        }
    }
}

/// The webdav handler.
///
/// Takes an `http::Request`, runs the webdav method against the
/// configured backend, and produces an `http::Response`.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) fs: Option<Arc<dyn DavFileSystem>>,
    pub(crate) locks: Option<Arc<LockManager>>,
    pub(crate) props: Arc<dyn PropStore>,
    pub(crate) allow: DavMethodSet,
    pub(crate) logger: Option<Arc<Logger>>,
}

impl DavHandler {
    /// Start building a handler.
    pub fn builder() -> DavConfig {
        DavConfig::default()
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        self.handle_inner(req).await
    }

    async fn handle_inner<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        match self.dispatch(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {err:?}");
                let status = err.statuscode();
                if let Some(logger) = &self.logger {
                    logger(status, &err);
                }
                let reason = status.canonical_reason().unwrap_or("");
                let mut resp = Response::builder()
                    .status(status)
                    .header("Content-Type", "text/plain; charset=utf-8");
                if err.must_close() {
                    resp = resp.header("Connection", "close");
                }
                resp.body(Body::from(reason)).unwrap()
            }
        }
    }

    async fn dispatch<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        if self.fs.is_none() || self.locks.is_none() {
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into());
        }

        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };
        if !self.allow.contains_method(method) {
            debug!("method {} not allowed on {}", req.method(), req.uri());
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // validate the path early; handlers re-derive it infallibly.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;
        debug!("== START REQUEST {method:?} {path}");

        // PUT streams its body into the backend; everything else gets
        // a bounded, pre-read body.
        let (body_strm, body_data) = match method {
            DavMethod::Put => (Some(body), Vec::new()),
            _ => (None, read_request(body, MAX_XML_BODY).await?),
        };

        match method {
            DavMethod::PropFind | DavMethod::PropPatch | DavMethod::Lock => {}
            _ => {
                if !body_data.is_empty() {
                    // this method takes no body.
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
                }
            }
        }

        match method {
            DavMethod::Options => self.handle_options(&req).await,
            DavMethod::Get | DavMethod::Head | DavMethod::Post => {
                self.handle_gethead(&req, method).await
            }
            DavMethod::Put => {
                let stream: FsBody = Box::pin(request_chunks(body_strm.unwrap()));
                self.handle_put(&req, stream).await
            }
            DavMethod::Delete => self.handle_delete(&req).await,
            DavMethod::MkCol => self.handle_mkcol(&req).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(&req, method).await,
            DavMethod::Lock => self.handle_lock(&req, &body_data).await,
            DavMethod::Unlock => self.handle_unlock(&req).await,
            DavMethod::PropFind => self.handle_propfind(&req, &body_data).await,
            DavMethod::PropPatch => self.handle_proppatch(&req, &body_data).await,
        }
    }
}

// Internal helpers shared by the method handlers.
impl DavHandler {
    // This never fails: dispatch() validated the path already.
    pub(crate) fn path(&self, req: &Request<()>) -> DavPath {
        DavPath::from_uri_and_prefix(req.uri(), &self.prefix).unwrap()
    }

    // Present whenever a handler runs: dispatch() rejected earlier otherwise.
    pub(crate) fn fs(&self) -> &Arc<dyn DavFileSystem> {
        self.fs.as_ref().unwrap()
    }

    pub(crate) fn locks(&self) -> &Arc<LockManager> {
        self.locks.as_ref().unwrap()
    }

    // The href of a normalized path, prefix included.
    pub(crate) fn href(&self, path: &str, is_dir: bool) -> String {
        let mut s = crate::davpath::url_encode(&self.prefix);
        s.push_str(&crate::davpath::url_encode(path));
        if is_dir && !s.ends_with('/') {
            s.push('/');
        }
        s
    }

    /// Verify that the request may mutate `src` (and `dst`).
    ///
    /// With an `If:` header, evaluate it and demand that the lock
    /// tokens covering both paths were submitted. Without one, take
    /// temporary locks so a concurrent client's locks still conflict;
    /// the returned guard releases them on every exit path.
    pub(crate) async fn confirm_locks(
        &self,
        req: &Request<()>,
        src: Option<&DavPath>,
        dst: Option<&DavPath>,
    ) -> DavResult<LockGuard> {
        let locks = self.locks();
        let header = req
            .headers()
            .typed_try_get::<IfHeader>()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;

        let Some(header) = header else {
            let mut tokens = Vec::new();
            for path in [src, dst].into_iter().flatten() {
                match locks.lock(path.as_str(), LockParams::default()) {
                    Ok(rec) => tokens.push(rec.token),
                    Err(_) => {
                        for token in &tokens {
                            let _ = locks.unlock(token);
                        }
                        return Err(StatusCode::LOCKED.into());
                    }
                }
            }
            return Ok(LockGuard::new(locks.clone(), tokens));
        };

        // resolve each list's tagged resource to a server path. a tag
        // pointing at another host cannot match anything here.
        let req_host = req
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .or_else(|| req.uri().authority().map(|a| a.to_string()));

        let default_path = src.or(dst);
        let mut lists = Vec::new();
        for list in header.lists {
            let path = match &list.resource_tag {
                None => match default_path {
                    Some(p) => p.as_str().to_string(),
                    None => continue,
                },
                Some(tag) => {
                    let Ok(uri) = tag.parse::<http::Uri>() else {
                        continue;
                    };
                    if let Some(authority) = uri.authority() {
                        if req_host.as_deref() != Some(authority.as_str()) {
                            continue;
                        }
                    }
                    match DavPath::from_uri_and_prefix(&uri, &self.prefix) {
                        Ok(p) => p.as_str().to_string(),
                        Err(e) => return Err(e),
                    }
                }
            };
            lists.push(ResolvedList {
                path,
                conditions: list.conditions,
            });
        }

        // pre-fetch the etags the entity-tag conditions compare against.
        let mut etags: HashMap<String, String> = HashMap::new();
        for list in &lists {
            let has_etag_cond = list
                .conditions
                .iter()
                .any(|c| matches!(c.item, IfItem::ETag(_)));
            if !has_etag_cond || etags.contains_key(&list.path) {
                continue;
            }
            if let Ok(path) = DavPath::new(&list.path) {
                if let Ok(fi) = self.fs().stat(&path).await {
                    etags.insert(list.path.clone(), fi.etag);
                }
            }
        }

        match locks.confirm(
            src.map(|p| p.as_str()),
            dst.map(|p| p.as_str()),
            &lists,
            &etags,
        ) {
            Ok(()) => Ok(LockGuard::none()),
            Err(ConfirmError::Locked) => Err(StatusCode::LOCKED.into()),
            Err(ConfirmError::PreconditionFailed) => Err(StatusCode::PRECONDITION_FAILED.into()),
        }
    }
}

// Drain the request body into memory, bounded.
async fn read_request<ReqBody, ReqData, ReqError>(
    body: ReqBody,
    max_size: usize,
) -> DavResult<Vec<u8>>
where
    ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    ReqData: Buf + Send + 'static,
    ReqError: StdError + Send + Sync + 'static,
{
    let mut data = Vec::new();
    pin_utils::pin_mut!(body);
    while let Some(chunk) = body.data().await {
        let mut buf = chunk.map_err(|_| {
            DavError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
        })?;
        while buf.has_remaining() {
            if data.len() + buf.remaining() > max_size {
                return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
            }
            let b = buf.chunk();
            let l = b.len();
            data.extend_from_slice(b);
            buf.advance(l);
        }
    }
    Ok(data)
}
