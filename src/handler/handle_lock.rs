use std::time::Duration;

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders::{DavTimeout, Depth, IfHeader, IfItem, LockToken};
use crate::errors::{DavError, DavResult};
use crate::fs::{Conditions, FsBody};
use crate::locks::LockParams;
use crate::xmlcodec;

fn bad_request() -> DavError {
    DavError::Status(StatusCode::BAD_REQUEST)
}

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        // a missing Timeout header means the lock does not expire.
        let timeout = req
            .headers()
            .typed_try_get::<DavTimeout>()
            .map_err(|_| bad_request())?
            .map(|t| t.0)
            .unwrap_or(Duration::ZERO);
        let path = self.path(req);

        let Some(info) = xmlcodec::parse_lockinfo(body)? else {
            return self.refresh_lock(req, timeout).await;
        };

        let depth_infinity = match req
            .headers()
            .typed_try_get::<Depth>()
            .map_err(|_| bad_request())?
        {
            None | Some(Depth::Infinity) => true,
            Some(Depth::Zero) => false,
            Some(Depth::One) => return Err(bad_request()),
        };

        let rec = self
            .locks()
            .lock(
                path.as_str(),
                LockParams {
                    owner: info.owner,
                    depth_infinity,
                    shared: info.shared,
                    timeout,
                },
            )
            .map_err(|_| DavError::Status(StatusCode::LOCKED))?;

        // locking an unmapped URL creates an empty resource, and the
        // response says so with a 201.
        let mut created = false;
        if self.fs().stat(&path).await.is_err() {
            let empty: FsBody = Box::pin(futures_util::stream::empty());
            match self.fs().create(&path, empty, &Conditions::default()).await {
                Ok(_) => created = true,
                Err(e) => {
                    let _ = self.locks().unlock(&rec.token);
                    return Err(e.into());
                }
            }
        }

        let href = self.href(&rec.root, false);
        let body = xmlcodec::lock_response_body(&rec, &href)?;
        let status = if created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        Ok(Response::builder()
            .status(status)
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Lock-Token", format!("<{}>", rec.token))
            .body(Body::from(body))
            .unwrap())
    }

    // An empty LOCK body refreshes the lock named by the If header.
    async fn refresh_lock(
        &self,
        req: &Request<()>,
        timeout: Duration,
    ) -> DavResult<Response<Body>> {
        let header = req
            .headers()
            .typed_try_get::<IfHeader>()
            .map_err(|_| bad_request())?
            .ok_or_else(bad_request)?;
        let token = match header.lists.as_slice() {
            [list] if list.conditions.len() == 1 && !list.conditions[0].not => {
                match &list.conditions[0].item {
                    IfItem::Token(token) => Some(token.clone()),
                    IfItem::ETag(_) => None,
                }
            }
            _ => None,
        }
        .ok_or_else(bad_request)?;

        let rec = self
            .locks()
            .refresh(&token, timeout)
            .map_err(|_| DavError::Status(StatusCode::PRECONDITION_FAILED))?;

        let href = self.href(&rec.root, false);
        let body = xmlcodec::lock_response_body(&rec, &href)?;
        Ok(Response::builder()
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(Body::from(body))
            .unwrap())
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        // Lock-Token is a Coded-URL; the typed header strips the
        // brackets and rejects anything else.
        let token = req
            .headers()
            .typed_try_get::<LockToken>()
            .map_err(|_| bad_request())?
            .ok_or_else(bad_request)?;

        // the only way unlock fails is an unknown (or expired) token.
        if self.locks().unlock(&token.0).is_err() {
            return Err(StatusCode::CONFLICT.into());
        }
        Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap())
    }
}
