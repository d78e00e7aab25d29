use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders::{IfMatch, IfNoneMatch};
use crate::errors::{DavError, DavResult};
use crate::fs::{Conditions, FsBody};
use crate::util::systemtime_to_httpdate;

impl crate::DavHandler {
    pub(crate) async fn handle_put(
        &self,
        req: &Request<()>,
        body: FsBody,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);
        let conditions = request_conditions(req)?;

        let _guard = self.confirm_locks(req, Some(&path), None).await?;

        let (fi, created) = self.fs().create(&path, body, &conditions).await?;

        let status = if created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        };
        let mut res = Response::builder()
            .status(status)
            .header("Last-Modified", systemtime_to_httpdate(fi.modified))
            .header("ETag", format!("\"{}\"", fi.etag));
        if let Some(mime) = &fi.mime_type {
            res = res.header("Content-Type", mime.as_str());
        }
        Ok(res.body(Body::empty()).unwrap())
    }
}

// If-Match / If-None-Match, handed to the backend so they are
// evaluated before the first byte is written.
pub(crate) fn request_conditions(req: &Request<()>) -> DavResult<Conditions> {
    let if_match = req
        .headers()
        .typed_try_get::<IfMatch>()
        .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
    let if_none_match = req
        .headers()
        .typed_try_get::<IfNoneMatch>()
        .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
    Ok(Conditions {
        if_match: if_match.map(|m| m.0),
        if_none_match: if_none_match.map(|m| m.0),
    })
}
