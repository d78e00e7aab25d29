use std::io;

use futures_util::StreamExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::errors::DavResult;
use crate::util::{systemtime_to_httpdate, DavMethod};

impl crate::DavHandler {
    // GET and HEAD; POST is served the same way.
    pub(crate) async fn handle_gethead(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);
        let fi = self.fs().stat(&path).await?;
        if fi.is_dir {
            // collections have no body.
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }

        let mut res = Response::builder()
            .header("Content-Length", fi.size.to_string())
            .header("Last-Modified", systemtime_to_httpdate(fi.modified))
            .header("ETag", format!("\"{}\"", fi.etag));
        if let Some(mime) = &fi.mime_type {
            res = res.header("Content-Type", mime.as_str());
        }

        let body = if method == DavMethod::Head {
            Body::empty()
        } else {
            let stream = self.fs().open(&path).await?;
            Body::stream(
                stream.map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e))),
            )
        };
        Ok(res.body(body).unwrap())
    }
}
