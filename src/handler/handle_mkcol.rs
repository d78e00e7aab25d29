use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::errors::{DavError, DavResult};
use crate::fs::FsError;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        // we don't understand any MKCOL request body; the dispatcher
        // already rejected non-empty ones.
        if req.headers().contains_key(http::header::CONTENT_TYPE) {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        let path = self.path(req);
        let _guard = self.confirm_locks(req, Some(&path), None).await?;

        match self.fs().mkdir(&path).await {
            Ok(()) => Ok(Response::builder()
                .status(StatusCode::CREATED)
                .body(Body::empty())
                .unwrap()),
            // an existing resource, collection or not, is 405 here.
            Err(FsError::Exists) => Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED)),
            Err(e) => Err(e.into()),
        }
    }
}
