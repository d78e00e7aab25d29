use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::errors::DavResult;
use crate::handler::handle_put::request_conditions;

impl crate::DavHandler {
    pub(crate) async fn handle_delete(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req);
        let conditions = request_conditions(req)?;

        let _guard = self.confirm_locks(req, Some(&path), None).await?;

        // the backend stats before removing, so deleting something
        // that is not there is a 404 and not a silent success.
        self.fs().remove_all(&path, &conditions).await?;

        // dead properties die with the resource (and its descendants).
        self.props.delete(path.as_str());

        Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap())
    }
}
