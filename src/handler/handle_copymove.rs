use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders::{Depth, Destination, Overwrite};
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::fs::{CopyOptions, MoveOptions};
use crate::util::DavMethod;

impl crate::DavHandler {
    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);
        let dst = self.destination(req)?;
        if dst == path {
            return Err(StatusCode::FORBIDDEN.into());
        }

        let overwrite = req
            .headers()
            .typed_try_get::<Overwrite>()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?
            .map(|o| o.0)
            .unwrap_or(true);
        let depth = req
            .headers()
            .typed_try_get::<Depth>()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;

        let created = if method == DavMethod::Copy {
            // only the destination changes, so only it needs lock
            // coverage; copying from a locked-by-others source is fine.
            let _guard = self.confirm_locks(req, Some(&dst), None).await?;

            // a collection COPY without Depth acts as depth infinity.
            let no_recursive = match depth {
                None | Some(Depth::Infinity) => false,
                Some(Depth::Zero) => true,
                Some(Depth::One) => return Err(StatusCode::BAD_REQUEST.into()),
            };
            let created = self
                .fs()
                .copy(
                    &path,
                    &dst,
                    CopyOptions {
                        no_overwrite: !overwrite,
                        no_recursive,
                    },
                )
                .await?;
            if no_recursive {
                // only the collection itself was duplicated.
                for (name, elem) in self.props.get(path.as_str()) {
                    self.props.set(dst.as_str(), name, elem);
                }
            } else {
                self.props.copy(path.as_str(), dst.as_str());
            }
            created
        } else {
            let _guard = self.confirm_locks(req, Some(&path), Some(&dst)).await?;

            // a MOVE is always whole-tree; any other Depth is an error.
            match depth {
                None | Some(Depth::Infinity) => {}
                Some(_) => return Err(StatusCode::BAD_REQUEST.into()),
            }
            let created = self
                .fs()
                .move_all(
                    &path,
                    &dst,
                    MoveOptions {
                        no_overwrite: !overwrite,
                    },
                )
                .await?;
            self.props.move_all(path.as_str(), dst.as_str());
            created
        };

        let status = if created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        };
        Ok(Response::builder()
            .status(status)
            .body(Body::empty())
            .unwrap())
    }

    // Resolve the Destination header to a path on this server.
    fn destination(&self, req: &Request<()>) -> DavResult<DavPath> {
        let dest = req
            .headers()
            .typed_try_get::<Destination>()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        let uri: http::Uri = dest
            .0
            .parse()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;

        if let Some(authority) = uri.authority() {
            let req_host = req
                .headers()
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
                .or_else(|| req.uri().authority().map(|a| a.to_string()));
            if req_host.as_deref() != Some(authority.as_str()) {
                // we cannot write to another server.
                return Err(StatusCode::BAD_GATEWAY.into());
            }
        }
        DavPath::from_uri_and_prefix(&uri, &self.prefix)
    }
}
