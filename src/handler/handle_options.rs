use headers::HeaderMapExt;
use http::{Request, Response};

use crate::body::Body;
use crate::errors::DavResult;
use crate::util::DavMethod;

impl crate::DavHandler {
    pub(crate) async fn handle_options(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();
        // compliance classes 1 (core) and 2 (locking).
        h.insert("DAV", "1, 2".parse().unwrap());
        // lets Microsoft clients pick the webdav code path.
        h.insert("MS-Author-Via", "DAV".parse().unwrap());
        h.typed_insert(headers::ContentLength(0));

        let path = self.path(req);
        let meta = self.fs().stat(&path).await.ok();

        // What is legal depends on what the target is: unmapped URLs
        // can only be created, collections have no body to GET or PUT.
        let methods: &[DavMethod] = match &meta {
            None => &[
                DavMethod::Options,
                DavMethod::Put,
                DavMethod::MkCol,
                DavMethod::Lock,
            ],
            Some(fi) if fi.is_dir => &[
                DavMethod::Options,
                DavMethod::Delete,
                DavMethod::PropFind,
                DavMethod::PropPatch,
                DavMethod::Copy,
                DavMethod::Move,
                DavMethod::Lock,
                DavMethod::Unlock,
            ],
            Some(_) => &[
                DavMethod::Options,
                DavMethod::Get,
                DavMethod::Head,
                DavMethod::Post,
                DavMethod::Put,
                DavMethod::Delete,
                DavMethod::PropFind,
                DavMethod::PropPatch,
                DavMethod::Copy,
                DavMethod::Move,
                DavMethod::Lock,
                DavMethod::Unlock,
            ],
        };
        let allow: Vec<&str> = methods
            .iter()
            .filter(|m| self.allow.contains_method(**m))
            .map(|m| m.as_str())
            .collect();
        res.headers_mut()
            .insert("Allow", allow.join(", ").parse().unwrap());

        Ok(res)
    }
}
