use std::collections::BTreeMap;
use std::io;

use bytes::Bytes;
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders::Depth;
use crate::errors::{DavError, DavResult};
use crate::fs::FileInfo;
use crate::multistatus::{MultistatusWriter, PropValue, Propstat};
use crate::props::PropName;
use crate::util::systemtime_to_httpdate;
use crate::xmlcodec::{self, PropfindRequest, NS_DAV};

const APPLICATION_XML: &str = "application/xml; charset=utf-8";

fn xml_io_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "error generating xml response")
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let pf = xmlcodec::parse_propfind(body)?;
        let depth = req
            .headers()
            .typed_try_get::<Depth>()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?
            .unwrap_or(Depth::Infinity);
        let path = self.path(req);
        let root = self.fs().stat(&path).await?;

        // The multistatus body streams: one <response> per resource as
        // the walk yields them, never the whole tree at once.
        let this = self.clone();
        let stream = async_stream::stream! {
            let mut mw = match MultistatusWriter::new() {
                Ok(mw) => mw,
                Err(_) => {
                    yield Err(xml_io_error());
                    return;
                }
            };

            if depth == Depth::Zero || !root.is_dir {
                let propstats = this.build_propstats(&pf, &root);
                let href = this.href(&root.path, root.is_dir);
                if mw.write_response(&href, &propstats).is_err() {
                    yield Err(xml_io_error());
                    return;
                }
                yield Ok(mw.take());
            } else {
                let mut entries = match this.fs().read_dir(&path, depth == Depth::Infinity).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        // 207 is already on the wire; record the failure
                        // as the only response.
                        let href = this.href(path.as_str(), true);
                        let _ = mw.write_status_response(&href, DavError::Fs(e).statuscode());
                        yield Ok(mw.take());
                        if let Ok(tail) = mw.finish() {
                            yield Ok(tail);
                        }
                        return;
                    }
                };
                while let Some(entry) = entries.next().await {
                    match entry {
                        Ok(fi) => {
                            let propstats = this.build_propstats(&pf, &fi);
                            let href = this.href(&fi.path, fi.is_dir);
                            if mw.write_response(&href, &propstats).is_err() {
                                yield Err(xml_io_error());
                                return;
                            }
                            yield Ok(mw.take());
                        }
                        Err(e) => {
                            // best effort: note the error, then close the
                            // document cleanly.
                            debug!("propfind walk failed: {e}");
                            let href = this.href(path.as_str(), true);
                            let _ = mw.write_status_response(&href, DavError::Fs(e).statuscode());
                            yield Ok(mw.take());
                            break;
                        }
                    }
                }
            }

            match mw.finish() {
                Ok(tail) => yield Ok(tail),
                Err(_) => yield Err(xml_io_error()),
            }
        };

        Ok(Response::builder()
            .status(StatusCode::MULTI_STATUS)
            .header("Content-Type", APPLICATION_XML)
            .body(Body::stream(stream))
            .unwrap())
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);
        let _guard = self.confirm_locks(req, Some(&path), None).await?;
        let fi = self.fs().stat(&path).await?;
        let updates = xmlcodec::parse_propertyupdate(body)?;

        // processed in document order; the reply groups the
        // per-property results by status code.
        let mut by_status: BTreeMap<u16, Vec<PropValue>> = BTreeMap::new();
        for update in updates {
            let name = PropName::of_element(&update.element);
            let status = if name.is_dav() {
                // live properties are read only.
                StatusCode::FORBIDDEN
            } else {
                if update.set {
                    self.props
                        .set(path.as_str(), name.clone(), update.element.clone());
                } else {
                    self.props.remove(path.as_str(), &name);
                }
                StatusCode::OK
            };
            by_status
                .entry(status.as_u16())
                .or_default()
                .push(PropValue::Empty(name));
        }

        let propstats: Vec<Propstat> = by_status
            .into_iter()
            .map(|(status, props)| Propstat {
                status: StatusCode::from_u16(status).unwrap(),
                props,
            })
            .collect();

        let mut mw = MultistatusWriter::new()?;
        mw.write_response(&self.href(&fi.path, fi.is_dir), &propstats)?;
        let head = mw.take();
        let tail = mw.finish()?;
        let body: Vec<u8> = [head, tail].concat();

        Ok(Response::builder()
            .status(StatusCode::MULTI_STATUS)
            .header("Content-Type", APPLICATION_XML)
            .body(Body::from(Bytes::from(body)))
            .unwrap())
    }

    // The propstat groups of one resource for a parsed propfind body.
    fn build_propstats(&self, pf: &PropfindRequest, fi: &FileInfo) -> Vec<Propstat> {
        match pf {
            PropfindRequest::AllProp => {
                let mut props = self.live_props(fi);
                props.extend(
                    self.props
                        .get(&fi.path)
                        .into_iter()
                        .map(|(_, elem)| PropValue::Dead(elem)),
                );
                vec![Propstat {
                    status: StatusCode::OK,
                    props,
                }]
            }
            PropfindRequest::PropName => {
                let mut props: Vec<PropValue> = self
                    .live_prop_names(fi)
                    .into_iter()
                    .map(PropValue::Empty)
                    .collect();
                props.extend(
                    self.props
                        .get(&fi.path)
                        .into_iter()
                        .map(|(name, _)| PropValue::Empty(name)),
                );
                vec![Propstat {
                    status: StatusCode::OK,
                    props,
                }]
            }
            PropfindRequest::Props(names) => {
                let mut found = Vec::new();
                let mut missing = Vec::new();
                for name in names {
                    match self.lookup_prop(name, fi) {
                        Some(value) => found.push(value),
                        None => missing.push(PropValue::Empty(name.clone())),
                    }
                }
                let mut propstats = Vec::new();
                if !found.is_empty() {
                    propstats.push(Propstat {
                        status: StatusCode::OK,
                        props: found,
                    });
                }
                if !missing.is_empty() {
                    propstats.push(Propstat {
                        status: StatusCode::NOT_FOUND,
                        props: missing,
                    });
                }
                if propstats.is_empty() {
                    // an empty <prop/> still yields one (empty) group.
                    propstats.push(Propstat {
                        status: StatusCode::OK,
                        props: Vec::new(),
                    });
                }
                propstats
            }
        }
    }

    fn live_props(&self, fi: &FileInfo) -> Vec<PropValue> {
        let mut props = vec![PropValue::ResourceType { is_dir: fi.is_dir }];
        if !fi.is_dir {
            props.push(PropValue::Text(
                PropName::new(NS_DAV, "getcontentlength"),
                fi.size.to_string(),
            ));
            props.push(PropValue::Text(
                PropName::new(NS_DAV, "getlastmodified"),
                systemtime_to_httpdate(fi.modified),
            ));
            if let Some(mime) = &fi.mime_type {
                props.push(PropValue::Text(
                    PropName::new(NS_DAV, "getcontenttype"),
                    mime.clone(),
                ));
            }
            props.push(PropValue::Text(
                PropName::new(NS_DAV, "getetag"),
                format!("\"{}\"", fi.etag),
            ));
        }
        props.push(PropValue::SupportedLock);
        props.push(PropValue::LockDiscovery(self.active_locks(&fi.path)));
        props
    }

    fn live_prop_names(&self, fi: &FileInfo) -> Vec<PropName> {
        let mut names = vec![PropName::new(NS_DAV, "resourcetype")];
        if !fi.is_dir {
            names.push(PropName::new(NS_DAV, "getcontentlength"));
            names.push(PropName::new(NS_DAV, "getlastmodified"));
            if fi.mime_type.is_some() {
                names.push(PropName::new(NS_DAV, "getcontenttype"));
            }
            names.push(PropName::new(NS_DAV, "getetag"));
        }
        names.push(PropName::new(NS_DAV, "supportedlock"));
        names.push(PropName::new(NS_DAV, "lockdiscovery"));
        names
    }

    fn lookup_prop(&self, name: &PropName, fi: &FileInfo) -> Option<PropValue> {
        if name.ns == NS_DAV {
            return match name.local.as_str() {
                "resourcetype" => Some(PropValue::ResourceType { is_dir: fi.is_dir }),
                "getcontentlength" if !fi.is_dir => {
                    Some(PropValue::Text(name.clone(), fi.size.to_string()))
                }
                "getlastmodified" if !fi.is_dir => Some(PropValue::Text(
                    name.clone(),
                    systemtime_to_httpdate(fi.modified),
                )),
                "getcontenttype" => fi
                    .mime_type
                    .as_ref()
                    .map(|mime| PropValue::Text(name.clone(), mime.clone())),
                "getetag" if !fi.is_dir => {
                    Some(PropValue::Text(name.clone(), format!("\"{}\"", fi.etag)))
                }
                "supportedlock" => Some(PropValue::SupportedLock),
                "lockdiscovery" => Some(PropValue::LockDiscovery(self.active_locks(&fi.path))),
                _ => None,
            };
        }
        self.props.find(&fi.path, name).map(PropValue::Dead)
    }

    fn active_locks(&self, path: &str) -> Vec<(crate::locks::LockRecord, String)> {
        self.locks()
            .covering(path)
            .into_iter()
            .map(|rec| {
                let href = self.href(&rec.root, false);
                (rec, href)
            })
            .collect()
    }
}
