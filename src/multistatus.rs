//! Streaming encoder for 207 Multi-Status bodies.
//!
//! The writer keeps the XML document open and hands out the encoded
//! bytes after every response element, so a PROPFIND on a deep tree
//! never buffers the whole reply.

use bytes::Bytes;
use http::StatusCode;
use xml::writer::{EventWriter, XmlEvent};
use xmltree::Element;

use crate::errors::DavResult;
use crate::locks::LockRecord;
use crate::props::PropName;
use crate::util::MemBuffer;
use crate::xmlcodec::{self, NS_DAV};

pub(crate) fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}

/// One property inside a propstat group.
pub(crate) enum PropValue {
    /// Name only, no value (propname replies, 404 groups).
    Empty(PropName),
    /// A live property with text content.
    Text(PropName, String),
    /// `<D:resourcetype>`, with `<D:collection/>` for collections.
    ResourceType { is_dir: bool },
    /// `<D:supportedlock>` advertising exclusive write locks.
    SupportedLock,
    /// `<D:lockdiscovery>` enumerating the covering locks.
    LockDiscovery(Vec<(LockRecord, String)>),
    /// A dead property, written back verbatim.
    Dead(Element),
}

pub(crate) struct Propstat {
    pub status: StatusCode,
    pub props: Vec<PropValue>,
}

pub(crate) struct MultistatusWriter {
    w: EventWriter<MemBuffer>,
}

impl MultistatusWriter {
    pub fn new() -> DavResult<MultistatusWriter> {
        let mut w = xmlcodec::new_writer();
        w.write(XmlEvent::start_element("D:multistatus").ns("D", NS_DAV))?;
        Ok(MultistatusWriter { w })
    }

    /// The bytes encoded so far.
    pub fn take(&mut self) -> Bytes {
        self.w.inner_mut().take()
    }

    pub fn write_response(&mut self, href: &str, propstats: &[Propstat]) -> DavResult<()> {
        let w = &mut self.w;
        w.write(XmlEvent::start_element("D:response"))?;
        w.write(XmlEvent::start_element("D:href"))?;
        w.write(XmlEvent::characters(href))?;
        w.write(XmlEvent::end_element())?;
        for ps in propstats {
            w.write(XmlEvent::start_element("D:propstat"))?;
            w.write(XmlEvent::start_element("D:prop"))?;
            for prop in &ps.props {
                write_prop(w, prop)?;
            }
            w.write(XmlEvent::end_element())?;
            w.write(XmlEvent::start_element("D:status"))?;
            w.write(XmlEvent::characters(&status_line(ps.status)))?;
            w.write(XmlEvent::end_element())?;
            w.write(XmlEvent::end_element())?;
        }
        w.write(XmlEvent::end_element())?;
        Ok(())
    }

    /// A response carrying only a status, used to report a resource
    /// that failed mid-walk.
    pub fn write_status_response(&mut self, href: &str, status: StatusCode) -> DavResult<()> {
        let w = &mut self.w;
        w.write(XmlEvent::start_element("D:response"))?;
        w.write(XmlEvent::start_element("D:href"))?;
        w.write(XmlEvent::characters(href))?;
        w.write(XmlEvent::end_element())?;
        w.write(XmlEvent::start_element("D:status"))?;
        w.write(XmlEvent::characters(&status_line(status)))?;
        w.write(XmlEvent::end_element())?;
        w.write(XmlEvent::end_element())?;
        Ok(())
    }

    /// Close the root element and return the remaining bytes.
    pub fn finish(mut self) -> DavResult<Bytes> {
        self.w.write(XmlEvent::end_element())?;
        Ok(self.w.inner_mut().take())
    }
}

fn write_prop(
    w: &mut EventWriter<MemBuffer>,
    prop: &PropValue,
) -> Result<(), xml::writer::Error> {
    match prop {
        PropValue::Empty(name) => xmlcodec::write_prop_name(w, name),
        PropValue::Text(name, text) => {
            if name.ns == NS_DAV {
                w.write(XmlEvent::start_element(format!("D:{}", name.local).as_str()))?;
            } else if name.ns.is_empty() {
                w.write(XmlEvent::start_element(name.local.as_str()))?;
            } else {
                w.write(
                    XmlEvent::start_element(name.local.as_str()).default_ns(name.ns.as_str()),
                )?;
            }
            w.write(XmlEvent::characters(text))?;
            w.write(XmlEvent::end_element())
        }
        PropValue::ResourceType { is_dir } => {
            w.write(XmlEvent::start_element("D:resourcetype"))?;
            if *is_dir {
                w.write(XmlEvent::start_element("D:collection"))?;
                w.write(XmlEvent::end_element())?;
            }
            w.write(XmlEvent::end_element())
        }
        PropValue::SupportedLock => {
            w.write(XmlEvent::start_element("D:supportedlock"))?;
            w.write(XmlEvent::start_element("D:lockentry"))?;
            w.write(XmlEvent::start_element("D:lockscope"))?;
            w.write(XmlEvent::start_element("D:exclusive"))?;
            w.write(XmlEvent::end_element())?;
            w.write(XmlEvent::end_element())?;
            w.write(XmlEvent::start_element("D:locktype"))?;
            w.write(XmlEvent::start_element("D:write"))?;
            w.write(XmlEvent::end_element())?;
            w.write(XmlEvent::end_element())?;
            w.write(XmlEvent::end_element())?;
            w.write(XmlEvent::end_element())
        }
        PropValue::LockDiscovery(locks) => {
            w.write(XmlEvent::start_element("D:lockdiscovery"))?;
            for (rec, href) in locks {
                xmlcodec::write_activelock(w, rec, href)?;
            }
            w.write(XmlEvent::end_element())
        }
        // no default namespace is in scope here; the writer declares
        // one exactly where the fragment needs it.
        PropValue::Dead(elem) => xmlcodec::write_element(w, elem, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_incrementally() {
        let mut mw = MultistatusWriter::new().unwrap();
        mw.write_response(
            "/a",
            &[Propstat {
                status: StatusCode::OK,
                props: vec![PropValue::Text(
                    PropName::new(NS_DAV, "getetag"),
                    "\"e1\"".to_string(),
                )],
            }],
        )
        .unwrap();
        let first = mw.take();
        assert!(!first.is_empty());

        mw.write_response(
            "/b",
            &[Propstat {
                status: StatusCode::NOT_FOUND,
                props: vec![PropValue::Empty(PropName::new("urn:x", "missing"))],
            }],
        )
        .unwrap();
        let second = mw.take();
        let rest = mw.finish().unwrap();

        let doc = [first, second, rest].concat();
        let s = String::from_utf8(doc).unwrap();
        assert!(s.starts_with("<?xml"));
        assert!(s.contains(r#"<D:multistatus xmlns:D="DAV:">"#));
        assert!(s.contains("<D:href>/a</D:href>"));
        assert!(s.contains("HTTP/1.1 200 OK"));
        assert!(s.contains("HTTP/1.1 404 Not Found"));
        assert!(s.contains(r#"<missing xmlns="urn:x" />"#) || s.contains(r#"<missing xmlns="urn:x"/>"#));
        assert!(s.ends_with("</D:multistatus>"));
        // well formed from start to finish.
        xmltree::Element::parse(s.as_bytes()).unwrap();
    }

    #[test]
    fn dead_property_written_verbatim() {
        let elem = xmltree::Element::parse(
            r#"<x:prop xmlns:x="urn:ns"><x:child>text</x:child></x:prop>"#.as_bytes(),
        )
        .unwrap();
        let mut mw = MultistatusWriter::new().unwrap();
        mw.write_response(
            "/f",
            &[Propstat {
                status: StatusCode::OK,
                props: vec![PropValue::Dead(elem)],
            }],
        )
        .unwrap();
        let body = [mw.take(), mw.finish().unwrap()].concat();
        let s = String::from_utf8(body).unwrap();
        assert!(s.contains(r#"xmlns="urn:ns""#));
        assert!(s.contains("text"));
        let reparsed = xmltree::Element::parse(s.as_bytes()).unwrap();
        assert!(reparsed.name == "multistatus");
    }
}
