//! Decoding of webdav request bodies and the shared XML write helpers.
//!
//! Request bodies are small (the dispatcher caps them) so they are
//! parsed into a tree; responses are written with an event writer so
//! multistatus bodies can stream.

use std::io::Write;
use std::time::Duration;

use xml::writer::{EmitterConfig, EventWriter, XmlEvent};
use xmltree::{Element, XMLNode};

use crate::errors::{DavError, DavResult};
use crate::locks::LockRecord;
use crate::props::PropName;
use crate::util::MemBuffer;

pub(crate) const NS_DAV: &str = "DAV:";

fn is_dav(elem: &Element, name: &str) -> bool {
    elem.name == name && elem.namespace.as_deref() == Some(NS_DAV)
}

fn child_elements(elem: &Element) -> impl Iterator<Item = &Element> {
    elem.children.iter().filter_map(|node| match node {
        XMLNode::Element(e) => Some(e),
        _ => None,
    })
}

/// A parsed `<propfind>` request body.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PropfindRequest {
    AllProp,
    PropName,
    Props(Vec<PropName>),
}

pub(crate) fn parse_propfind(body: &[u8]) -> DavResult<PropfindRequest> {
    if body.is_empty() {
        // an empty body means allprop.
        return Ok(PropfindRequest::AllProp);
    }
    let root = Element::parse(body)?;
    if !is_dav(&root, "propfind") {
        return Err(DavError::XmlReadError);
    }
    for child in child_elements(&root) {
        if is_dav(child, "allprop") {
            return Ok(PropfindRequest::AllProp);
        }
        if is_dav(child, "propname") {
            return Ok(PropfindRequest::PropName);
        }
        if is_dav(child, "prop") {
            let names = child_elements(child).map(PropName::of_element).collect();
            return Ok(PropfindRequest::Props(names));
        }
    }
    Err(DavError::XmlReadError)
}

/// One entry of a `<propertyupdate>` body, in document order.
#[derive(Debug, Clone)]
pub(crate) struct PropUpdate {
    pub set: bool,
    /// The property element, verbatim, children included.
    pub element: Element,
}

pub(crate) fn parse_propertyupdate(body: &[u8]) -> DavResult<Vec<PropUpdate>> {
    let root = Element::parse(body)?;
    if !is_dav(&root, "propertyupdate") {
        return Err(DavError::XmlReadError);
    }
    let mut updates = Vec::new();
    for child in child_elements(&root) {
        let set = if is_dav(child, "set") {
            true
        } else if is_dav(child, "remove") {
            false
        } else {
            continue;
        };
        let prop = child_elements(child)
            .find(|e| is_dav(e, "prop"))
            .ok_or(DavError::XmlReadError)?;
        for elem in child_elements(prop) {
            updates.push(PropUpdate {
                set,
                element: elem.clone(),
            });
        }
    }
    Ok(updates)
}

/// A parsed `<lockinfo>` request body.
#[derive(Debug, Clone)]
pub(crate) struct LockInfoRequest {
    pub shared: bool,
    pub owner: Option<Element>,
}

/// `None` means the body was empty, which is a lock refresh.
pub(crate) fn parse_lockinfo(body: &[u8]) -> DavResult<Option<LockInfoRequest>> {
    if body.is_empty() {
        return Ok(None);
    }
    let root = Element::parse(body)?;
    if !is_dav(&root, "lockinfo") {
        return Err(DavError::XmlReadError);
    }

    let scope = child_elements(&root)
        .find(|e| is_dav(e, "lockscope"))
        .ok_or(DavError::XmlReadError)?;
    let shared = if child_elements(scope).any(|e| is_dav(e, "shared")) {
        true
    } else if child_elements(scope).any(|e| is_dav(e, "exclusive")) {
        false
    } else {
        return Err(DavError::XmlReadError);
    };

    // only write locks exist in RFC4918.
    let locktype = child_elements(&root)
        .find(|e| is_dav(e, "locktype"))
        .ok_or(DavError::XmlReadError)?;
    if !child_elements(locktype).any(|e| is_dav(e, "write")) {
        return Err(DavError::XmlReadError);
    }

    let owner = child_elements(&root)
        .find(|e| is_dav(e, "owner"))
        .cloned();
    Ok(Some(LockInfoRequest { shared, owner }))
}

pub(crate) fn new_writer() -> EventWriter<MemBuffer> {
    EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(false)
        .create_writer(MemBuffer::new())
}

/// Write an empty element for a property name: `D:` names use the
/// document prefix, the empty namespace gets no binding at all, and
/// everything else binds a default namespace in place.
pub(crate) fn write_prop_name<W: Write>(
    w: &mut EventWriter<W>,
    name: &PropName,
) -> Result<(), xml::writer::Error> {
    if name.ns == NS_DAV {
        w.write(XmlEvent::start_element(format!("D:{}", name.local).as_str()))?;
    } else if name.ns.is_empty() {
        w.write(XmlEvent::start_element(name.local.as_str()))?;
    } else {
        w.write(XmlEvent::start_element(name.local.as_str()).default_ns(name.ns.as_str()))?;
    }
    w.write(XmlEvent::end_element())
}

/// Write a stored (foreign) element verbatim, declaring a default
/// namespace only where it changes.
pub(crate) fn write_element<W: Write>(
    w: &mut EventWriter<W>,
    elem: &Element,
    parent_ns: &str,
) -> Result<(), xml::writer::Error> {
    let ns = elem.namespace.as_deref().unwrap_or("");
    let mut start = XmlEvent::start_element(elem.name.as_str());
    if ns != parent_ns {
        start = start.default_ns(ns);
    }
    let mut attrs: Vec<(&String, &String)> = elem.attributes.iter().collect();
    attrs.sort();
    for (k, v) in attrs {
        start = start.attr(k.as_str(), v);
    }
    w.write(start)?;
    write_children(w, elem, ns)?;
    w.write(XmlEvent::end_element())
}

/// Write the children of an element (text and nested elements).
pub(crate) fn write_children<W: Write>(
    w: &mut EventWriter<W>,
    elem: &Element,
    ns: &str,
) -> Result<(), xml::writer::Error> {
    for node in &elem.children {
        match node {
            XMLNode::Element(child) => write_element(w, child, ns)?,
            XMLNode::Text(text) => w.write(XmlEvent::characters(text))?,
            XMLNode::CData(text) => w.write(XmlEvent::cdata(text))?,
            _ => {}
        }
    }
    Ok(())
}

fn timeout_string(timeout: Duration) -> String {
    if timeout == Duration::ZERO {
        "Infinite".to_string()
    } else {
        format!("Second-{}", timeout.as_secs())
    }
}

/// Write one `D:activelock` element for a lock record.
pub(crate) fn write_activelock<W: Write>(
    w: &mut EventWriter<W>,
    rec: &LockRecord,
    href: &str,
) -> Result<(), xml::writer::Error> {
    w.write(XmlEvent::start_element("D:activelock"))?;

    w.write(XmlEvent::start_element("D:locktype"))?;
    w.write(XmlEvent::start_element("D:write"))?;
    w.write(XmlEvent::end_element())?;
    w.write(XmlEvent::end_element())?;

    w.write(XmlEvent::start_element("D:lockscope"))?;
    let scope = if rec.shared { "D:shared" } else { "D:exclusive" };
    w.write(XmlEvent::start_element(scope))?;
    w.write(XmlEvent::end_element())?;
    w.write(XmlEvent::end_element())?;

    w.write(XmlEvent::start_element("D:depth"))?;
    w.write(XmlEvent::characters(if rec.depth_infinity {
        "infinity"
    } else {
        "0"
    }))?;
    w.write(XmlEvent::end_element())?;

    if let Some(owner) = &rec.owner {
        w.write(XmlEvent::start_element("D:owner"))?;
        write_children(w, owner, "")?;
        w.write(XmlEvent::end_element())?;
    }

    w.write(XmlEvent::start_element("D:timeout"))?;
    w.write(XmlEvent::characters(&timeout_string(rec.timeout)))?;
    w.write(XmlEvent::end_element())?;

    w.write(XmlEvent::start_element("D:locktoken"))?;
    w.write(XmlEvent::start_element("D:href"))?;
    w.write(XmlEvent::characters(&rec.token))?;
    w.write(XmlEvent::end_element())?;
    w.write(XmlEvent::end_element())?;

    w.write(XmlEvent::start_element("D:lockroot"))?;
    w.write(XmlEvent::start_element("D:href"))?;
    w.write(XmlEvent::characters(href))?;
    w.write(XmlEvent::end_element())?;
    w.write(XmlEvent::end_element())?;

    w.write(XmlEvent::end_element())
}

/// The complete `<D:prop><D:lockdiscovery>` response body of a LOCK.
pub(crate) fn lock_response_body(rec: &LockRecord, href: &str) -> DavResult<bytes::Bytes> {
    let mut w = new_writer();
    w.write(XmlEvent::start_element("D:prop").ns("D", NS_DAV))?;
    w.write(XmlEvent::start_element("D:lockdiscovery"))?;
    write_activelock(&mut w, rec, href)?;
    w.write(XmlEvent::end_element())?;
    w.write(XmlEvent::end_element())?;
    Ok(w.inner_mut().take())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn propfind_variants() {
        assert_eq!(parse_propfind(b"").unwrap(), PropfindRequest::AllProp);
        assert_eq!(
            parse_propfind(
                br#"<?xml version="1.0"?><D:propfind xmlns:D="DAV:"><D:allprop/></D:propfind>"#
            )
            .unwrap(),
            PropfindRequest::AllProp
        );
        assert_eq!(
            parse_propfind(
                br#"<?xml version="1.0"?><D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#
            )
            .unwrap(),
            PropfindRequest::PropName
        );
        let req = parse_propfind(
            br#"<?xml version="1.0"?>
            <D:propfind xmlns:D="DAV:">
              <D:prop><D:getetag/><bar xmlns="urn:foo"/><nons/></D:prop>
            </D:propfind>"#,
        )
        .unwrap();
        assert_eq!(
            req,
            PropfindRequest::Props(vec![
                PropName::new(NS_DAV, "getetag"),
                PropName::new("urn:foo", "bar"),
                PropName::new("", "nons"),
            ])
        );
    }

    #[test]
    fn propfind_malformed() {
        assert!(parse_propfind(b"not xml").is_err());
        assert!(parse_propfind(br#"<propfind><allprop/></propfind>"#).is_err());
        assert!(
            parse_propfind(br#"<D:propfind xmlns:D="DAV:"><D:other/></D:propfind>"#).is_err()
        );
    }

    #[test]
    fn propertyupdate_order() {
        let updates = parse_propertyupdate(
            br#"<?xml version="1.0"?>
            <D:propertyupdate xmlns:D="DAV:" xmlns:z="urn:z">
              <D:set><D:prop><z:a>1</z:a></D:prop></D:set>
              <D:remove><D:prop><z:b/></D:prop></D:remove>
              <D:set><D:prop><z:c>3</z:c></D:prop></D:set>
            </D:propertyupdate>"#,
        )
        .unwrap();
        assert_eq!(updates.len(), 3);
        assert!(updates[0].set);
        assert!(!updates[1].set);
        assert!(updates[2].set);
        assert_eq!(updates[0].element.name, "a");
        assert_eq!(updates[1].element.name, "b");
        assert_eq!(
            updates[2].element.get_text().as_deref(),
            Some("3")
        );
    }

    #[test]
    fn lockinfo_parse() {
        assert!(parse_lockinfo(b"").unwrap().is_none());

        let li = parse_lockinfo(
            br#"<?xml version="1.0"?>
            <D:lockinfo xmlns:D="DAV:">
              <D:lockscope><D:exclusive/></D:lockscope>
              <D:locktype><D:write/></D:locktype>
              <D:owner><D:href>joe</D:href></D:owner>
            </D:lockinfo>"#,
        )
        .unwrap()
        .unwrap();
        assert!(!li.shared);
        assert!(li.owner.is_some());

        let li = parse_lockinfo(
            br#"<D:lockinfo xmlns:D="DAV:">
              <D:lockscope><D:shared/></D:lockscope>
              <D:locktype><D:write/></D:locktype>
            </D:lockinfo>"#,
        )
        .unwrap()
        .unwrap();
        assert!(li.shared);
        assert!(li.owner.is_none());

        // a read locktype does not exist.
        assert!(parse_lockinfo(
            br#"<D:lockinfo xmlns:D="DAV:">
              <D:lockscope><D:exclusive/></D:lockscope>
              <D:locktype><D:read/></D:locktype>
            </D:lockinfo>"#,
        )
        .is_err());
    }

    #[test]
    fn lock_body_contains_token() {
        let rec = LockRecord {
            token: "opaquelocktoken:abc".to_string(),
            root: "/l".to_string(),
            owner: None,
            depth_infinity: false,
            shared: false,
            created: SystemTime::now(),
            timeout: Duration::from_secs(60),
        };
        let body = lock_response_body(&rec, "/l").unwrap();
        let s = String::from_utf8(body.to_vec()).unwrap();
        assert!(s.contains("opaquelocktoken:abc"));
        assert!(s.contains("D:lockdiscovery"));
        assert!(s.contains("D:exclusive"));
        assert!(s.contains("Second-60"));
    }
}
