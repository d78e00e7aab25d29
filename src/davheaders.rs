//! Typed versions of the webdav request headers.
//!
//! Everything here implements `headers::Header`, so the handlers read
//! them with `typed_try_get` and turn a parse failure into a 400.

use std::time::Duration;

use headers::{self, Header, HeaderName, HeaderValue};

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
}

fn one_value<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    values
        .next()
        .and_then(|v| v.to_str().ok())
        .ok_or_else(headers::Error::invalid)
}

/// The `Depth:` header. Values other than `0`, `1` and `infinity` fail to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one_value(values)?.trim() {
            "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            "infinity" => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(s)));
    }
}

/// The `Timeout:` header. A zero duration means "no timeout".
///
/// The value is a comma separated list of `Second-N` and `Infinite`
/// alternatives; the first one we recognize wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DavTimeout(pub Duration);

impl Header for DavTimeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        for alt in one_value(values)?.split(',') {
            let alt = alt.trim();
            if alt == "Infinite" {
                return Ok(DavTimeout(Duration::ZERO));
            }
            if let Some(secs) = alt.strip_prefix("Second-") {
                if let Ok(n) = secs.parse::<u64>() {
                    return Ok(DavTimeout(Duration::from_secs(n)));
                }
            }
        }
        Err(headers::Error::invalid())
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = if self.0 == Duration::ZERO {
            "Infinite".to_string()
        } else {
            format!("Second-{}", self.0.as_secs())
        };
        values.extend(std::iter::once(HeaderValue::from_str(&s).unwrap()));
    }
}

/// The `Overwrite:` header, `T` or `F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one_value(values)?.trim() {
            "T" => Ok(Overwrite(true)),
            "F" => Ok(Overwrite(false)),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(s)));
    }
}

/// The `Destination:` header, kept as the raw URI reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let v = one_value(values)?.trim();
        if v.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(Destination(v.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(v) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(v));
        }
    }
}

/// The `Lock-Token:` header, a Coded-URL. Parsing strips the angle brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let v = one_value(values)?.trim();
        match v.strip_prefix('<').and_then(|v| v.strip_suffix('>')) {
            Some(token) if !token.is_empty() => Ok(LockToken(token.to_string())),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(v) = HeaderValue::from_str(&format!("<{}>", self.0)) {
            values.extend(std::iter::once(v));
        }
    }
}

/// An entity tag. We only ever generate strong tags; weak tags can be
/// parsed but never compare equal under the strong comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ETag {
    pub weak: bool,
    pub tag: String,
}

impl ETag {
    pub fn strong(tag: impl Into<String>) -> ETag {
        ETag {
            weak: false,
            tag: tag.into(),
        }
    }

    pub fn parse(s: &str) -> Option<ETag> {
        let (weak, rest) = match s.strip_prefix("W/") {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let tag = rest.strip_prefix('"')?.strip_suffix('"')?;
        if tag.contains('"') {
            return None;
        }
        Some(ETag {
            weak,
            tag: tag.to_string(),
        })
    }

    /// RFC7232 strong comparison.
    pub fn strong_eq(&self, other: &ETag) -> bool {
        !self.weak && !other.weak && self.tag == other.tag
    }
}

impl std::fmt::Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.weak {
            write!(f, "W/\"{}\"", self.tag)
        } else {
            write!(f, "\"{}\"", self.tag)
        }
    }
}

/// Value of an `If-Match` or `If-None-Match` header: `*` or a list of tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ETagList {
    Star,
    Tags(Vec<ETag>),
}

impl ETagList {
    fn parse(s: &str) -> Option<ETagList> {
        let s = s.trim();
        if s == "*" {
            return Some(ETagList::Star);
        }
        let mut tags = Vec::new();
        for part in s.split(',') {
            tags.push(ETag::parse(part.trim())?);
        }
        if tags.is_empty() {
            return None;
        }
        Some(ETagList::Tags(tags))
    }

    /// Does any member of the list strong-match the resource's current tag.
    /// `current` is `None` when the resource does not exist.
    pub fn matches(&self, current: Option<&str>) -> bool {
        match self {
            ETagList::Star => current.is_some(),
            ETagList::Tags(tags) => match current {
                None => false,
                Some(cur) => {
                    let cur = ETag::strong(cur);
                    tags.iter().any(|t| t.strong_eq(&cur))
                }
            },
        }
    }
}

macro_rules! etag_list_header {
    ($name:ident, $header:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(pub ETagList);

        impl Header for $name {
            fn name() -> &'static HeaderName {
                &$header
            }

            fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
            where
                I: Iterator<Item = &'i HeaderValue>,
            {
                ETagList::parse(one_value(values)?)
                    .map($name)
                    .ok_or_else(headers::Error::invalid)
            }

            fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
                let s = match &self.0 {
                    ETagList::Star => "*".to_string(),
                    ETagList::Tags(tags) => tags
                        .iter()
                        .map(|t| t.to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                };
                if let Ok(v) = HeaderValue::from_str(&s) {
                    values.extend(std::iter::once(v));
                }
            }
        }
    };
}

etag_list_header!(IfMatch, http::header::IF_MATCH);
etag_list_header!(IfNoneMatch, http::header::IF_NONE_MATCH);

/// A parsed `If:` header: OR over lists, AND within a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfHeader {
    pub lists: Vec<IfList>,
}

/// One parenthesized list, optionally tagged with a resource URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfList {
    pub resource_tag: Option<String>,
    pub conditions: Vec<IfCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfItem {
    Token(String),
    ETag(ETag),
}

impl Header for IfHeader {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        parse_if_header(one_value(values)?).ok_or_else(headers::Error::invalid)
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let mut s = String::new();
        for list in &self.lists {
            if !s.is_empty() {
                s.push(' ');
            }
            if let Some(tag) = &list.resource_tag {
                s.push_str(&format!("<{tag}> "));
            }
            s.push('(');
            let conds: Vec<String> = list
                .conditions
                .iter()
                .map(|c| {
                    let item = match &c.item {
                        IfItem::Token(t) => format!("<{t}>"),
                        IfItem::ETag(e) => format!("[{e}]"),
                    };
                    if c.not {
                        format!("Not {item}")
                    } else {
                        item
                    }
                })
                .collect();
            s.push_str(&conds.join(" "));
            s.push(')');
        }
        if let Ok(v) = HeaderValue::from_str(&s) {
            values.extend(std::iter::once(v));
        }
    }
}

// Grammar (RFC4918 section 10.4):
//   If = ( "<" resource ">" )? "(" ( ["Not"] ( "<" token ">" | "[" etag "]" ) )+ ")" ...
fn parse_if_header(s: &str) -> Option<IfHeader> {
    let mut rest = s.trim_start();
    let mut lists = Vec::new();

    while !rest.is_empty() {
        let mut resource_tag = None;
        if rest.starts_with('<') {
            let end = rest.find('>')?;
            resource_tag = Some(rest[1..end].to_string());
            rest = rest[end + 1..].trim_start();
        }
        rest = rest.strip_prefix('(')?;

        let mut conditions = Vec::new();
        loop {
            rest = rest.trim_start();
            if let Some(r) = rest.strip_prefix(')') {
                rest = r.trim_start();
                break;
            }
            let mut not = false;
            if rest.len() >= 3 && rest[..3].eq_ignore_ascii_case("not") {
                not = true;
                rest = rest[3..].trim_start();
            }
            let item = if rest.starts_with('<') {
                let end = rest.find('>')?;
                let token = rest[1..end].to_string();
                rest = &rest[end + 1..];
                IfItem::Token(token)
            } else if rest.starts_with('[') {
                let end = rest.find(']')?;
                let etag = ETag::parse(rest[1..end].trim())?;
                rest = &rest[end + 1..];
                IfItem::ETag(etag)
            } else {
                return None;
            };
            conditions.push(IfCondition { not, item });
        }
        if conditions.is_empty() {
            return None;
        }
        lists.push(IfList {
            resource_tag,
            conditions,
        });
    }

    if lists.is_empty() {
        return None;
    }
    Some(IfHeader { lists })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_values() {
        fn parse(s: &str) -> Result<Depth, headers::Error> {
            let v = HeaderValue::from_str(s).unwrap();
            Depth::decode(&mut std::iter::once(&v))
        }
        assert_eq!(parse("0").unwrap(), Depth::Zero);
        assert_eq!(parse("1").unwrap(), Depth::One);
        assert_eq!(parse("infinity").unwrap(), Depth::Infinity);
        assert!(parse("2").is_err());
        assert!(parse("Infinity").is_err());
    }

    #[test]
    fn timeout_values() {
        fn parse(s: &str) -> Result<DavTimeout, headers::Error> {
            let v = HeaderValue::from_str(s).unwrap();
            DavTimeout::decode(&mut std::iter::once(&v))
        }
        assert_eq!(parse("Second-60").unwrap().0, Duration::from_secs(60));
        assert_eq!(parse("Infinite").unwrap().0, Duration::ZERO);
        // first recognized value wins.
        assert_eq!(
            parse("Extended-9, Second-5").unwrap().0,
            Duration::from_secs(5)
        );
        assert!(parse("Second-abc").is_err());
    }

    #[test]
    fn etag_compare() {
        let strong = ETag::parse("\"xyzzy\"").unwrap();
        let weak = ETag::parse("W/\"xyzzy\"").unwrap();
        assert!(strong.strong_eq(&ETag::strong("xyzzy")));
        assert!(!weak.strong_eq(&ETag::strong("xyzzy")));
        assert!(ETag::parse("xyzzy").is_none());
    }

    #[test]
    fn etag_list() {
        let l = ETagList::parse("\"a\", \"b\"").unwrap();
        assert!(l.matches(Some("b")));
        assert!(!l.matches(Some("c")));
        assert!(!l.matches(None));
        assert!(ETagList::parse("*").unwrap().matches(Some("anything")));
        assert!(!ETagList::parse("*").unwrap().matches(None));
    }

    #[test]
    fn if_header_untagged() {
        let ih = parse_if_header("(<opaquelocktoken:abc> [\"et\"])").unwrap();
        assert_eq!(ih.lists.len(), 1);
        let l = &ih.lists[0];
        assert!(l.resource_tag.is_none());
        assert_eq!(l.conditions.len(), 2);
        assert_eq!(
            l.conditions[0].item,
            IfItem::Token("opaquelocktoken:abc".to_string())
        );
        assert_eq!(l.conditions[1].item, IfItem::ETag(ETag::strong("et")));
    }

    #[test]
    fn if_header_tagged_and_not() {
        let ih =
            parse_if_header("<http://host/a> (Not <tok1>) (<tok2>)").unwrap();
        assert_eq!(ih.lists.len(), 2);
        assert_eq!(
            ih.lists[0].resource_tag.as_deref(),
            Some("http://host/a")
        );
        assert!(ih.lists[0].conditions[0].not);
        assert!(ih.lists[1].resource_tag.is_none());
    }

    #[test]
    fn if_header_malformed() {
        assert!(parse_if_header("").is_none());
        assert!(parse_if_header("()").is_none());
        assert!(parse_if_header("(<tok>").is_none());
        assert!(parse_if_header("bare").is_none());
    }

    #[test]
    fn lock_token_coded_url() {
        fn parse(s: &str) -> Result<LockToken, headers::Error> {
            let v = HeaderValue::from_str(s).unwrap();
            LockToken::decode(&mut std::iter::once(&v))
        }
        assert_eq!(
            parse("<opaquelocktoken:xyz>").unwrap().0,
            "opaquelocktoken:xyz"
        );
        assert!(parse("opaquelocktoken:xyz").is_err());
        assert!(parse("<>").is_err());
    }
}
