//
// End-to-end tests: real http::Requests against a handler over the
// in-memory filesystem.
//
use http::{HeaderMap, Method, StatusCode};

use davkit::body::Body;
use davkit::fs::memfs::MemFs;
use davkit::locks::LockManager;
use davkit::DavHandler;

fn handler() -> DavHandler {
    DavHandler::builder()
        .filesystem(MemFs::new())
        .locksystem(LockManager::new())
        .build()
}

async fn request(
    dav: &DavHandler,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> (StatusCode, HeaderMap, String) {
    let mut builder = http::Request::builder()
        .method(Method::from_bytes(method.as_bytes()).unwrap())
        .uri(uri)
        .header("Host", "localhost");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(Body::from(body.to_string())).unwrap();
    let resp = dav.handle(req).await;
    let (parts, body) = resp.into_parts();
    let bytes = hyper::body::to_bytes(body).await.unwrap();
    (
        parts.status,
        parts.headers,
        String::from_utf8_lossy(&bytes).into_owned(),
    )
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).unwrap().to_str().unwrap()
}

fn count_responses(body: &str) -> usize {
    body.matches("<D:response>").count()
}

#[tokio::test]
async fn put_get_and_if_match() {
    let dav = handler();

    let (status, headers, _) = request(&dav, "PUT", "/a.txt", &[], "hello").await;
    assert_eq!(status, StatusCode::CREATED);
    let etag = header(&headers, "etag").to_string();

    let (status, headers, body) = request(&dav, "GET", "/a.txt", &[], "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello");
    assert_eq!(header(&headers, "etag"), etag);
    assert_eq!(header(&headers, "content-length"), "5");

    // a stale If-Match leaves the resource untouched.
    let (status, _, _) = request(
        &dav,
        "PUT",
        "/a.txt",
        &[("If-Match", "\"wrong\"")],
        "x",
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    let (_, _, body) = request(&dav, "GET", "/a.txt", &[], "").await;
    assert_eq!(body, "hello");

    // the right If-Match goes through.
    let (status, _, _) = request(
        &dav,
        "PUT",
        "/a.txt",
        &[("If-Match", etag.as_str())],
        "new",
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn mkcol_and_propfind_depth_one() {
    let dav = handler();

    let (status, _, _) = request(&dav, "MKCOL", "/d", &[], "").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _, _) = request(&dav, "PUT", "/d/f", &[], "1").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, headers, body) =
        request(&dav, "PROPFIND", "/d", &[("Depth", "1")], "").await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(header(&headers, "content-type").starts_with("application/xml"));
    assert_eq!(count_responses(&body), 2);
    assert!(body.contains("<D:href>/d/</D:href>"));
    assert!(body.contains("<D:href>/d/f</D:href>"));
    assert!(body.contains("<D:collection"));
}

#[tokio::test]
async fn lock_protects_writes() {
    let dav = handler();

    let lockinfo = r#"<?xml version="1.0"?>
        <D:lockinfo xmlns:D="DAV:">
          <D:lockscope><D:exclusive/></D:lockscope>
          <D:locktype><D:write/></D:locktype>
          <D:owner><o/></D:owner>
        </D:lockinfo>"#;
    let (status, headers, body) = request(
        &dav,
        "LOCK",
        "/l",
        &[("Depth", "0"), ("Timeout", "Second-60")],
        lockinfo,
    )
    .await;
    // the resource did not exist, so LOCK created it.
    assert_eq!(status, StatusCode::CREATED);
    let token = header(&headers, "lock-token").to_string();
    assert!(token.starts_with("<opaquelocktoken:"));
    assert!(body.contains("D:lockdiscovery"));
    assert!(body.contains("<o"));

    // no If header: refused.
    let (status, _, _) = request(&dav, "PUT", "/l", &[], "x").await;
    assert_eq!(status, StatusCode::LOCKED);

    // the token makes it go through.
    let ifhdr = format!("({token})");
    let (status, _, _) = request(&dav, "PUT", "/l", &[("If", ifhdr.as_str())], "x").await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = request(&dav, "UNLOCK", "/l", &[("Lock-Token", token.as_str())], "").await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // the lock is gone.
    let (status, _, _) = request(&dav, "PUT", "/l", &[], "y").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn copy_and_overwrite() {
    let dav = handler();

    let (status, _, _) = request(&dav, "PUT", "/src", &[], "s").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, _) = request(&dav, "COPY", "/src", &[("Destination", "/dst")], "").await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, _, body) = request(&dav, "GET", "/dst", &[], "").await;
    assert_eq!(body, "s");

    let (status, _, _) = request(
        &dav,
        "COPY",
        "/src",
        &[("Destination", "/dst"), ("Overwrite", "F")],
        "",
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);

    // copying onto yourself is forbidden.
    let (status, _, _) = request(&dav, "COPY", "/src", &[("Destination", "/src")], "").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn proppatch_and_propfind_roundtrip() {
    let dav = handler();
    request(&dav, "PUT", "/a.txt", &[], "data").await;

    let update = r#"<?xml version="1.0"?>
        <D:propertyupdate xmlns:D="DAV:">
          <D:set><D:prop><z:bar xmlns:z="urn:foo">v</z:bar></D:prop></D:set>
        </D:propertyupdate>"#;
    let (status, _, body) = request(&dav, "PROPPATCH", "/a.txt", &[], update).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(body.contains("HTTP/1.1 200 OK"));

    let find = r#"<?xml version="1.0"?>
        <D:propfind xmlns:D="DAV:">
          <D:prop><z:bar xmlns:z="urn:foo"/></D:prop>
        </D:propfind>"#;
    let (status, _, body) = request(&dav, "PROPFIND", "/a.txt", &[("Depth", "0")], find).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(body.contains("HTTP/1.1 200 OK"));
    // stored verbatim, namespace included.
    assert!(body.contains(r#"xmlns="urn:foo""#));
    assert!(body.contains(">v</"));

    // trying to overwrite a live property is refused per-property.
    let bad = r#"<?xml version="1.0"?>
        <D:propertyupdate xmlns:D="DAV:">
          <D:set><D:prop><D:getetag>nope</D:getetag></D:prop></D:set>
        </D:propertyupdate>"#;
    let (status, _, body) = request(&dav, "PROPPATCH", "/a.txt", &[], bad).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(body.contains("HTTP/1.1 403 Forbidden"));

    let (status, _, _) = request(&dav, "DELETE", "/a.txt", &[], "").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = request(&dav, "PROPFIND", "/a.txt", &[("Depth", "0")], "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn move_collection_with_properties() {
    let dav = handler();
    request(&dav, "MKCOL", "/d", &[], "").await;
    request(&dav, "PUT", "/d/f", &[], "contents").await;

    let update = r#"<D:propertyupdate xmlns:D="DAV:">
          <D:set><D:prop><z:tag xmlns:z="urn:z">kept</z:tag></D:prop></D:set>
        </D:propertyupdate>"#;
    request(&dav, "PROPPATCH", "/d/f", &[], update).await;

    let (status, _, _) = request(
        &dav,
        "MOVE",
        "/d",
        &[
            ("Destination", "/e"),
            ("Depth", "infinity"),
            ("Overwrite", "T"),
        ],
        "",
    )
    .await;
    assert!(status == StatusCode::CREATED || status == StatusCode::NO_CONTENT);

    // the source is gone, tree and properties moved.
    let (status, _, _) = request(&dav, "PROPFIND", "/d", &[("Depth", "0")], "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, _, body) = request(&dav, "GET", "/e/f", &[], "").await;
    assert_eq!(body, "contents");

    let find = r#"<D:propfind xmlns:D="DAV:">
          <D:prop><z:tag xmlns:z="urn:z"/></D:prop>
        </D:propfind>"#;
    let (_, _, body) = request(&dav, "PROPFIND", "/e/f", &[("Depth", "0")], find).await;
    assert!(body.contains(">kept</"));
}

#[tokio::test]
async fn boundary_cases() {
    let dav = handler();

    // depth-infinity propfind on an empty collection: one response.
    request(&dav, "MKCOL", "/empty", &[], "").await;
    let (status, _, body) =
        request(&dav, "PROPFIND", "/empty", &[("Depth", "infinity")], "").await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(count_responses(&body), 1);

    // collections have no body to GET.
    let (status, _, _) = request(&dav, "GET", "/empty", &[], "").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    // PUT below a missing collection.
    let (status, _, _) = request(&dav, "PUT", "/no/file", &[], "x").await;
    assert_eq!(status, StatusCode::CONFLICT);

    // MKCOL on an existing collection.
    let (status, _, _) = request(&dav, "MKCOL", "/empty", &[], "").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    // refreshing an unknown lock token.
    let (status, _, _) = request(
        &dav,
        "LOCK",
        "/empty",
        &[("If", "(<opaquelocktoken:unknown>)")],
        "",
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);

    // bad Depth is a parse error.
    let (status, _, _) = request(&dav, "PROPFIND", "/empty", &[("Depth", "2")], "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // UNLOCK without brackets is malformed, unknown tokens conflict.
    let (status, _, _) = request(&dav, "UNLOCK", "/empty", &[("Lock-Token", "bare")], "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = request(
        &dav,
        "UNLOCK",
        "/empty",
        &[("Lock-Token", "<opaquelocktoken:unknown>")],
        "",
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn options_advertises_dav() {
    let dav = handler();

    let (status, headers, _) = request(&dav, "OPTIONS", "/", &[], "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "dav"), "1, 2");
    assert_eq!(header(&headers, "ms-author-via"), "DAV");
    let allow = header(&headers, "allow");
    // the root is a collection: no GET, no PUT.
    assert!(allow.contains("PROPFIND"));
    assert!(!allow.contains("GET"));

    // an unmapped resource can only be created.
    let (_, headers, _) = request(&dav, "OPTIONS", "/nothing", &[], "").await;
    let allow = header(&headers, "allow");
    assert!(allow.contains("PUT"));
    assert!(allow.contains("MKCOL"));
    assert!(!allow.contains("DELETE"));
}

#[tokio::test]
async fn concurrent_locks_one_winner() {
    let dav = handler();
    let lockinfo = r#"<D:lockinfo xmlns:D="DAV:">
          <D:lockscope><D:exclusive/></D:lockscope>
          <D:locktype><D:write/></D:locktype>
        </D:lockinfo>"#;

    let (a, b) = tokio::join!(
        request(&dav, "LOCK", "/race", &[], lockinfo),
        request(&dav, "LOCK", "/race", &[], lockinfo),
    );
    let mut statuses = vec![a.0, b.0];
    statuses.sort();
    assert_eq!(statuses[1], StatusCode::LOCKED);
    assert!(statuses[0] == StatusCode::CREATED || statuses[0] == StatusCode::OK);
}

#[tokio::test]
async fn depth_infinity_walks_subtree() {
    let dav = handler();
    request(&dav, "MKCOL", "/top", &[], "").await;
    request(&dav, "MKCOL", "/top/mid", &[], "").await;
    request(&dav, "PUT", "/top/mid/leaf", &[], "x").await;

    let (_, _, body) = request(&dav, "PROPFIND", "/top", &[("Depth", "infinity")], "").await;
    assert_eq!(count_responses(&body), 3);

    let (_, _, body) = request(&dav, "PROPFIND", "/top", &[("Depth", "1")], "").await;
    assert_eq!(count_responses(&body), 2);

    let (_, _, body) = request(&dav, "PROPFIND", "/top", &[("Depth", "0")], "").await;
    assert_eq!(count_responses(&body), 1);
}
