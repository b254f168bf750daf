//! Static assets: encoding negotiation, conditional requests, disk-backed bodies.

use axum::body::Body;
use axum::http::header::{
    ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH, VARY,
};
use axum::http::{Request, StatusCode};
use stencil::{Config, ConfigOption, Encoding, MemorySource, RouteKind};
use tempfile::TempDir;

use crate::common::{body_string, build, get, send};

const STYLE: &str = "body { margin: 0 }";

fn style_site() -> MemorySource {
    MemorySource::new()
        .with_file("style.css", STYLE)
        .with_file("style.css.br", "BR")
}

fn with_accept(path: &str, accept_encoding: &str) -> Request<Body> {
    Request::get(path)
        .header(ACCEPT_ENCODING, accept_encoding)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_brotli_selected_when_accepted() {
    let build = build(style_site(), Vec::new());
    assert_eq!(build.stats.static_files, 1);
    assert_eq!(build.stats.static_alternates, 1);
    let style = build
        .routes
        .iter()
        .find(|r| r.path == "/style.css")
        .unwrap();
    assert_eq!(
        style.kind,
        RouteKind::Static {
            encodings: vec![None, Some(Encoding::Brotli)]
        }
    );

    let response = send(&build, with_accept("/style.css", "gzip, br")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_ENCODING], "br");
    assert_eq!(response.headers()[VARY], "accept-encoding");
    assert_eq!(response.headers()[CONTENT_TYPE], "text/css; charset=utf-8");
    assert_eq!(response.headers()[CONTENT_LENGTH], "2");
    assert_eq!(body_string(response).await, "BR");
}

#[tokio::test]
async fn test_identity_when_not_accepted() {
    let build = build(style_site(), Vec::new());

    for request in [get("/style.css"), with_accept("/style.css", "br;q=0, gzip")] {
        let response = send(&build, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(response.headers()[VARY], "accept-encoding");
        assert_eq!(body_string(response).await, STYLE);
    }
}

#[tokio::test]
async fn test_if_none_match_returns_not_modified() {
    let build = build(style_site(), Vec::new());

    let response = send(&build, get("/style.css")).await;
    let etag = response.headers()[ETAG].clone();

    let request = Request::get("/style.css")
        .header(IF_NONE_MATCH, etag)
        .body(Body::empty())
        .unwrap();
    let response = send(&build, request).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(body_string(response).await, "");

    // The brotli variant has its own tag.
    let request = Request::get("/style.css")
        .header(ACCEPT_ENCODING, "br")
        .header(IF_NONE_MATCH, response_etag(&build).await)
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&build, request).await.status(), StatusCode::OK);
}

async fn response_etag(build: &stencil::InstanceBuild) -> String {
    let response = send(build, get("/style.css")).await;
    response.headers()[ETAG].to_str().unwrap().to_string()
}

#[tokio::test]
async fn test_orphan_encoded_file_served_as_is() {
    let build = build(MemorySource::new().with_file("app.js.gz", "GZ"), Vec::new());

    let response = send(&build, with_accept("/app.js", "gzip")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&build, get("/app.js.gz")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(CONTENT_ENCODING).is_none());
    assert_eq!(body_string(response).await, "GZ");
}

#[tokio::test]
async fn test_minified_static_asset() {
    let source =
        MemorySource::new().with_file("site.css", "/* theme */\nbody {\n  margin: 0;\n}\n");
    let build = build(source, vec![ConfigOption::minify(true)]);

    let response = send(&build, get("/site.css")).await;
    assert_eq!(body_string(response).await, "body {\nmargin: 0;\n}");
}

#[tokio::test]
async fn test_disk_backed_assets() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("img")).unwrap();
    std::fs::write(dir.path().join("img/logo.svg"), "<svg/>").unwrap();
    std::fs::write(dir.path().join("index.html"), "home").unwrap();

    let build = Config::default()
        .build([ConfigOption::templates_dir(dir.path())])
        .unwrap();

    let response = send(&build, get("/img/logo.svg")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "image/svg+xml");
    assert_eq!(body_string(response).await, "<svg/>");

    let request = Request::head("/img/logo.svg").body(Body::empty()).unwrap();
    let response = send(&build, request).await;
    assert_eq!(response.headers()[CONTENT_LENGTH], "6");
    assert_eq!(body_string(response).await, "");

    assert_eq!(body_string(send(&build, get("/")).await).await, "home");
}
