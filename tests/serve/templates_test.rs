//! Template delivery: buffered, streaming, initializers and response shaping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use stencil::{ConfigOption, MemorySource};

use crate::common::{body_chunks, body_string, build, counter_library, get, send};

#[tokio::test]
async fn test_index_stream_and_initializer() {
    let counter = Arc::new(AtomicI64::new(0));
    let source = MemorySource::new()
        .with_file("index.tmpl", "hello")
        .with_file(
            "stream.tmpl",
            "{# @stream #}a{{ Flush | flush }}b{{ Flush | flush }}",
        )
        .with_file("INIT counter.tmpl", "{{ set_counter(value=7) }}");

    let build = build(
        source,
        vec![
            ConfigOption::template_extension(".tmpl"),
            ConfigOption::functions(counter_library(counter.clone())),
        ],
    );

    // The initializer ran during the build, before any request.
    assert_eq!(counter.load(Ordering::SeqCst), 7);
    assert_eq!(build.stats.template_initializers, 1);
    assert_eq!(build.stats.routes, 2);

    let response = send(&build, get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(body_string(response).await, "hello");

    let response = send(&build, get("/stream")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_chunks(response).await, vec!["a", "b"]);
    assert_eq!(build.instance.active_surfaces(), 0);
}

#[tokio::test]
async fn test_status_and_headers_shape_response() {
    let template = concat!(
        "{{ Resp | status(code=201) }}",
        r#"{{ Resp | set_header(name="content-type", value="application/json") }}"#,
        r#"{{ Resp | add_header(name="x-tag", value="a") }}"#,
        r#"{{ Resp | add_header(name="x-tag", value="b") }}"#,
        r#"{"ok":true}"#,
    );
    let source = MemorySource::new().with_file("created.html", template);
    let build = build(source, Vec::new());

    let response = send(&build, get("/created")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(response.headers().get_all("x-tag").iter().count(), 2);
    assert_eq!(body_string(response).await, r#"{"ok":true}"#);
}

#[tokio::test]
async fn test_return_status_discards_output() {
    let source = MemorySource::new().with_file(
        "gone.html",
        "partial output{{ Resp | return_status(code=410) }}never",
    );
    let build = build(source, Vec::new());

    let response = send(&build, get("/gone")).await;
    assert_eq!(response.status(), StatusCode::GONE);
    assert!(!body_string(response).await.contains("partial output"));
}

#[tokio::test]
async fn test_execution_error_is_internal_error() {
    let source = MemorySource::new().with_file("broken.html", "{{ missing.value }}");
    let build = build(source, Vec::new());

    let response = send(&build, get("/broken")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(build.instance.active_surfaces(), 0);
}

#[tokio::test]
async fn test_request_and_instance_fields() {
    let template = concat!(
        "{{ Req.method }} {{ Req.path }} {{ Req.params.q }} ",
        "{{ Req.headers['x-forwarded-for'] }} {{ Instance.vars.site }}",
    );
    let source = MemorySource::new().with_file("req.tmpl", template);
    let build = build(
        source,
        vec![
            ConfigOption::template_extension(".tmpl"),
            ConfigOption::var("site", serde_json::json!("Example")),
        ],
    );

    let request = Request::get("/req?q=rust%20lang")
        .header("x-forwarded-for", "10.0.0.1")
        .body(Body::empty())
        .unwrap();
    let response = send(&build, request).await;
    assert_eq!(
        body_string(response).await,
        "GET /req rust lang 10.0.0.1 Example"
    );
}

#[tokio::test]
async fn test_partials_and_inheritance() {
    let source = MemorySource::new()
        .with_file(
            "_layout.html",
            "<main>{% block body %}{% endblock body %}</main>",
        )
        .with_file(
            "page.html",
            concat!(
                r#"{% extends "_layout.html" %}"#,
                r#"{% block body %}{{ "BlogPost" | kebab_case }}{% endblock body %}"#,
            ),
        );
    let build = build(source, Vec::new());
    assert_eq!(build.stats.template_files, 2);
    assert_eq!(build.stats.template_definitions, 2);

    let response = send(&build, get("/page")).await;
    assert_eq!(body_string(response).await, "<main>blog-post</main>");

    let response = send(&build, get("/_layout")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_minify_applies_to_buffered_only() {
    let page = "<ul>\n    <li>a</li>\n\n    <li>b</li>\n</ul>\n";
    let source = MemorySource::new()
        .with_file("index.html", page)
        .with_file("live.html", "{# @stream #}\n<ul>\n    <li>a</li>\n</ul>\n");
    let build = build(source, vec![ConfigOption::minify(true)]);

    let response = send(&build, get("/")).await;
    assert_eq!(response.headers()[CONTENT_LENGTH], "32");
    assert_eq!(
        body_string(response).await,
        "<ul>\n<li>a</li>\n<li>b</li>\n</ul>"
    );

    let response = send(&build, get("/live")).await;
    assert_eq!(
        body_string(response).await,
        "\n<ul>\n    <li>a</li>\n</ul>\n"
    );
}

#[tokio::test]
async fn test_head_has_length_but_no_body() {
    let source = MemorySource::new().with_file("index.html", "hello");
    let build = build(source, Vec::new());

    let request = Request::head("/").body(Body::empty()).unwrap();
    let response = send(&build, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_LENGTH], "5");
    assert_eq!(body_string(response).await, "");
}
