//! Request pipeline: request ids, provider lifecycle and cancellation.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode};
use stencil::{ConfigOption, InstanceBuild, MemorySource, RequestId};
use tokio_util::sync::CancellationToken;

use crate::common::{body_chunks, body_string, build, get, send, Journal};

fn id_site() -> MemorySource {
    MemorySource::new().with_file("id.html", "{{ Req.id }}|{{ Audit.request_id }}")
}

/// Build with an `Audit` journal provider, forgetting the build-time acquisition.
fn audited(source: MemorySource) -> (InstanceBuild, Arc<Journal>) {
    let journal = Arc::new(Journal::default());
    let build = build(source, vec![ConfigOption::provider(journal.spec("Audit"))]);
    journal.clear();
    (build, journal)
}

#[tokio::test]
async fn test_request_id_minted_when_absent() {
    let (build, _journal) = audited(id_site());

    let body = body_string(send(&build, get("/id")).await).await;
    let (from_request, from_provider) = body.split_once('|').unwrap();
    assert_eq!(from_request.len(), 36);
    assert!(uuid::Uuid::parse_str(from_request).is_ok());
    assert_eq!(from_request, from_provider);
}

#[tokio::test]
async fn test_request_id_from_upstream_layer() {
    let (build, _journal) = audited(id_site());

    let mut request = get("/id");
    let upstream = HeaderValue::from_static("upstream-1");
    request
        .extensions_mut()
        .insert(tower_http::request_id::RequestId::new(upstream));
    let body = body_string(send(&build, request).await).await;
    assert_eq!(body, "upstream-1|upstream-1");
}

#[tokio::test]
async fn test_own_request_id_takes_precedence() {
    let (build, _journal) = audited(id_site());

    let mut request = get("/id");
    let upstream = HeaderValue::from_static("upstream-1");
    request
        .extensions_mut()
        .insert(tower_http::request_id::RequestId::new(upstream));
    request
        .extensions_mut()
        .insert(RequestId("caller-7".to_string()));
    let body = body_string(send(&build, request).await).await;
    assert_eq!(body, "caller-7|caller-7");
}

#[tokio::test]
async fn test_provider_acquired_and_released_per_request() {
    let (build, journal) = audited(id_site());

    assert_eq!(send(&build, get("/id")).await.status(), StatusCode::OK);
    assert_eq!(send(&build, get("/id")).await.status(), StatusCode::OK);
    assert_eq!(
        journal.entries(),
        vec![
            "produce /id",
            "cleanup ok=true",
            "produce /id",
            "cleanup ok=true"
        ]
    );
    assert_eq!(build.instance.active_surfaces(), 0);
}

#[tokio::test]
async fn test_provider_failure_is_internal_error() {
    let (build, journal) = audited(id_site());
    journal.fail_produce(true);

    let response = send(&build, get("/id")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(journal.entries(), vec!["produce /id"]);
    assert_eq!(build.instance.active_surfaces(), 0);
}

#[tokio::test]
async fn test_execution_error_reaches_cleanup() {
    let (build, journal) =
        audited(MemorySource::new().with_file("broken.html", "{{ missing.value }}"));

    let response = send(&build, get("/broken")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        journal.entries(),
        vec!["produce /broken", "cleanup ok=false"]
    );
}

#[tokio::test]
async fn test_cleanup_failure_keeps_successful_response() {
    let (build, journal) = audited(MemorySource::new().with_file("ok.html", "hello"));
    journal.fail_cleanup(true);

    let response = send(&build, get("/ok")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "hello");
    assert_eq!(journal.entries(), vec!["produce /ok", "cleanup ok=true"]);
    assert_eq!(build.instance.active_surfaces(), 0);
}

#[tokio::test]
async fn test_cleanup_failure_after_execution_error_is_internal_error() {
    let (build, journal) =
        audited(MemorySource::new().with_file("broken.html", "{{ missing.value }}"));
    journal.fail_cleanup(true);

    let response = send(&build, get("/broken")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        journal.entries(),
        vec!["produce /broken", "cleanup ok=false"]
    );
}

#[tokio::test]
async fn test_streaming_provider_failure_before_first_byte() {
    let (build, journal) =
        audited(MemorySource::new().with_file("live.html", "{# @stream #}live"));
    journal.fail_produce(true);

    let response = send(&build, get("/live")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(build.instance.active_surfaces(), 0);
}

#[tokio::test]
async fn test_streaming_releases_providers_after_body() {
    let (build, journal) = audited(
        MemorySource::new().with_file("live.html", "{# @stream #}one{{ Flush | flush }}two"),
    );

    let response = send(&build, get("/live")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_chunks(response).await, vec!["one", "two"]);
    assert_eq!(journal.entries(), vec!["produce /live", "cleanup ok=true"]);
    assert_eq!(build.instance.active_surfaces(), 0);
}

#[tokio::test]
async fn test_cancelled_instance_rejects_without_providers() {
    let journal = Arc::new(Journal::default());
    let token = CancellationToken::new();
    let build = build(
        id_site(),
        vec![
            ConfigOption::provider(journal.spec("Audit")),
            ConfigOption::cancellation(token.clone()),
        ],
    );
    journal.clear();

    token.cancel();
    let response = send(&build, get("/id")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "server stopped");
    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn test_not_found_and_method_not_allowed() {
    let build = build(id_site(), Vec::new());

    let response = send(&build, get("/missing")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let request = Request::post("/id").body(Body::empty()).unwrap();
    let response = send(&build, request).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()["allow"], "GET, HEAD");
}
