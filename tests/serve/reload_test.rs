//! Hot swap: a reload picks up changed files without dropping the server.

use std::sync::Arc;

use axum::http::StatusCode;
use stencil::{Config, ConfigOption, Server};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::common::{body_string, get};

#[tokio::test]
async fn test_reload_serves_new_content() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("index.html"), "v1").unwrap();

    let server = Arc::new(
        Server::new(
            Config::default(),
            vec![ConfigOption::templates_dir(dir.path())],
        )
        .unwrap(),
    );
    let first = server.instance();
    let response = server.service().oneshot(get("/")).await.unwrap();
    assert_eq!(body_string(response).await, "v1");

    std::fs::write(dir.path().join("index.html"), "v2").unwrap();
    std::fs::write(dir.path().join("about.html"), "about").unwrap();
    let stats = server.reload().unwrap();
    assert_eq!(stats.routes, 2);

    let response = server.service().oneshot(get("/")).await.unwrap();
    assert_eq!(body_string(response).await, "v2");
    let response = server.service().oneshot(get("/about")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The replaced instance refuses new work.
    let response = first.service().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_broken_reload_keeps_serving() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("index.html"), "stable").unwrap();

    let server = Arc::new(
        Server::new(
            Config::default(),
            vec![ConfigOption::templates_dir(dir.path())],
        )
        .unwrap(),
    );

    std::fs::write(dir.path().join("index.html"), "{% if %}").unwrap();
    assert!(server.reload().is_err());

    let response = server.service().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "stable");
}
