//! HTTP surface: routing, operations, JSONP and connector jobs

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::{json, Value};
use shard_search::api::{build_router, AppState};
use shard_search::config::Config;
use shard_search::connectors::ConnectorRegistry;
use shard_search::state::ServerState;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

async fn setup(dir: &TempDir) -> (Router, Arc<ServerState>) {
    let mut config = Config::default();
    config.engine.data_path = dir.path().join("data");
    config.engine.settings_path = dir.path().join("settings");
    let server = Arc::new(ServerState::new(config, ConnectorRegistry::with_builtin()));
    server.add_index(contacts_settings(2)).await.unwrap();
    (build_router(AppState::new(server.clone())), server)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn call_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, text) = call(app, method, uri, body).await;
    (status, serde_json::from_str(&text).unwrap())
}

#[tokio::test]
async fn test_health() {
    let dir = TempDir::new().unwrap();
    let (app, server) = setup(&dir).await;

    let (status, body) = call_json(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["indexes"], json!(["contacts"]));

    server.shutdown().await;
}

#[tokio::test]
async fn test_document_commit_and_search() {
    let dir = TempDir::new().unwrap();
    let (app, server) = setup(&dir).await;

    for (id, name, city) in [("c1", "Jane Doe", "Paris"), ("c2", "Jane Roe", "Lyon")] {
        let (status, body) = call_json(
            &app,
            Method::POST,
            "/contacts/document",
            Some(json!({"id": id, "fields": {"name": name, "city": city}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], true);
    }

    let (status, body) = call_json(&app, Method::POST, "/Contacts/commit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["documents"]["total"], 2);

    let (status, body) = call_json(
        &app,
        Method::GET,
        "/contacts/search?Q=jane&count=10&fields=name,city",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    let results = body["results"].as_array().unwrap();
    assert!(results.iter().all(|row| row["type"] == "contacts"));
    assert!(results.iter().any(|row| row["city"] == "Lyon"));

    let (status, body) = call_json(
        &app,
        Method::GET,
        "/contacts/search?q=jane&exclude=C1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["id"], "c2");

    let (status, _) = call_json(&app, Method::DELETE, "/contacts/document?id=c2", None).await;
    assert_eq!(status, StatusCode::OK);
    call_json(&app, Method::POST, "/contacts/commit", None).await;
    let (_, body) = call_json(&app, Method::GET, "/contacts/search?q=jane", None).await;
    assert_eq!(body["count"], 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_profile_search() {
    let dir = TempDir::new().unwrap();
    let (app, server) = setup(&dir).await;

    let engine = server.engine_for_index("contacts").unwrap();
    engine.enqueue(contact("p1", "Jane Doe", "Paris")).await.unwrap();
    engine.enqueue(contact("p2", "Jane Smith", "Paris")).await.unwrap();
    make_visible(&engine).await;

    let (status, body) = call_json(
        &app,
        Method::GET,
        "/contacts/profilesearch?values=name%3AJane%20Doe",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["profile"], "dedup");
    assert_eq!(body["query"], "+name:(\"Jane Doe\")");
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["id"], "p1");

    let (status, body) = call_json(
        &app,
        Method::POST,
        "/contacts/profilesearch?profile=DEDUP",
        Some(json!({"name": "Jane Smith", "city": "Paris"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["id"], "p2");

    let (status, _) = call_json(
        &app,
        Method::GET,
        "/contacts/profilesearch?profile=missing&values=name%3Ax",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.shutdown().await;
}

#[tokio::test]
async fn test_error_statuses() {
    let dir = TempDir::new().unwrap();
    let (app, server) = setup(&dir).await;

    let (status, _) = call_json(&app, Method::GET, "/contacts/document?id=x", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, _) = call_json(&app, Method::GET, "/contacts/explode", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call_json(&app, Method::GET, "/nowhere/search?q=x", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call_json(&app, Method::GET, "/contacts/search", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = call_json(&app, Method::GET, "/contacts/search?q=x&count=many", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call_json(&app, Method::GET, "/contacts/jobstatus?jobid=unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.shutdown().await;
}

#[tokio::test]
async fn test_jsonp_callback() {
    let dir = TempDir::new().unwrap();
    let (app, server) = setup(&dir).await;

    let (status, text) = call(&app, Method::GET, "/contacts/stats?callback=cb", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.starts_with("cb("));
    assert!(text.ends_with(");"));
    let inner: Value = serde_json::from_str(&text[3..text.len() - 2]).unwrap();
    assert_eq!(inner["index"], "contacts");
    assert_eq!(inner["shards"].as_array().unwrap().len(), 2);
    assert_eq!(inner["profiles"], json!(["dedup"]));

    let (status, text) = call(&app, Method::GET, "/contacts/jobstatus?jobid=x&Callback=cb", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(text.starts_with("cb("));

    let (status, _) = call(&app, Method::GET, "/contacts/stats?callback=alert(1)", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    server.shutdown().await;
}

#[tokio::test]
async fn test_bulk_toggle() {
    let dir = TempDir::new().unwrap();
    let (app, server) = setup(&dir).await;

    let (status, body) = call_json(&app, Method::POST, "/contacts/bulk?enable=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bulk"], true);

    let (_, stats) = call_json(&app, Method::GET, "/contacts/stats", None).await;
    assert_eq!(stats["shards"][0]["commit_task"], "stopped");

    let (status, body) = call_json(&app, Method::POST, "/contacts/bulk?enable=false", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bulk"], false);

    let (status, _) = call_json(&app, Method::POST, "/contacts/bulk", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    server.shutdown().await;
}

#[tokio::test]
async fn test_connector_job_runs_to_completion() {
    let dir = TempDir::new().unwrap();
    let (app, server) = setup(&dir).await;

    let source = dir.path().join("contacts.jsonl");
    std::fs::write(
        &source,
        concat!(
            "{\"id\": \"j1\", \"fields\": {\"name\": \"Jane Doe\", \"city\": \"Oslo\"}}\n",
            "{\"id\": \"j2\", \"fields\": {\"name\": \"John Doe\", \"city\": \"Oslo\"}}\n",
        ),
    )
    .unwrap();

    let uri = format!(
        "/contacts/connector?connector=jsonl&type=bulk&jobid=load-1&path={}",
        source.display()
    );
    let (status, body) = call_json(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobid"], "load-1");

    let mut finished = Value::Null;
    for _ in 0..100 {
        let (status, body) =
            call_json(&app, Method::GET, "/contacts/jobstatus?jobid=load-1", None).await;
        assert_eq!(status, StatusCode::OK);
        if body["state"] == "finished_success" || body["state"] == "error" {
            finished = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(finished["state"], "finished_success");
    assert_eq!(finished["processed"], 2);

    let (_, body) = call_json(&app, Method::GET, "/contacts/search?q=doe", None).await;
    assert_eq!(body["count"], 2);

    server.shutdown().await;
}
