use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use folio_core::SyncEngine;
use folio_core::manifest::hash_bytes;
use folio_sync_server::{AppState, auth::AuthExtractor, build_router};
use serde_json::{Value, json};
use tower::util::ServiceExt;

const TOKEN: &str = "test-token";

fn setup() -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let engine = SyncEngine::open(dir.path()).expect("open engine");
    let state = AppState {
        engine: Arc::new(engine),
    };
    (build_router(state, AuthExtractor::new(TOKEN)), dir)
}

fn authed(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    authed(method, uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_body(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

async fn read_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&read_body(response).await).expect("json body")
}

async fn commit(app: &Router, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/sync/commit", body))
        .await
        .unwrap();
    let status = response.status();
    (status, read_json(response).await)
}

fn upload(path: &str, content: &[u8]) -> Value {
    json!({ "path": path, "content": STANDARD.encode(content) })
}

#[tokio::test]
async fn health_is_public() {
    let (app, _dir) = setup();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body(response).await, b"OK");
}

#[tokio::test]
async fn api_requires_bearer_token() {
    let (app, _dir) = setup();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/history").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/history")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn commit_then_status_then_download() {
    let (app, _dir) = setup();
    let image = [0x89u8, b'P', b'N', b'G', 0, 1, 2, 255];

    let (status, outcome) = commit(
        &app,
        json!({
            "uploaded_files": [upload("posts/hello.md", b"Hello\n"), upload("img/a.png", &image)],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{outcome}");
    let snapshot_id = outcome["new_snapshot_id"].as_str().unwrap().to_string();
    assert_eq!(outcome["to_download"], json!(["posts/hello.md"]));
    assert_eq!(outcome["conflicts"], json!([]));
    assert_eq!(outcome["to_delete_local"], json!([]));

    // Binary files come back byte for byte.
    let response = app
        .clone()
        .oneshot(authed("GET", "/api/sync/files/img/a.png").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body(response).await, image);

    // The normalized post is what the client now holds.
    let response = app
        .clone()
        .oneshot(authed("GET", "/api/sync/files/posts/hello.md").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let post = read_body(response).await;
    assert!(post.starts_with(b"---\n"));

    let manifest = json!({
        "snapshot_id": snapshot_id,
        "entries": [
            {
                "path": "posts/hello.md",
                "content_hash": hash_bytes(&post),
                "size": post.len(),
                "modified_time": "2024-05-01T10:00:00Z",
            },
            {
                "path": "img/a.png",
                "content_hash": hash_bytes(&image),
                "size": image.len(),
                "modified_time": "2024-05-01T10:00:00Z",
            },
        ],
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/sync/status", json!({ "manifest": manifest })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let plan = read_json(response).await;
    for bucket in ["to_upload", "to_download", "conflicts", "to_delete_local", "to_delete_remote"] {
        assert_eq!(plan[bucket], json!([]), "{bucket}");
    }
    assert_eq!(plan["snapshot_id"], snapshot_id);
}

#[tokio::test]
async fn status_reports_new_server_files() {
    let (app, _dir) = setup();
    let response = app
        .clone()
        .oneshot(authed("PUT", "/api/posts/notes.txt").body(Body::from("server")).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/sync/status",
            json!({ "manifest": { "snapshot_id": null, "entries": [] } }),
        ))
        .await
        .unwrap();
    let plan = read_json(response).await;
    assert_eq!(plan["to_download"], json!(["notes.txt"]));
    assert_eq!(plan["to_upload"], json!([]));
}

#[tokio::test]
async fn malformed_manifest_is_bad_request() {
    let (app, _dir) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/sync/status",
            json!({ "manifest": { "entries": [{
                "path": "a.md",
                "content_hash": "not-a-hash",
                "size": 1,
                "modified_time": "2024-05-01T10:00:00Z",
            }] } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], "bad_request");
}

#[tokio::test]
async fn traversal_and_bad_base64_rejected() {
    let (app, dir) = setup();

    let (status, body) = commit(&app, json!({ "uploaded_files": [upload("../x.md", b"x")] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "path_escapes_root");
    assert!(!dir.path().join("x.md").exists());

    let (status, body) = commit(
        &app,
        json!({ "uploaded_files": [{ "path": "a.md", "content": "%%%" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let (app, _dir) = setup();
    let response = app
        .oneshot(authed("GET", "/api/sync/files/nope.md").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(response).await["error"], "not_found");
}

#[tokio::test]
async fn posts_write_delete_and_history() {
    let (app, _dir) = setup();

    let response = app
        .clone()
        .oneshot(
            authed("PUT", "/api/posts/drafts/idea.md")
                .body(Body::from("---\ntitle: Idea\n---\nSketch\n"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let written = read_json(response).await;
    assert_eq!(written["path"], "drafts/idea.md");

    let response = app
        .clone()
        .oneshot(authed("DELETE", "/api/posts/drafts/idea.md").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let deleted = read_json(response).await;
    assert_eq!(deleted["path"], "drafts/idea.md");
    assert_ne!(deleted["snapshot_id"], written["snapshot_id"]);

    let response = app
        .clone()
        .oneshot(authed("DELETE", "/api/posts/drafts/idea.md").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(authed("GET", "/api/history?count=1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let history = read_json(response).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["id"], deleted["snapshot_id"]);

    let response = app
        .oneshot(authed("GET", "/api/history").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(read_json(response).await.as_array().unwrap().len(), 2);
}
