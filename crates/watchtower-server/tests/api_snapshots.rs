mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::Value;
use tower::ServiceExt;
use watchtower_server::app;

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_check_returns_ok() {
    let (_dir, state) = common::disabled_state();

    let response = app(state).oneshot(request("GET", "/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn recordings_json_lists_newest_first() {
    let (_dir, state) = common::disabled_state();
    let first = state.snapshots.persist(b"one").await.unwrap();
    let second = state.snapshots.persist(b"two").await.unwrap();
    let third = state.snapshots.persist(b"three").await.unwrap();

    let response = app(state)
        .oneshot(request("GET", "/recordings.json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let names: Vec<String> = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(
        names,
        vec![third.file_name, second.file_name, first.file_name]
    );
}

#[tokio::test]
async fn stored_snapshot_is_served() {
    let (_dir, state) = common::disabled_state();
    let snapshot = state.snapshots.persist(b"jpeg-bytes").await.unwrap();

    let response = app(state)
        .oneshot(request("GET", &format!("/recordings/{}", snapshot.file_name)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"jpeg-bytes");
}

#[tokio::test]
async fn delete_image_removes_file() {
    let (_dir, state) = common::disabled_state();
    let snapshot = state.snapshots.persist(b"x").await.unwrap();
    let path = state.snapshots.dir().join(&snapshot.file_name);

    let response = app(state.clone())
        .oneshot(request(
            "DELETE",
            &format!("/delete-image/{}", snapshot.file_name),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], true);
    assert!(!path.exists());
    assert!(state.snapshots.list().await.is_empty());
}

#[tokio::test]
async fn delete_image_rejects_unsafe_names() {
    let (dir, state) = common::disabled_state();
    let outside = dir.path().join("secret.jpg");
    std::fs::write(&outside, b"keep me").unwrap();
    let router = app(state);

    for uri in ["/delete-image/..%2Fsecret.jpg", "/delete-image/x.png"] {
        let response = router.clone().oneshot(request("DELETE", uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert!(body_json(response).await["error"].is_string());
    }

    assert!(outside.exists());
}

#[tokio::test]
async fn delete_missing_image_is_not_found() {
    let (_dir, state) = common::disabled_state();

    let response = app(state)
        .oneshot(request("DELETE", "/delete-image/snapshot-1.jpg"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn clear_all_reports_count() {
    let (_dir, state) = common::disabled_state();
    state.snapshots.persist(b"a").await.unwrap();
    state.snapshots.persist(b"b").await.unwrap();

    let response = app(state.clone())
        .oneshot(request("POST", "/clear-all"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["deleted"], 2);
    assert!(state.snapshots.list().await.is_empty());
}

#[tokio::test]
async fn toggle_boxes_alternates() {
    let (_dir, state) = common::disabled_state();
    let router = app(state);

    let mut seen = Vec::new();
    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(request("GET", "/toggle-boxes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        seen.push(body_json(response).await["showBoxes"].as_bool().unwrap());
    }

    assert_eq!(seen, vec![false, true, false]);
}

#[tokio::test]
async fn public_dir_is_served_as_fallback() {
    let (dir, mut state) = common::disabled_state();
    let public = dir.path().join("public");
    std::fs::create_dir_all(&public).unwrap();
    std::fs::write(public.join("index.html"), "<h1>Watchtower</h1>").unwrap();
    state.public_dir = Some(public);

    let response = app(state).oneshot(request("GET", "/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"<h1>Watchtower</h1>");
}
