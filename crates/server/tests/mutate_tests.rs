//! Mutator integration tests: delete, rename, move, create_dir.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TestServer, api_json, get_blob, send, upload};
use serde_json::json;

#[tokio::test]
async fn recursive_rename_moves_blobs_and_records() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(&server.router, "PUT", "/old/a.txt", &token, b"a", &[]).await;
    upload(&server.router, "PUT", "/old/sub/b.txt", &token, b"b", &[]).await;

    let (status, json) = api_json(
        &server.router,
        "POST",
        "/_/api/v1/fs/old",
        Some(&token),
        Some(json!({"rename_to": "new"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["new_path"], "/new");

    assert!(server.blobs().exists("/new/a.txt").await.unwrap());
    assert!(server.blobs().exists("/new/sub/b.txt").await.unwrap());
    assert!(!server.blobs().exists("/old").await.unwrap());

    let remaining = server.metadata().subtree_paths("/old").await.unwrap();
    assert!(remaining.is_empty());

    let moved = server.metadata().subtree_paths("/new").await.unwrap();
    assert_eq!(moved, vec!["/new/a.txt", "/new/sub/b.txt"]);
}

#[tokio::test]
async fn rename_is_idempotent_roundtrip() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(&server.router, "PUT", "/r/one.bin", &token, b"one", &[]).await;
    upload(&server.router, "PUT", "/r/two.bin", &token, b"two", &[]).await;
    let before = server.metadata().subtree_paths("/r").await.unwrap();
    let sha_before = server
        .metadata()
        .get_resource("/r/one.bin")
        .await
        .unwrap()
        .unwrap()
        .sha256;

    for (from, to) in [("/_/api/v1/fs/r", "s"), ("/_/api/v1/fs/s", "r")] {
        let (status, _) = api_json(
            &server.router,
            "POST",
            from,
            Some(&token),
            Some(json!({"rename_to": to})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let after = server.metadata().subtree_paths("/r").await.unwrap();
    assert_eq!(before, after);

    let sha_after = server
        .metadata()
        .get_resource("/r/one.bin")
        .await
        .unwrap()
        .unwrap()
        .sha256;
    assert_eq!(sha_before, sha_after);
}

#[tokio::test]
async fn rename_rejects_escaping_names() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(&server.router, "PUT", "/esc/f.bin", &token, b"x", &[]).await;

    for bad in ["../up", "a/b", "..", ""] {
        let (status, _) = api_json(
            &server.router,
            "POST",
            "/_/api/v1/fs/esc/f.bin",
            Some(&token),
            Some(json!({"rename_to": bad})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "rename_to {bad:?}");
    }
}

#[tokio::test]
async fn rename_does_not_touch_sibling_prefixes() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(&server.router, "PUT", "/images/a.png", &token, b"a", &[]).await;
    upload(&server.router, "PUT", "/images-backup/b.png", &token, b"b", &[]).await;

    api_json(
        &server.router,
        "POST",
        "/_/api/v1/fs/images",
        Some(&token),
        Some(json!({"rename_to": "pics"})),
    )
    .await;

    assert!(
        server
            .metadata()
            .get_resource("/images-backup/b.png")
            .await
            .unwrap()
            .is_some()
    );
    assert!(server.blobs().exists("/images-backup/b.png").await.unwrap());
}

#[tokio::test]
async fn move_relocates_file_with_metadata() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(
        &server.router,
        "PUT",
        "/old-folder/file.txt",
        &token,
        b"content",
        &[],
    )
    .await;
    let sha = server
        .metadata()
        .get_resource("/old-folder/file.txt")
        .await
        .unwrap()
        .unwrap()
        .sha256;

    let (status, _) = api_json(
        &server.router,
        "POST",
        "/_/api/v1/fs/old-folder/file.txt",
        Some(&token),
        Some(json!({"move_to": "/new-folder/moved.txt"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert!(server.blobs().exists("/new-folder/moved.txt").await.unwrap());
    assert!(!server.blobs().exists("/old-folder/file.txt").await.unwrap());

    let moved = server
        .metadata()
        .get_resource("/new-folder/moved.txt")
        .await
        .unwrap()
        .expect("metadata follows the file");
    assert_eq!(moved.sha256, sha);
}

#[tokio::test]
async fn circular_move_rejected() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    server.blobs().create_dir_all("/parent/child").await.unwrap();

    let (status, json) = api_json(
        &server.router,
        "POST",
        "/_/api/v1/fs/parent",
        Some(&token),
        Some(json!({"move_to": "/parent/child/oops"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("subdirectory"));
}

#[tokio::test]
async fn move_outside_scope_rejected() {
    let server = TestServer::new().await;
    let admin = server.admin_token().await;
    let ci = server.create_token("ci-builder", false, &["/ci"]).await;

    upload(&server.router, "PUT", "/ci/data.zip", &admin, b"...", &[]).await;

    let (status, _) = api_json(
        &server.router,
        "POST",
        "/_/api/v1/fs/ci/data.zip",
        Some(&ci),
        Some(json!({"move_to": "/prod/data.zip"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(
        server.blobs().exists("/ci/data.zip").await.unwrap(),
        "file must not have moved"
    );
}

#[tokio::test]
async fn delete_removes_subtree_completely() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(&server.router, "PUT", "/d/one.bin", &token, b"1", &[]).await;
    upload(&server.router, "PUT", "/d/sub/two.bin", &token, b"2", &[]).await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/d")
        .header("X-API-Token", &token)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(!server.blobs().exists("/d").await.unwrap());
    assert!(
        server
            .metadata()
            .subtree_paths("/d")
            .await
            .unwrap()
            .is_empty()
    );

    let (status, _, _) = get_blob(&server.router, "/d/one.bin").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_missing_path_is_not_found() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/nothing-here")
        .header("X-API-Token", &token)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_is_audited_with_affected_paths() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(&server.router, "PUT", "/audit-me/a.bin", &token, b"a", &[]).await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/audit-me")
        .header("X-API-Token", &token)
        .body(Body::empty())
        .unwrap();
    send(&server.router, request).await;

    let log = server.audit_log();
    assert!(log.contains("FILE_DELETE"));
    assert!(log.contains("/audit-me/a.bin"));
    assert!(log.contains("deleted_count"));
}

#[tokio::test]
async fn create_dir_makes_an_empty_listing() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let (status, json) = api_json(
        &server.router,
        "POST",
        "/_/api/v1/fs/fresh/dir",
        Some(&token),
        Some(json!({"create_dir": true})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "created");

    let (status, json) = api_json(&server.router, "GET", "/_/api/v1/fs/fresh/dir", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!([]));
}

#[tokio::test]
async fn post_fs_without_action_is_bad_request() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(&server.router, "PUT", "/noop.bin", &token, b"x", &[]).await;

    let (status, json) = api_json(
        &server.router,
        "POST",
        "/_/api/v1/fs/noop.bin",
        Some(&token),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid action");
}
