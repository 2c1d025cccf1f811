//! Write pipeline integration tests.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TestServer, api_json, get_blob, send, upload};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

#[tokio::test]
async fn put_creates_record_with_checksums() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let body = b"artifact payload";
    let (status, json) = upload(&server.router, "PUT", "/rel/app.bin", &token, body, &[]).await;
    assert_eq!(status, StatusCode::OK);

    let expected_sha256 = hex::encode(Sha256::digest(body));
    assert_eq!(json["checksum_sha256"], expected_sha256.as_str());
    assert_eq!(json["size"], body.len() as i64);

    let record = server
        .metadata()
        .get_resource("/rel/app.bin")
        .await
        .unwrap()
        .expect("record must exist");
    assert_eq!(record.sha256, expected_sha256);
    assert_eq!(record.md5.len(), 32);
    assert_eq!(record.sha1.len(), 40);
}

#[tokio::test]
async fn post_refuses_overwrite() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let (status, _) = upload(&server.router, "POST", "/once.bin", &token, b"v1", &[]).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = upload(&server.router, "POST", "/once.bin", &token, b"v2", &[]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "file exists");

    // PUT overwrites fine.
    let (status, _) = upload(&server.router, "PUT", "/once.bin", &token, b"v2", &[]).await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, bytes) = get_blob(&server.router, "/once.bin").await;
    assert_eq!(bytes, b"v2");
}

#[tokio::test]
async fn unauthenticated_upload_rejected() {
    let server = TestServer::new().await;

    let request = Request::builder()
        .method("PUT")
        .uri("/anon.bin")
        .body(Body::from("data"))
        .unwrap();
    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(!server.blobs().exists("/anon.bin").await.unwrap());
}

#[tokio::test]
async fn integrity_mismatch_leaves_nothing_behind() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let bogus = "ff".repeat(32);
    let (status, json) = upload(
        &server.router,
        "PUT",
        "/i/bad.txt",
        &token,
        b"hello integrity",
        &[("X-Checksum-Sha256", bogus.as_str())],
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Integrity check failed");
    assert!(
        json["details"]
            .as_str()
            .unwrap()
            .contains("SHA256 mismatch")
    );

    assert!(!server.blobs().exists("/i/bad.txt").await.unwrap());
    assert!(
        server
            .metadata()
            .get_resource("/i/bad.txt")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn correct_declared_checksum_is_accepted() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let body = b"verified payload";
    // Uppercase hex must be accepted too.
    let declared = hex::encode(Sha256::digest(body)).to_uppercase();
    let (status, _) = upload(
        &server.router,
        "PUT",
        "/i/good.txt",
        &token,
        body,
        &[("X-Checksum-Sha256", declared.as_str())],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn keep_latest_rotates_previous_groups() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let (status, _) = upload(
        &server.router,
        "PUT",
        "/b1.bin",
        &token,
        b"v1",
        &[("X-Stream", "ci/v1"), ("X-KeepLatest", "true")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = upload(
        &server.router,
        "PUT",
        "/b2.bin",
        &token,
        b"v2",
        &[("X-Stream", "ci/v2"), ("X-KeepLatest", "true")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let old = server
        .metadata()
        .get_resource("/b1.bin")
        .await
        .unwrap()
        .unwrap();
    let new = server
        .metadata()
        .get_resource("/b2.bin")
        .await
        .unwrap()
        .unwrap();

    assert!(old.expires_at.is_some(), "rotated group must expire");
    assert!(old.expires_at.unwrap() <= OffsetDateTime::now_utc());
    assert!(new.expires_at.is_none(), "latest group must not expire");
}

#[tokio::test]
async fn keep_latest_requires_stream() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let (status, json) = upload(
        &server.router,
        "PUT",
        "/solo.bin",
        &token,
        b"x",
        &[("X-KeepLatest", "true")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("X-Stream")
    );
    assert!(!server.blobs().exists("/solo.bin").await.unwrap());
}

#[tokio::test]
async fn malformed_stream_header_rejected() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let (status, _) = upload(
        &server.router,
        "PUT",
        "/s.bin",
        &token,
        b"x",
        &[("X-Stream", "nogroup")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn expiry_and_tags_headers_are_stored() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let (status, _) = upload(
        &server.router,
        "PUT",
        "/tagged.bin",
        &token,
        b"x",
        &[("X-Expires", "7d"), ("X-Tags", "build=42; env=ci, release")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let record = server
        .metadata()
        .get_resource("/tagged.bin")
        .await
        .unwrap()
        .unwrap();
    assert!(record.expires_at.unwrap() > OffsetDateTime::now_utc());

    let tags = server.metadata().tags_for(record.id).await.unwrap();
    let keys: Vec<&str> = tags.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["build", "env", "release"]);
    assert_eq!(tags[0].value, "42");
    assert_eq!(tags[2].value, "");
}

#[tokio::test]
async fn invalid_expires_header_rejected() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let (status, json) = upload(
        &server.router,
        "PUT",
        "/exp.bin",
        &token,
        b"x",
        &[("X-Expires", "whenever")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().starts_with("X-Expires:"));
    assert!(!server.blobs().exists("/exp.bin").await.unwrap());
}

#[tokio::test]
async fn upload_at_limit_succeeds_and_over_limit_fails() {
    let server = TestServer::with_config(|c| {
        c.storage.max_upload_size = "1KB".to_string();
    })
    .await;
    let token = server.admin_token().await;

    let exact = vec![0xAB; 1024];
    let (status, _) = upload(&server.router, "PUT", "/exact.bin", &token, &exact, &[]).await;
    assert_eq!(status, StatusCode::OK);

    let over = vec![0xAB; 1025];
    let (status, _) = upload(&server.router, "PUT", "/over.bin", &token, &over, &[]).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(!server.blobs().exists("/over.bin").await.unwrap());
}

#[tokio::test]
async fn lying_content_length_still_hits_the_cap() {
    let server = TestServer::with_config(|c| {
        c.storage.max_upload_size = "1KB".to_string();
    })
    .await;
    let token = server.admin_token().await;

    // Declared length passes the gate; the streamed body does not.
    let body = vec![0xCD; 4096];
    let request = Request::builder()
        .method("PUT")
        .uri("/liar.bin")
        .header("X-API-Token", &token)
        .header("Content-Length", "10")
        .body(Body::from(body))
        .unwrap();

    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(!server.blobs().exists("/liar.bin").await.unwrap());
}

#[tokio::test]
async fn multipart_upload_joins_directory_and_filename() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let boundary = "depot-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"artifact.bin\"\r\n\
         Content-Type: application/x-test\r\n\r\n\
         multipart payload\r\n\
         --{boundary}--\r\n"
    );

    let request = Request::builder()
        .method("POST")
        .uri("/drop/zone")
        .header("X-API-Token", &token)
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, bytes) = get_blob(&server.router, "/drop/zone/artifact.bin").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"multipart payload");

    let record = server
        .metadata()
        .get_resource("/drop/zone/artifact.bin")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.content_type.as_deref(), Some("application/x-test"));
}

#[tokio::test]
async fn upload_response_is_visible_in_meta_api() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(
        &server.router,
        "PUT",
        "/api-check.bin",
        &token,
        b"meta",
        &[("X-Tags", "kind=test")],
    )
    .await;

    let (status, json) = api_json(
        &server.router,
        "GET",
        "/_/api/v1/fs/api-check.bin",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "/api-check.bin");
    assert_eq!(json["isdir"], false);
    assert_eq!(json["tags"][0]["key"], "kind");
    assert_eq!(json["tags"][0]["value"], "test");
}
