//! Janitor integration tests.

mod common;

use common::{TestServer, upload};
use depot_metadata::{KIND_DIR, ResourcePatch};
use depot_server::Janitor;
use time::{Duration, OffsetDateTime};

fn janitor_for(server: &TestServer) -> Janitor {
    Janitor::new(
        server.blobs(),
        server.metadata(),
        server.state.audit.clone(),
        server.state.config.clone(),
    )
}

async fn expire(server: &TestServer, path: &str, kind: &str) {
    let now = OffsetDateTime::now_utc();
    let patch = ResourcePatch {
        expires_at: Some(now - Duration::hours(1)),
        ..ResourcePatch::default()
    };
    server
        .metadata()
        .apply_patch(path, kind, &patch, now)
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_file_is_reclaimed_and_audited() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(&server.router, "PUT", "/old.bin", &token, b"stale", &[]).await;
    expire(&server, "/old.bin", "file").await;

    janitor_for(&server).run_sweep().await;

    assert!(!server.blobs().exists("/old.bin").await.unwrap());
    assert!(
        server
            .metadata()
            .get_resource("/old.bin")
            .await
            .unwrap()
            .is_none()
    );

    let log = server.audit_log();
    assert!(log.contains("SYSTEM_CLEANUP"));
    assert!(log.contains("expired"));
    assert!(log.contains("\"user\":\"system\""));
}

#[tokio::test]
async fn unexpired_files_are_left_alone() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(
        &server.router,
        "PUT",
        "/fresh.bin",
        &token,
        b"fresh",
        &[("X-Expires", "7d")],
    )
    .await;

    janitor_for(&server).run_sweep().await;

    assert!(server.blobs().exists("/fresh.bin").await.unwrap());
}

#[tokio::test]
async fn nonempty_expired_directory_waits_for_children() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    // /d is expired, but its child is not.
    upload(&server.router, "PUT", "/d/keep", &token, b"child", &[]).await;
    expire(&server, "/d", KIND_DIR).await;

    let janitor = janitor_for(&server);
    janitor.run_sweep().await;

    assert!(server.blobs().exists("/d").await.unwrap());
    assert!(
        server.metadata().get_resource("/d").await.unwrap().is_some(),
        "record must survive while the directory is non-empty"
    );

    // Once the child is gone, the next sweep reclaims both.
    server.blobs().remove_file("/d/keep").await.unwrap();
    server.metadata().delete_subtree("/d/keep").await.unwrap();

    janitor.run_sweep().await;

    assert!(!server.blobs().exists("/d").await.unwrap());
    assert!(server.metadata().get_resource("/d").await.unwrap().is_none());
}

#[tokio::test]
async fn protected_expired_resources_are_skipped() {
    let server = TestServer::with_config(|c| {
        c.storage.protected_paths = vec!["/stable".to_string()];
    })
    .await;
    let token = server.admin_token().await;

    upload(&server.router, "PUT", "/stable/old.bin", &token, b"keep", &[]).await;
    expire(&server, "/stable/old.bin", "file").await;

    janitor_for(&server).run_sweep().await;

    // Blob and record both survive; a config change may later lift the
    // protection and let reclamation resume.
    assert!(server.blobs().exists("/stable/old.bin").await.unwrap());
    let record = server
        .metadata()
        .get_resource("/stable/old.bin")
        .await
        .unwrap()
        .unwrap();
    assert!(record.expires_at.is_some());
}

#[tokio::test]
async fn immutable_expired_records_are_not_selected() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(&server.router, "PUT", "/frozen.bin", &token, b"x", &[]).await;
    let now = OffsetDateTime::now_utc();
    let patch = ResourcePatch {
        expires_at: Some(now - Duration::hours(1)),
        immutable: Some(true),
        ..ResourcePatch::default()
    };
    server
        .metadata()
        .apply_patch("/frozen.bin", "file", &patch, now)
        .await
        .unwrap();

    janitor_for(&server).run_sweep().await;

    assert!(server.blobs().exists("/frozen.bin").await.unwrap());
}

#[tokio::test]
async fn missing_blob_drops_the_record_only() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    upload(&server.router, "PUT", "/gone.bin", &token, b"x", &[]).await;
    expire(&server, "/gone.bin", "file").await;

    // Blob vanishes out of band.
    server.blobs().remove_file("/gone.bin").await.unwrap();

    janitor_for(&server).run_sweep().await;

    assert!(
        server
            .metadata()
            .get_resource("/gone.bin")
            .await
            .unwrap()
            .is_none()
    );
}
