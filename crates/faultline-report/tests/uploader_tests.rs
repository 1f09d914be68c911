//! Integration tests for the upload pipeline against a mock ingestion
//! endpoint.

use std::time::Duration;

use faultline_core::{ArtifactId, ConsentGate};
use faultline_report::{ArtifactStore, UploadController, UploadEvent};
use tokio::sync::broadcast;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MINIDUMP_PATH: &str = "/api/42/minidump/";

async fn setup(consent: bool) -> (MockServer, tempfile::TempDir, ArtifactStore, UploadController) {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().to_path_buf());
    let controller = UploadController::new(
        store.clone(),
        ConsentGate::new(consent),
        Some(format!("{}{}?sentry_key=abc123", server.uri(), MINIDUMP_PATH)),
        "1.4.0-dev".to_string(),
        30,
    );
    (server, dir, store, controller)
}

fn write_artifact(store: &ArtifactStore, id: &str) -> ArtifactId {
    std::fs::create_dir_all(store.dir()).unwrap();
    let id = ArtifactId::new(id).unwrap();
    std::fs::write(store.path(&id), b"minidump bytes").unwrap();
    id
}

/// Waits for the completion event for `id`, skipping progress events.
async fn next_completed(rx: &mut broadcast::Receiver<UploadEvent>, id: &ArtifactId) -> bool {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for completion event")
            .expect("event channel closed");
        match event {
            UploadEvent::Completed { id: got, success } if got == *id => return success,
            _ => {}
        }
    }
}

#[tokio::test]
async fn successful_upload_removes_artifact_and_completes_once() {
    let (server, _dir, store, controller) = setup(true).await;
    Mock::given(method("POST"))
        .and(path(MINIDUMP_PATH))
        .and(query_param("sentry_key", "abc123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let id = write_artifact(&store, "A1B2");
    let mut rx = controller.subscribe();

    controller.upload_crash_report(id.clone());

    assert!(next_completed(&mut rx, &id).await);
    assert!(!store.exists(&id));

    // The multipart body carries the binary part and the metadata part
    // keyed by the artifact id.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("upload_file_minidump"));
    assert!(body.contains("minidump bytes"));
    assert!(body.contains("\"event_id\":\"A1B2\""));
    assert!(body.contains("\"platform\":\"native\""));
    assert!(body.contains("\"release\":\"1.4.0-dev\""));

    // No further completion events for this id.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn failed_upload_retains_artifact_for_retry() {
    let (server, _dir, store, controller) = setup(true).await;
    Mock::given(method("POST"))
        .and(path(MINIDUMP_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let id = write_artifact(&store, "B2C3");
    let mut rx = controller.subscribe();

    controller.upload_crash_report(id.clone());

    assert!(!next_completed(&mut rx, &id).await);
    assert!(store.exists(&id));

    // A later pending scan re-enumerates and retries it.
    assert_eq!(controller.check_pending_reports(), 1);
    assert!(!next_completed(&mut rx, &id).await);
    assert!(store.exists(&id));
}

#[tokio::test]
async fn missing_artifact_completes_false_without_network() {
    let (server, _dir, _store, controller) = setup(true).await;

    let id = ArtifactId::new("DEADBEEF").unwrap();
    let mut rx = controller.subscribe();

    controller.upload_crash_report(id.clone());

    assert!(!next_completed(&mut rx, &id).await);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_uploads_for_same_id_issue_one_request() {
    let (server, _dir, store, controller) = setup(true).await;
    Mock::given(method("POST"))
        .and(path(MINIDUMP_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let id = write_artifact(&store, "E5F6");
    let mut rx = controller.subscribe();

    controller.upload_crash_report(id.clone());
    controller.upload_crash_report(id.clone());

    assert!(next_completed(&mut rx, &id).await);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    // The duplicate call produced no second completion.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn distinct_artifacts_upload_concurrently() {
    let (server, _dir, store, controller) = setup(true).await;
    Mock::given(method("POST"))
        .and(path(MINIDUMP_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let first = write_artifact(&store, "0001");
    let second = write_artifact(&store, "0002");
    let mut rx = controller.subscribe();

    assert_eq!(controller.check_pending_reports(), 2);

    // No ordering guarantee between distinct artifacts: collect both
    // completions in whatever order they arrive.
    let mut completed = Vec::new();
    while completed.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for completions")
            .expect("event channel closed");
        if let UploadEvent::Completed { id, success } = event {
            assert!(success);
            completed.push(id);
        }
    }
    assert!(completed.contains(&first));
    assert!(completed.contains(&second));

    assert!(!store.exists(&first));
    assert!(!store.exists(&second));
    assert_eq!(controller.check_pending_reports(), 0);
}

#[tokio::test]
async fn upload_without_consent_issues_no_request() {
    let (server, _dir, store, controller) = setup(false).await;

    let id = write_artifact(&store, "C0FFEE");
    let mut rx = controller.subscribe();

    controller.upload_crash_report(id.clone());
    controller.check_pending_reports();

    // Give any (wrongly) spawned task a chance to run.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(store.exists(&id));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn progress_events_precede_completion() {
    let (server, _dir, store, controller) = setup(true).await;
    Mock::given(method("POST"))
        .and(path(MINIDUMP_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let id = write_artifact(&store, "AB12");
    let mut rx = controller.subscribe();
    controller.upload_crash_report(id.clone());

    let mut saw_progress = false;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            UploadEvent::Progress {
                id: got,
                bytes_total,
                ..
            } if got == id => {
                assert_eq!(bytes_total, b"minidump bytes".len() as u64);
                saw_progress = true;
            }
            UploadEvent::Completed { id: got, success } if got == id => {
                assert!(success);
                break;
            }
            _ => {}
        }
    }
    assert!(saw_progress);
}
