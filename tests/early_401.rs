//! End-to-end early 401 checks
//!
//! Each test starts the authenticating server on a free port, uploads the
//! payload without credentials five times and expects a 401 every time.

use std::time::Duration;
use upload_abort::http::{
    AuthServer, Credentials, ServerConfig, Status, UploadClient, UploadRequest, X_401,
};
use upload_abort::{BodyStrategy, Harness, HarnessConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("upload_abort=debug")
        .try_init();
}

fn harness() -> Harness {
    init_tracing();
    Harness::new(HarnessConfig::new().port(0)).unwrap()
}

fn assert_all_unauthorized(strategy: BodyStrategy) {
    let harness = harness();
    let statuses = harness.run_and_verify(strategy).unwrap();

    assert_eq!(statuses.len(), 5);
    assert!(statuses.iter().all(|s| *s == Status::UNAUTHORIZED));
}

#[test]
fn test_file_region() {
    assert_all_unauthorized(BodyStrategy::FileRegion);
}

#[test]
fn test_chunked_file() {
    assert_all_unauthorized(BodyStrategy::ChunkedFile);
}

#[test]
fn test_chunked_mapped_file() {
    assert_all_unauthorized(BodyStrategy::ChunkedMappedFile);
}

#[test]
fn test_every_iteration_uses_new_connection() {
    let harness = harness();

    harness.run_and_verify(BodyStrategy::FileRegion).unwrap();
    assert_eq!(harness.server().connections(), 5);

    // Aborted uploads leave nothing behind for the next run.
    harness.run_and_verify(BodyStrategy::ChunkedMappedFile).unwrap();
    assert_eq!(harness.server().connections(), 10);
}

#[test]
fn test_challenge_carries_realm() {
    let harness = harness();
    let outcome = harness
        .upload(&UploadRequest::put("/"), BodyStrategy::FileRegion)
        .unwrap();

    assert_eq!(outcome.status, Status::UNAUTHORIZED);
    assert_eq!(
        outcome.headers.get("WWW-Authenticate"),
        Some("Basic realm=\"MyRealm\"")
    );
    assert!(outcome.body.is_empty());
    assert!(outcome.bytes_sent <= outcome.body_length);
}

#[test]
fn test_authenticated_uploads_arrive_intact() {
    let harness = harness();
    let credentials = harness.config().user_credentials();
    let request = UploadRequest::put("/").credentials(&credentials);
    let length = harness.fixture().len();

    for strategy in BodyStrategy::ALL {
        let outcome = harness.upload(&request, strategy).unwrap();

        assert_eq!(outcome.status, Status::OK, "strategy {}", strategy);
        assert!(!outcome.aborted);
        assert_eq!(outcome.bytes_sent, length);
        assert_eq!(
            outcome.headers.get("X-Auth"),
            Some(credentials.to_header_value().as_str())
        );
        assert_eq!(
            outcome.headers.get("X-Content-Length"),
            Some(length.to_string().as_str())
        );
    }
}

#[test]
fn test_x401_with_valid_credentials() {
    let harness = harness();
    let request = UploadRequest::put("/")
        .credentials(&harness.config().user_credentials())
        .header(X_401, "true");

    for strategy in BodyStrategy::ALL {
        let outcome = harness.upload(&request, strategy).unwrap();
        assert_eq!(outcome.status, Status::UNAUTHORIZED, "strategy {}", strategy);
        assert!(outcome.headers.get("WWW-Authenticate").is_none());
    }
}

#[test]
fn test_wrong_password_is_challenged() {
    let harness = harness();
    let request = UploadRequest::put("/").header(
        "Authorization",
        Credentials::new("user", "wrong").to_header_value(),
    );

    let outcome = harness.upload(&request, BodyStrategy::ChunkedFile).unwrap();
    assert_eq!(outcome.status, Status::UNAUTHORIZED);
    assert!(outcome.headers.contains("WWW-Authenticate"));
}

#[test]
fn test_large_payload_is_aborted_early() {
    init_tracing();
    // Bigger than loopback buffers, so the 401 must land mid-upload.
    let config = HarnessConfig::new()
        .port(0)
        .fixture_size(48 * 1024 * 1024)
        .response_timeout(Duration::from_secs(20));
    let harness = Harness::new(config).unwrap();

    for strategy in BodyStrategy::ALL {
        let outcome = harness.upload(&UploadRequest::put("/"), strategy).unwrap();
        assert_eq!(outcome.status, Status::UNAUTHORIZED);
        assert!(outcome.aborted, "strategy {}", strategy);
        assert!(outcome.bytes_sent < outcome.body_length);
    }
}

#[test]
fn test_empty_file_upload() {
    init_tracing();
    let server = AuthServer::start(ServerConfig::default()).unwrap();
    let client = UploadClient::new(server.local_addr(), Duration::from_secs(10));
    let request = UploadRequest::put("/").credentials(&Credentials::new("user", "pwd"));
    let empty = tempfile::NamedTempFile::new().unwrap();

    for strategy in BodyStrategy::ALL {
        let body = strategy.open(empty.path(), 8192).unwrap();
        let outcome = client.upload(&request, body).unwrap();

        assert_eq!(outcome.status, Status::OK, "strategy {}", strategy);
        assert_eq!(outcome.headers.get("X-Content-Length"), Some("0"));
        assert_eq!(outcome.bytes_sent, 0);
        assert!(!outcome.aborted);
    }
    assert_eq!(server.connections(), 3);
}

#[test]
fn test_zero_iterations_rejected() {
    let result = Harness::new(HarnessConfig::new().port(0).iterations(0));
    assert!(matches!(result, Err(upload_abort::Error::Config(_))));
}
