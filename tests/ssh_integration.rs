//! Integration tests against a real SSH host.
//!
//! These tests open real connections and write under a scratch directory.
//! Run with:
//! HYBRID_TEST_SSH_HOST=host HYBRID_TEST_SSH_USER=root HYBRID_SSH_PASSWORD=pw \
//!   cargo test --test ssh_integration -- --ignored
//!
//! `HYBRID_TEST_SSH_PORT` and `HYBRID_TEST_SSH_KEY` are optional.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use hybrid_pipeline::plan::SshSettings;
use hybrid_pipeline::remote::{ArtifactStager, RemoteSession, SshConnector};
use hybrid_pipeline::PipelineError;

fn test_settings() -> SshSettings {
    let host = std::env::var("HYBRID_TEST_SSH_HOST")
        .expect("HYBRID_TEST_SSH_HOST environment variable must be set for integration tests");
    let user = std::env::var("HYBRID_TEST_SSH_USER").unwrap_or_else(|_| "root".to_string());

    let mut settings = SshSettings::new(host, user).with_retries(2, Duration::from_secs(1));
    if let Ok(port) = std::env::var("HYBRID_TEST_SSH_PORT") {
        settings.port = port.parse().expect("HYBRID_TEST_SSH_PORT must be a port number");
    }
    if let Ok(password) = std::env::var("HYBRID_SSH_PASSWORD") {
        settings = settings.with_password(password);
    }
    if let Ok(key) = std::env::var("HYBRID_TEST_SSH_KEY") {
        settings.pkey_path = Some(PathBuf::from(key));
    }
    settings
}

fn scratch_dir() -> String {
    format!("/tmp/hybrid-pipeline-test-{}", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore] // Run with: cargo test --test ssh_integration -- --ignored
async fn test_run_command() {
    let session = RemoteSession::connect(&SshConnector, &test_settings())
        .await
        .expect("should connect");

    let output = session.run("echo hello", None).await;
    assert!(output.is_ok(), "Command failed: {:?}", output.err());
    assert_eq!(output.expect("output").stdout.trim(), "hello");

    let err = session.run("exit 3", None).await.unwrap_err();
    match err {
        PipelineError::RemoteExecution { exit_code, .. } => assert_eq!(exit_code, 3),
        other => panic!("unexpected error: {other}"),
    }

    session.close().await;
}

#[tokio::test]
#[ignore]
async fn test_upload_download_round_trip() {
    let session = RemoteSession::connect(&SshConnector, &test_settings())
        .await
        .expect("should connect");
    let stager = ArtifactStager::new(&session);
    let remote_dir = scratch_dir();

    let local = tempfile::TempDir::new().unwrap();
    let original: Vec<u8> = (0..=255u8).cycle().take(1 << 20).collect();
    let src = local.path().join("saved.pt");
    fs::write(&src, &original).unwrap();

    session.ensure_directory(&remote_dir).await.unwrap();
    let remote_file = format!("{remote_dir}/saved.pt");
    stager.upload(&src, &remote_file).await.unwrap();

    let dest = local.path().join("back/saved.pt");
    stager.download(&remote_file, &dest).await.unwrap();
    assert_eq!(fs::read(&dest).unwrap(), original);

    session
        .run(&format!("rm -rf {remote_dir}"), None)
        .await
        .unwrap();
    session.close().await;
}

#[tokio::test]
#[ignore]
async fn test_unreachable_host_exhausts_retries() {
    let mut settings = SshSettings::new("127.0.0.1", "nobody")
        .with_password("x")
        .with_retries(2, Duration::from_millis(100));
    settings.port = 1;

    let result = RemoteSession::connect(&SshConnector, &settings).await;
    match result {
        Err(PipelineError::Connection { attempts, .. }) => assert_eq!(attempts, 2),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(session) => {
            session.close().await;
            panic!("connection to port 1 should fail");
        }
    }
}
