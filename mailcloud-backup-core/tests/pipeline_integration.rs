use std::collections::HashSet;
use std::fs;
use std::path::Path;

use mailcloud_backup_core::config::{BackupConfig, Behaviour, Credentials, Locations, NetworkConfig};
use mailcloud_backup_core::contract::{CloudError, CsrfToken, MockCloudApi, UploadDomain, UploadReceipt};
use mailcloud_backup_core::pipeline::{upload_directory, FailureKind, PipelineError, Stage};
use mailcloud_backup_core::scanner::RejectReason;
use tempfile::tempdir;

const HASH: &str = "C172C6E2FF47284FF33F348FEA7EECE532F6C051";

fn backup_config(local: &Path, archive_files: bool, remove_uploaded: bool) -> BackupConfig {
    BackupConfig {
        credentials: Credentials {
            email: "user@mail.ru".into(),
            password: "secret".into(),
        },
        locations: Locations {
            cloud_path: "backups/".into(),
            local_path: local.to_path_buf(),
        },
        behaviour: Behaviour {
            archive_files,
            remove_uploaded,
        },
        network: NetworkConfig::default(),
        skip_files: HashSet::from([".mailcloud.yaml".to_string(), "upload.log".to_string()]),
    }
}

/// A mock that gets through session setup and reports `space` free bytes.
fn session_mock(space: u64) -> MockCloudApi {
    let mut cloud = MockCloudApi::new();
    cloud.expect_authenticate().times(1).returning(|_| Ok(()));
    cloud
        .expect_fetch_csrf_token()
        .times(1)
        .returning(|| Ok(CsrfToken::new("csrf-token")));
    cloud
        .expect_resolve_upload_domain()
        .times(1)
        .returning(|_| Ok(UploadDomain::new("https://upload.example/upload/")));
    cloud.expect_query_free_space().times(1).returning(move |_| space);
    cloud
}

fn posted(size: u64) -> Result<UploadReceipt, CloudError> {
    Ok(UploadReceipt {
        hash: HASH.to_string(),
        size,
    })
}

fn http_error(operation: &'static str, status: u16) -> CloudError {
    CloudError::Http {
        operation,
        status,
        body: "error".into(),
    }
}

#[tokio::test]
async fn test_plain_file_is_archived_and_zip_is_uploaded_unchanged() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), vec![b'n'; 500]).unwrap();
    fs::write(dir.path().join("skip.zip"), vec![b's'; 1000]).unwrap();

    let mut cloud = session_mock(10_000);
    cloud
        .expect_upload_file()
        .times(2)
        .withf(|_, _, name, mime| (name == "notes.zip" || name == "skip.zip") && mime == "application/zip")
        .returning(|_, path, _, _| posted(fs::metadata(path).unwrap().len()));
    cloud
        .expect_register_file()
        .times(2)
        .withf(|cloud_path, _, receipt, token| {
            cloud_path == "backups/" && receipt.hash == HASH && token.as_str() == "csrf-token"
        })
        .returning(|_, _, _, _| Ok(()));

    let config = backup_config(dir.path(), true, false);
    let report = upload_directory(&config, &cloud).await.expect("run should complete");

    let uploaded: Vec<&str> = report.uploaded.iter().map(String::as_str).collect();
    assert_eq!(uploaded, vec!["notes.zip", "skip.zip"]);
    assert!(!dir.path().join("notes.txt").exists(), "original should be replaced by its archive");
    assert!(dir.path().join("notes.zip").exists());
    assert_eq!(fs::read(dir.path().join("skip.zip")).unwrap(), vec![b's'; 1000]);
    assert!(report.failures.is_empty());
    assert!(report.compression_fallbacks.is_empty());
}

#[tokio::test]
async fn test_file_larger_than_space_budget_is_never_posted() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("big.bin"), vec![0u8; 500]).unwrap();

    let mut cloud = session_mock(100);
    cloud.expect_upload_file().times(0);
    cloud.expect_register_file().times(0);

    let config = backup_config(dir.path(), false, true);
    let report = upload_directory(&config, &cloud).await.unwrap();

    assert!(report.uploaded.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].name, "big.bin");
    assert_eq!(
        report.rejected[0].reason,
        RejectReason::InsufficientSpace { size: 500, budget: 100 }
    );
    assert!(dir.path().join("big.bin").exists());
}

#[tokio::test]
async fn test_registration_failure_keeps_local_copy() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("report.csv"), b"a,b\n1,2\n").unwrap();

    let mut cloud = session_mock(10_000);
    cloud
        .expect_upload_file()
        .times(1)
        .returning(|_, _, _, _| posted(8));
    cloud
        .expect_register_file()
        .times(1)
        .returning(|_, _, _, _| Err(http_error("file addition", 400)));

    let config = backup_config(dir.path(), false, true);
    let report = upload_directory(&config, &cloud).await.unwrap();

    assert!(report.uploaded.is_empty());
    assert!(report.removed.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "report.csv");
    assert!(matches!(
        report.failures[0].kind,
        FailureKind::Registration(CloudError::Http { status: 400, .. })
    ));
    assert!(dir.path().join("report.csv").exists(), "unregistered file must stay on disk");
}

#[tokio::test]
async fn test_post_failure_skips_registration_and_continues() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"first").unwrap();
    fs::write(dir.path().join("b.txt"), b"second").unwrap();

    let mut cloud = session_mock(10_000);
    cloud
        .expect_upload_file()
        .times(2)
        .returning(|_, _, name, _| {
            if name == "a.txt" {
                Err(http_error("file post", 500))
            } else {
                posted(6)
            }
        });
    cloud
        .expect_register_file()
        .times(1)
        .withf(|_, name, _, _| name == "b.txt")
        .returning(|_, _, _, _| Ok(()));

    let config = backup_config(dir.path(), false, true);
    let report = upload_directory(&config, &cloud).await.unwrap();

    assert_eq!(report.uploaded.iter().collect::<Vec<_>>(), vec!["b.txt"]);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].kind, FailureKind::Post(_)));

    // Only the tracked file is removed.
    assert_eq!(report.removed, vec!["b.txt".to_string()]);
    assert!(dir.path().join("a.txt").exists());
    assert!(!dir.path().join("b.txt").exists());
}

#[tokio::test]
async fn test_files_are_kept_when_removal_is_disabled() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("keep.txt"), b"keep me").unwrap();

    let mut cloud = session_mock(10_000);
    cloud.expect_upload_file().returning(|_, _, _, _| posted(7));
    cloud.expect_register_file().returning(|_, _, _, _| Ok(()));

    let config = backup_config(dir.path(), false, false);
    let report = upload_directory(&config, &cloud).await.unwrap();

    assert!(report.uploaded.contains("keep.txt"));
    assert!(report.removed.is_empty());
    assert!(dir.path().join("keep.txt").exists());
}

#[tokio::test]
async fn test_space_budget_is_a_snapshot_not_a_running_total() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("one.bin"), vec![1u8; 600]).unwrap();
    fs::write(dir.path().join("two.bin"), vec![2u8; 600]).unwrap();

    // 1000 bytes free: each file fits alone, both together do not.
    let mut cloud = session_mock(1000);
    cloud
        .expect_upload_file()
        .times(2)
        .returning(|_, _, _, _| posted(600));
    cloud.expect_register_file().times(2).returning(|_, _, _, _| Ok(()));

    let config = backup_config(dir.path(), false, false);
    let report = upload_directory(&config, &cloud).await.unwrap();

    assert_eq!(report.uploaded.len(), 2);
    assert!(report.rejected.is_empty());
}

#[tokio::test]
async fn test_skip_listed_files_and_directories_are_ignored() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join(".mailcloud.yaml"), b"Credentials: {}\n").unwrap();
    fs::write(dir.path().join("upload.log"), b"log line\n").unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested").join("inner.txt"), b"inner").unwrap();
    fs::write(dir.path().join("data.json"), b"{}").unwrap();

    let mut cloud = session_mock(10_000);
    cloud
        .expect_upload_file()
        .times(1)
        .withf(|_, _, name, mime| name == "data.json" && mime == "application/json")
        .returning(|_, _, _, _| posted(2));
    cloud.expect_register_file().times(1).returning(|_, _, _, _| Ok(()));

    let config = backup_config(dir.path(), false, true);
    let report = upload_directory(&config, &cloud).await.unwrap();

    assert_eq!(report.uploaded.len(), 1);
    assert!(dir.path().join(".mailcloud.yaml").exists());
    assert!(dir.path().join("upload.log").exists());
    assert!(dir.path().join("nested").join("inner.txt").exists());
}

#[tokio::test]
async fn test_unknown_type_is_posted_as_plain_text() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("README"), b"read me").unwrap();

    let mut cloud = session_mock(10_000);
    cloud
        .expect_upload_file()
        .times(1)
        .withf(|_, _, name, mime| name == "README" && mime == "text/plain")
        .returning(|_, _, _, _| posted(7));
    cloud.expect_register_file().returning(|_, _, _, _| Ok(()));

    let config = backup_config(dir.path(), false, false);
    upload_directory(&config, &cloud).await.unwrap();
}

#[tokio::test]
async fn test_authentication_failure_aborts_before_anything_else() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"untouched").unwrap();

    let mut cloud = MockCloudApi::new();
    cloud
        .expect_authenticate()
        .times(1)
        .returning(|_| Err(http_error("authentication", 403)));

    let config = backup_config(dir.path(), true, true);
    let err = upload_directory(&config, &cloud).await.unwrap_err();

    assert!(matches!(err, PipelineError::Authentication(_)));
    assert_eq!(err.stage(), Stage::Init);
    assert!(dir.path().join("a.txt").exists(), "no file is touched on a fatal error");
    assert!(!dir.path().join("a.zip").exists());
}

#[tokio::test]
async fn test_missing_csrf_token_aborts_run() {
    let dir = tempdir().unwrap();

    let mut cloud = MockCloudApi::new();
    cloud.expect_authenticate().returning(|_| Ok(()));
    cloud.expect_fetch_csrf_token().returning(|| {
        Err(CloudError::MalformedResponse {
            operation: "csrf token request",
            detail: "empty token".into(),
        })
    });

    let config = backup_config(dir.path(), true, true);
    let err = upload_directory(&config, &cloud).await.unwrap_err();
    assert!(matches!(err, PipelineError::CsrfToken(_)));
    assert_eq!(err.stage(), Stage::Authenticated);
}

#[tokio::test]
async fn test_missing_upload_domain_aborts_run() {
    let dir = tempdir().unwrap();

    let mut cloud = MockCloudApi::new();
    cloud.expect_authenticate().returning(|_| Ok(()));
    cloud
        .expect_fetch_csrf_token()
        .returning(|| Ok(CsrfToken::new("csrf-token")));
    cloud
        .expect_resolve_upload_domain()
        .returning(|_| Err(http_error("upload domain request", 502)));

    let config = backup_config(dir.path(), true, true);
    let err = upload_directory(&config, &cloud).await.unwrap_err();
    assert!(matches!(err, PipelineError::UploadDomain(_)));
}

#[tokio::test]
async fn test_missing_local_directory_aborts_before_space_query() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");

    let mut cloud = MockCloudApi::new();
    cloud.expect_authenticate().returning(|_| Ok(()));
    cloud
        .expect_fetch_csrf_token()
        .returning(|| Ok(CsrfToken::new("csrf-token")));
    cloud
        .expect_resolve_upload_domain()
        .returning(|_| Ok(UploadDomain::new("https://upload.example/upload/")));
    cloud.expect_query_free_space().times(0);

    let config = backup_config(&missing, false, false);
    let err = upload_directory(&config, &cloud).await.unwrap_err();
    match err {
        PipelineError::MissingLocalDirectory(path) => assert_eq!(path, missing),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_zero_space_admits_nothing() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("tiny.txt"), b"x").unwrap();

    let mut cloud = session_mock(0);
    cloud.expect_upload_file().times(0);

    let config = backup_config(dir.path(), false, true);
    let report = upload_directory(&config, &cloud).await.unwrap();
    assert!(report.uploaded.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert!(dir.path().join("tiny.txt").exists());
}
