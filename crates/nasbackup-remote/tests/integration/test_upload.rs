//! File uploads

use chrono::{TimeZone, Utc};
use nasbackup_core::ports::{FileUpload, IRemoteDrive};
use wiremock::{
    matchers::{body_string, method, path, query_param},
    Mock, ResponseTemplate,
};

use crate::common;

#[tokio::test]
async fn test_upload_streams_file_with_times() {
    let (server, remote) = common::setup_nas_mock().await;
    let tmp = tempfile::tempdir().unwrap();
    let local = tmp.path().join("report.txt");
    std::fs::write(&local, "hello").unwrap();

    Mock::given(method("PUT"))
        .and(path("/drives/drive-1/dirs/dir-1/files/report.txt"))
        .and(query_param("size", "5"))
        .and(query_param("bmtime", "1700000000000"))
        .and(body_string("hello"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uuid": "file-1",
            "name": "report.txt",
            "type": "file",
            "size": 5,
            "bmtime": 1_700_000_000_000_u64
        })))
        .expect(1)
        .mount(&server)
        .await;

    let upload = FileUpload {
        name: "report.txt".into(),
        local_path: local,
        size: 5,
        bctime: None,
        bmtime: Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()),
    };
    let entry = remote
        .upload_file(&common::id("drive-1"), &common::id("dir-1"), &upload)
        .await
        .expect("upload failed");

    assert_eq!(entry.id.as_str(), "file-1");
    assert_eq!(entry.size, Some(5));
}

#[tokio::test]
async fn test_upload_of_missing_file_fails_before_request() {
    let (server, remote) = common::setup_nas_mock().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let upload = FileUpload {
        name: "gone.txt".into(),
        local_path: "/definitely/not/here/gone.txt".into(),
        size: 1,
        bctime: None,
        bmtime: None,
    };
    let err = remote
        .upload_file(&common::id("drive-1"), &common::id("dir-1"), &upload)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("Failed to open"));
}

#[tokio::test]
async fn test_server_error_keeps_status() {
    let (server, remote) = common::setup_nas_mock().await;
    let tmp = tempfile::tempdir().unwrap();
    let local = tmp.path().join("big.bin");
    std::fs::write(&local, vec![0u8; 16]).unwrap();

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(507).set_body_string("disk full"))
        .mount(&server)
        .await;

    let upload = FileUpload {
        name: "big.bin".into(),
        local_path: local,
        size: 16,
        bctime: None,
        bmtime: None,
    };
    let err = remote
        .upload_file(&common::id("drive-1"), &common::id("dir-1"), &upload)
        .await
        .unwrap_err();
    let text = format!("{err:#}");
    assert!(text.contains("507"), "{text}");
    assert!(text.contains("disk full"), "{text}");
}
