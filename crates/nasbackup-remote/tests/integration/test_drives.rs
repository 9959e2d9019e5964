//! Drive listing, creation and status updates

use chrono::{TimeZone, Utc};
use nasbackup_core::{
    domain::{DrivePatch, DriveStatus},
    ports::IRemoteDrive,
};
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, ResponseTemplate,
};

use crate::common;

#[tokio::test]
async fn test_list_drives_parses_backup_drives() {
    let (server, remote) = common::setup_nas_mock().await;
    Mock::given(method("GET"))
        .and(path("/drives"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            common::drive_json("drive-1", "a1b2c3d4", "Idle"),
            { "uuid": "home", "type": "private" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let drives = remote.list_drives().await.expect("list_drives failed");

    assert_eq!(drives.len(), 2);
    assert!(drives[0].belongs_to("a1b2c3d4"));
    assert_eq!(
        drives[0].last_backup_time(),
        Some(Utc.timestamp_millis_opt(1_600_000_000_000).unwrap())
    );
    assert!(!drives[1].is_backup());
    assert!(drives[1].is_disabled());
}

#[tokio::test]
async fn test_update_backup_drive_sends_client_patch() {
    let (server, remote) = common::setup_nas_mock().await;
    let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    Mock::given(method("PATCH"))
        .and(path("/drives/drive-1"))
        .and(body_json(serde_json::json!({
            "client": { "status": "Idle", "lastBackupTime": 1_700_000_000_000_u64 }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::drive_json("drive-1", "a1b2c3d4", "Idle")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let patch = DrivePatch::status(DriveStatus::Idle).with_last_backup_time(at);
    let drive = remote
        .update_backup_drive(&common::id("drive-1"), &patch)
        .await
        .expect("update failed");

    assert_eq!(drive.id.as_str(), "drive-1");
    assert_eq!(drive.client.unwrap().status, DriveStatus::Idle);
}

#[tokio::test]
async fn test_create_backup_drive_binds_client() {
    let (server, remote) = common::setup_nas_mock().await;
    Mock::given(method("POST"))
        .and(path("/drives"))
        .and(body_json(serde_json::json!({
            "type": "backup",
            "client": { "id": "a1b2c3d4", "disabled": false, "status": "Idle" }
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(common::drive_json("drive-9", "a1b2c3d4", "Idle")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let drive = remote.create_backup_drive("a1b2c3d4").await.expect("create failed");
    assert_eq!(drive.id.as_str(), "drive-9");
}

#[tokio::test]
async fn test_unauthorized_is_reported() {
    let (server, remote) = common::setup_nas_mock().await;
    Mock::given(method("GET"))
        .and(path("/drives"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;

    let err = remote.list_drives().await.unwrap_err();
    let text = format!("{err:#}");
    assert!(text.contains("Unauthorized"), "{text}");
    assert!(text.contains("token expired"), "{text}");
}

#[tokio::test]
async fn test_token_can_be_cleared() {
    let (server, remote) = common::setup_nas_mock().await;
    Mock::given(method("GET"))
        .and(path("/drives"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drives"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    assert!(remote.list_drives().await.is_ok());
    remote.set_token(None).await;
    assert!(remote.list_drives().await.is_err());
}
