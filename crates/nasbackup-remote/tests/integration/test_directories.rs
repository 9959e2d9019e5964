//! Directory listing, creation and batch attribute updates

use std::path::Path;

use nasbackup_core::{
    domain::{
        DirectoryAttrs, DirectoryStatus, EntryArgs, EntryMetadata, EntryUpdate,
    },
    ports::IRemoteDrive,
};
use wiremock::{
    matchers::{body_json, body_partial_json, method, path},
    Mock, ResponseTemplate,
};

use crate::common;

#[tokio::test]
async fn test_list_directory_returns_entries() {
    let (server, remote) = common::setup_nas_mock().await;
    Mock::given(method("GET"))
        .and(path("/drives/drive-1/dirs/drive-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "entries": [
                {
                    "uuid": "dir-1",
                    "name": "Documents",
                    "type": "directory",
                    "metadata": {
                        "localPath": "/home/u/Documents",
                        "disabled": false,
                        "status": "Idle",
                        "lastBackupTime": 1_600_000_000_000_u64
                    }
                },
                { "uuid": "file-1", "name": "notes.txt", "type": "file", "size": 12 }
            ]
        })))
        .mount(&server)
        .await;

    let drive = common::id("drive-1");
    let listing = remote.list_directory(&drive, &drive).await.expect("list failed");

    assert_eq!(listing.entries.len(), 2);
    let root = listing
        .find_by_local_path(Path::new("/home/u/Documents"))
        .expect("bound directory");
    assert_eq!(root.id.as_str(), "dir-1");
    assert!(root.is_active());
    assert_eq!(listing.find_by_name("notes.txt").unwrap().size, Some(12));
}

#[tokio::test]
async fn test_missing_directory_maps_to_not_found() {
    let (server, remote) = common::setup_nas_mock().await;
    Mock::given(method("GET"))
        .and(path("/drives/drive-1/dirs/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such dir"))
        .mount(&server)
        .await;

    let err = remote
        .list_directory(&common::id("drive-1"), &common::id("gone"))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("Not found"));
}

#[tokio::test]
async fn test_create_backup_directory_posts_attrs() {
    let (server, remote) = common::setup_nas_mock().await;
    Mock::given(method("POST"))
        .and(path("/drives/drive-1/dirs/drive-1/entries"))
        .and(body_partial_json(serde_json::json!({
            "name": "Documents",
            "type": "directory",
            "metadata": { "localPath": "/home/u/Documents", "status": "Working", "disabled": false }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uuid": "dir-7",
            "name": "Documents",
            "type": "directory"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let attrs = DirectoryAttrs {
        bctime: None,
        bmtime: None,
        metadata: Some(EntryMetadata::working("/home/u/Documents")),
    };
    let drive = common::id("drive-1");
    let created = remote
        .create_backup_directory(&drive, &drive, "Documents", &attrs)
        .await
        .expect("create failed");
    assert_eq!(created.id.as_str(), "dir-7");
    assert!(created.is_directory());
}

#[tokio::test]
async fn test_update_entries_sends_batch() {
    let (server, remote) = common::setup_nas_mock().await;
    Mock::given(method("PATCH"))
        .and(path("/drives/drive-1/dirs/drive-1/entries"))
        .and(body_json(serde_json::json!([
            {
                "bname": "dir-1",
                "args": {
                    "op": "updateAttr",
                    "metadata": {
                        "localPath": "/home/u/Documents",
                        "disabled": false,
                        "status": "Working"
                    }
                }
            }
        ])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let drive = common::id("drive-1");
    let update = EntryUpdate::new(
        common::id("dir-1"),
        EntryArgs::metadata(EntryMetadata::working("/home/u/Documents")),
    );
    assert_eq!(
        update.args.metadata.as_ref().unwrap().status,
        DirectoryStatus::Working
    );
    remote
        .update_entries(&drive, &drive, &[update])
        .await
        .expect("update failed");
}

#[tokio::test]
async fn test_empty_update_batch_sends_nothing() {
    let (server, remote) = common::setup_nas_mock().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let drive = common::id("drive-1");
    remote.update_entries(&drive, &drive, &[]).await.unwrap();
}
