//! HttpRemoteDrive - `IRemoteDrive` implementation over the NAS REST API
//!
//! | Operation                  | Request                                           |
//! |----------------------------|---------------------------------------------------|
//! | `list_drives`              | `GET drives`                                      |
//! | `list_directory`           | `GET drives/{drive}/dirs/{dir}`                   |
//! | `create_backup_directory`  | `POST drives/{drive}/dirs/{dir}/entries`          |
//! | `update_entries`           | `PATCH drives/{drive}/dirs/{dir}/entries`         |
//! | `update_backup_drive`      | `PATCH drives/{drive}` with `{ "client": patch }` |
//! | `create_backup_drive`      | `POST drives`                                     |
//! | `upload_file`              | `PUT drives/{drive}/dirs/{dir}/files/{name}`      |
//!
//! Uses `tokio::sync::RwLock` around the client because the token can be
//! swapped while the port methods only take `&self`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use nasbackup_core::{
    domain::{
        BackupDrive, DirectoryAttrs, DirectoryListing, DrivePatch, DriveStatus, EntryKind,
        EntryUpdate, RemoteEntry, RemoteId,
    },
    ports::{FileUpload, IRemoteDrive},
};

use crate::client::{check_status, NasClient};

/// Body of `POST drives/{drive}/dirs/{dir}/entries`
#[derive(Debug, Serialize)]
struct NewDirectory<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: EntryKind,
    #[serde(flatten)]
    attrs: &'a DirectoryAttrs,
}

/// Body of `PATCH drives/{drive}`
#[derive(Debug, Serialize)]
struct DriveUpdate<'a> {
    client: &'a DrivePatch,
}

/// Body of `POST drives`
#[derive(Debug, Serialize)]
struct NewDrive<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    client: NewDriveClient<'a>,
}

#[derive(Debug, Serialize)]
struct NewDriveClient<'a> {
    id: &'a str,
    disabled: bool,
    status: DriveStatus,
}

pub struct HttpRemoteDrive {
    client: RwLock<NasClient>,
}

impl HttpRemoteDrive {
    pub fn new(client: NasClient) -> Self {
        Self {
            client: RwLock::new(client),
        }
    }

    /// Replaces the bearer token used by subsequent requests
    pub async fn set_token(&self, token: Option<String>) {
        self.client.write().await.set_token(token);
    }

    async fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let client = self.client.read().await;
        Ok(client.request(method, segments)?)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send {what}"))?;
        let response = check_status(response)
            .await
            .with_context(|| format!("{what} returned error status"))?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {what} response"))
    }

    async fn send_empty(&self, builder: RequestBuilder, what: &str) -> Result<()> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send {what}"))?;
        check_status(response)
            .await
            .with_context(|| format!("{what} returned error status"))?;
        Ok(())
    }
}

#[async_trait]
impl IRemoteDrive for HttpRemoteDrive {
    async fn list_drives(&self) -> Result<Vec<BackupDrive>> {
        debug!("Listing drives");
        let builder = self.request(Method::GET, &["drives"]).await?;
        self.send_json(builder, "GET drives").await
    }

    async fn list_directory(&self, drive: &RemoteId, dir: &RemoteId) -> Result<DirectoryListing> {
        debug!(drive = %drive, dir = %dir, "Listing directory");
        let builder = self
            .request(Method::GET, &["drives", drive.as_str(), "dirs", dir.as_str()])
            .await?;
        self.send_json(builder, "GET directory").await
    }

    async fn create_backup_directory(
        &self,
        drive: &RemoteId,
        dir: &RemoteId,
        name: &str,
        attrs: &DirectoryAttrs,
    ) -> Result<RemoteEntry> {
        debug!(drive = %drive, parent = %dir, name, "Creating directory");
        let body = NewDirectory {
            name,
            kind: EntryKind::Directory,
            attrs,
        };
        let builder = self
            .request(
                Method::POST,
                &["drives", drive.as_str(), "dirs", dir.as_str(), "entries"],
            )
            .await?
            .json(&body);
        self.send_json(builder, "create directory").await
    }

    async fn update_entries(
        &self,
        drive: &RemoteId,
        dir: &RemoteId,
        updates: &[EntryUpdate],
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        debug!(drive = %drive, dir = %dir, count = updates.len(), "Updating entries");
        let builder = self
            .request(
                Method::PATCH,
                &["drives", drive.as_str(), "dirs", dir.as_str(), "entries"],
            )
            .await?
            .json(updates);
        self.send_empty(builder, "update entries").await
    }

    async fn update_backup_drive(&self, drive: &RemoteId, patch: &DrivePatch) -> Result<BackupDrive> {
        debug!(drive = %drive, status = ?patch.status, "Updating backup drive");
        let builder = self
            .request(Method::PATCH, &["drives", drive.as_str()])
            .await?
            .json(&DriveUpdate { client: patch });
        self.send_json(builder, "update drive").await
    }

    async fn create_backup_drive(&self, client_id: &str) -> Result<BackupDrive> {
        debug!(client_id, "Creating backup drive");
        let body = NewDrive {
            kind: BackupDrive::KIND,
            client: NewDriveClient {
                id: client_id,
                disabled: false,
                status: DriveStatus::Idle,
            },
        };
        let builder = self.request(Method::POST, &["drives"]).await?.json(&body);
        self.send_json(builder, "create drive").await
    }

    async fn upload_file(
        &self,
        drive: &RemoteId,
        dir: &RemoteId,
        file: &FileUpload,
    ) -> Result<RemoteEntry> {
        debug!(path = %file.local_path.display(), size = file.size, "Uploading file");
        let handle = tokio::fs::File::open(&file.local_path)
            .await
            .with_context(|| format!("Failed to open {}", file.local_path.display()))?;

        let mut query = vec![("size", file.size.to_string())];
        if let Some(t) = file.bctime {
            query.push(("bctime", t.timestamp_millis().to_string()));
        }
        if let Some(t) = file.bmtime {
            query.push(("bmtime", t.timestamp_millis().to_string()));
        }

        let builder = self
            .request(
                Method::PUT,
                &[
                    "drives",
                    drive.as_str(),
                    "dirs",
                    dir.as_str(),
                    "files",
                    &file.name,
                ],
            )
            .await?
            .query(&query)
            .body(handle);
        self.send_json(builder, "upload").await
    }
}
