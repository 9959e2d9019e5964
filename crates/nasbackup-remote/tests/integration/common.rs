//! Shared helpers for the NAS API integration tests

use nasbackup_core::domain::RemoteId;
use nasbackup_remote::{client::NasClient, provider::HttpRemoteDrive};
use wiremock::MockServer;

pub const TOKEN: &str = "test-token";

/// Starts a mock server and returns a provider pointing at it.
pub async fn setup_nas_mock() -> (MockServer, HttpRemoteDrive) {
    let server = MockServer::start().await;
    let client = NasClient::new(&server.uri())
        .expect("mock server uri is a valid base url")
        .with_token(TOKEN);
    (server, HttpRemoteDrive::new(client))
}

pub fn id(s: &str) -> RemoteId {
    RemoteId::new(s).unwrap()
}

/// JSON of a backup drive bound to `client_id`
pub fn drive_json(uuid: &str, client_id: &str, status: &str) -> serde_json::Value {
    serde_json::json!({
        "uuid": uuid,
        "type": "backup",
        "client": {
            "id": client_id,
            "disabled": false,
            "status": status,
            "lastBackupTime": 1_600_000_000_000_u64
        }
    })
}
