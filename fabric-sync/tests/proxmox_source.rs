//! Proxmox SDN source against a mock API.

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fabric_sync::SyncError;
use fabric_sync::secrets::SecretStore;
use fabric_sync::source::{ProxmoxSource, StateSource};

const TIMEOUT: Duration = Duration::from_secs(5);

fn secrets_for(dir: &Path, server: &MockServer) -> SecretStore {
    let env = dir.join(".env");
    std::fs::write(
        &env,
        format!(
            "# read-only token\nPVE_HOST=http://127.0.0.1\nPVE_PORT={}\nPVE_API_USER=sync@pve\nPVE_TOKEN_NAME=ro\nPVE_TOKEN_SECRET_READ=s3cr3t\n",
            server.address().port()
        ),
    )
    .unwrap();
    SecretStore::new(env)
}

async fn mount_sdn(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api2/json/cluster/sdn/zones"))
        .and(header("Authorization", "PVEAPIToken=sync@pve!ro=s3cr3t"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "zone": "prod", "type": "vlan" },
                { "zone": "dev", "type": "vlan" },
            ]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api2/json/cluster/sdn/vnets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "vnet": "app", "zone": "prod", "tag": 100, "isolate-ports": 1, "orchestration": 1 },
                { "vnet": "db", "zone": "prod", "tag": "200", "isolate-ports": "1", "orchestration": 1 },
                { "vnet": "open", "zone": "dev", "tag": 300, "orchestration": 1 },
                { "vnet": "manual", "zone": "dev", "tag": 400, "isolate-ports": 1, "orchestration": 0 },
                { "vnet": "notag", "zone": "dev", "isolate-ports": 1, "orchestration": 1 },
            ]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn keeps_only_flagged_segments() {
    let server = MockServer::start().await;
    mount_sdn(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let source = ProxmoxSource::new(secrets_for(dir.path(), &server)).unwrap();
    let desired = source.fetch_desired_state(TIMEOUT).await.unwrap();

    assert_eq!(
        desired.zones.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["dev", "prod"]
    );
    assert_eq!(desired.segments.len(), 2);
    assert_eq!(desired.segments[&100u16].name, "app");
    assert_eq!(desired.segments[&200u16].zone, "prod");
}

#[tokio::test]
async fn missing_secret_fails_closed() {
    let server = MockServer::start().await;
    mount_sdn(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let source = ProxmoxSource::new(SecretStore::new(dir.path().join(".env"))).unwrap();
    let err = source.fetch_desired_state(TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SyncError::MissingSecret { .. }), "got {:?}", err);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn secret_is_reread_each_fetch() {
    let server = MockServer::start().await;
    mount_sdn(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let env = dir.path().join(".env");

    let source = ProxmoxSource::new(SecretStore::new(&env)).unwrap();
    assert!(source.fetch_desired_state(TIMEOUT).await.is_err());

    secrets_for(dir.path(), &server);
    assert!(source.fetch_desired_state(TIMEOUT).await.is_ok());
}

#[tokio::test]
async fn api_error_is_reported_not_partial() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api2/json/cluster/sdn/zones"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "zone": "prod" }] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api2/json/cluster/sdn/vnets"))
        .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let source = ProxmoxSource::new(secrets_for(dir.path(), &server)).unwrap();
    let err = source.fetch_desired_state(TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SyncError::Status { status: 403, .. }), "got {:?}", err);
}
