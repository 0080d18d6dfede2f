//! Search store snapshot/restore seam.
//!
//! The failback procedure copies the healthy region's search data into the
//! recovering region: register a snapshot repository on a shared bucket,
//! snapshot, confirm the snapshot is listed with no failed shards, restore,
//! then wait for green health. [`BackupStore`] is the wire contract,
//! [`HttpBackupStore`] speaks it to the store's REST API.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::constants::{BACKUP_BASE_PATH, BACKUP_CLIENT, CLUSTER_HEALTH_PATH, SNAPSHOT_PATH};
use crate::error::{OrchestratorError, Result};
use crate::http::{HttpResponse, HttpTransport, HyperTransport, Method};
use crate::poller::{ErrorTolerance, Poll, PollPolicy, await_condition};
use crate::types::Endpoint;

// =============================================================================
// Types
// =============================================================================

/// Snapshot repository registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySettings {
    pub name: String,
    pub bucket: String,
    pub client: String,
    pub base_path: String,
}

impl RepositorySettings {
    /// Repository for `cluster_name` as configured: bucket defaults to
    /// `{cluster}-elastic-backup`.
    pub fn for_cluster(config: &OrchestratorConfig, cluster_name: &str) -> Self {
        Self {
            name: config.backup_repository.clone(),
            bucket: config.backup_bucket_for(cluster_name),
            client: BACKUP_CLIENT.to_string(),
            base_path: BACKUP_BASE_PATH.to_string(),
        }
    }

    fn body(&self) -> RepositoryBody<'_> {
        RepositoryBody {
            kind: "s3",
            settings: RepositoryBodySettings {
                bucket: &self.bucket,
                client: &self.client,
                base_path: &self.base_path,
            },
        }
    }
}

#[derive(Serialize)]
struct RepositoryBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    settings: RepositoryBodySettings<'a>,
}

#[derive(Serialize)]
struct RepositoryBodySettings<'a> {
    bucket: &'a str,
    client: &'a str,
    base_path: &'a str,
}

/// A listed, created or restored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub name: String,
    pub total_shards: u32,
    pub failed_shards: u32,
    pub state: Option<String>,
}

impl BackupRecord {
    pub fn new(name: impl Into<String>, total_shards: u32, failed_shards: u32) -> Self {
        Self {
            name: name.into(),
            total_shards,
            failed_shards,
            state: None,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.failed_shards == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub status: HealthStatus,
    #[serde(default)]
    pub timed_out: bool,
}

impl ClusterHealth {
    /// All primary and replica shards assigned.
    pub fn is_green(&self) -> bool {
        self.status == HealthStatus::Green && !self.timed_out
    }
}

#[derive(Deserialize)]
struct ShardCounts {
    #[serde(default)]
    total: u32,
    #[serde(default)]
    failed: u32,
}

#[derive(Deserialize)]
struct SnapshotInfo {
    snapshot: String,
    shards: Option<ShardCounts>,
    #[serde(default)]
    state: Option<String>,
}

impl From<SnapshotInfo> for BackupRecord {
    fn from(info: SnapshotInfo) -> Self {
        let shards = info.shards.unwrap_or(ShardCounts { total: 0, failed: 0 });
        BackupRecord {
            name: info.snapshot,
            total_shards: shards.total,
            failed_shards: shards.failed,
            state: info.state,
        }
    }
}

#[derive(Deserialize)]
struct SnapshotEnvelope {
    snapshot: SnapshotInfo,
}

#[derive(Deserialize)]
struct SnapshotListing {
    #[serde(default)]
    snapshots: Vec<SnapshotInfo>,
}

#[derive(Deserialize)]
struct Acknowledged {
    #[serde(default)]
    acknowledged: bool,
}

// =============================================================================
// Store contract
// =============================================================================

#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Register (or re-register) a snapshot repository. Idempotent.
    async fn create_repository(&self, store: &Endpoint, settings: &RepositorySettings) -> Result<()>;

    /// Take a named snapshot and wait for it to finish.
    async fn create_snapshot(&self, store: &Endpoint, repository: &str, name: &str) -> Result<BackupRecord>;

    async fn list_snapshots(&self, store: &Endpoint, repository: &str) -> Result<Vec<BackupRecord>>;

    /// Restore a named snapshot and wait for it to finish.
    async fn restore_snapshot(&self, store: &Endpoint, repository: &str, name: &str) -> Result<BackupRecord>;

    async fn cluster_health(&self, store: &Endpoint) -> Result<ClusterHealth>;
}

/// [`BackupStore`] over the search store's REST API.
#[derive(Clone)]
pub struct HttpBackupStore {
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for HttpBackupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackupStore").finish_non_exhaustive()
    }
}

impl HttpBackupStore {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(Arc::new(HyperTransport::new(config.http_timeout)))
    }

    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        store: &Endpoint,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<HttpResponse> {
        let url = store.url(path);
        let response = self.transport.send(method, &url, body).await?;
        if response.status == 200 {
            Ok(response)
        } else {
            Err(OrchestratorError::from_status(operation, url, response.status, response.text()))
        }
    }
}

#[async_trait]
impl BackupStore for HttpBackupStore {
    async fn create_repository(&self, store: &Endpoint, settings: &RepositorySettings) -> Result<()> {
        let body = serde_json::to_vec(&settings.body())
            .map_err(|e| OrchestratorError::InvalidRequest(format!("cannot encode repository: {e}")))?;
        let path = format!("{SNAPSHOT_PATH}/{}", settings.name);
        let response = self
            .call("create snapshot repository", Method::PUT, store, &path, Some(body.into()))
            .await?;
        let ack: Acknowledged = response.json(&store.to_string())?;
        if !ack.acknowledged {
            return Err(OrchestratorError::Rejected {
                operation: "create snapshot repository",
                endpoint: store.url(&path),
                status: response.status,
                body: response.text(),
            });
        }
        Ok(())
    }

    async fn create_snapshot(&self, store: &Endpoint, repository: &str, name: &str) -> Result<BackupRecord> {
        let path = format!("{SNAPSHOT_PATH}/{repository}/{name}?wait_for_completion=true");
        let response = self.call("create snapshot", Method::PUT, store, &path, None).await?;
        let envelope: SnapshotEnvelope = response.json(&store.to_string())?;
        Ok(envelope.snapshot.into())
    }

    async fn list_snapshots(&self, store: &Endpoint, repository: &str) -> Result<Vec<BackupRecord>> {
        let path = format!("{SNAPSHOT_PATH}/{repository}/_all");
        let response = self.call("list snapshots", Method::GET, store, &path, None).await?;
        let listing: SnapshotListing = response.json(&store.to_string())?;
        Ok(listing.snapshots.into_iter().map(BackupRecord::from).collect())
    }

    async fn restore_snapshot(&self, store: &Endpoint, repository: &str, name: &str) -> Result<BackupRecord> {
        let path = format!("{SNAPSHOT_PATH}/{repository}/{name}/_restore?wait_for_completion=true");
        let response = self.call("restore snapshot", Method::POST, store, &path, None).await?;
        let envelope: SnapshotEnvelope = response.json(&store.to_string())?;
        Ok(envelope.snapshot.into())
    }

    async fn cluster_health(&self, store: &Endpoint) -> Result<ClusterHealth> {
        let response = self
            .call("cluster health", Method::GET, store, CLUSTER_HEALTH_PATH, None)
            .await?;
        response.json(&store.to_string())
    }
}

// =============================================================================
// Checked steps
// =============================================================================

/// Take a snapshot; any failed shard is an invariant violation.
pub async fn take_snapshot(
    backups: &dyn BackupStore,
    store: &Endpoint,
    repository: &str,
    name: &str,
) -> Result<BackupRecord> {
    let record = backups.create_snapshot(store, repository, name).await?;
    if !record.is_successful() {
        return Err(OrchestratorError::invariant(
            "snapshot-successful",
            format!("snapshot {name} finished with {} failed shards", record.failed_shards),
        ));
    }
    info!(%store, snapshot = name, shards = record.total_shards, "Snapshot taken");
    Ok(record)
}

/// Wait until `name` is listed with no failed shards.
///
/// An empty listing re-registers the repository before the next attempt;
/// stale repository state after repeated create/delete cycles shows up that way.
pub async fn verify_present(
    backups: &dyn BackupStore,
    store: &Endpoint,
    settings: &RepositorySettings,
    name: &str,
    policy: PollPolicy,
) -> Result<BackupRecord> {
    let what = format!("snapshot {name} listed");
    let result = await_condition(&what, policy, ErrorTolerance::TolerateTransient, || async move {
        let listed = backups.list_snapshots(store, &settings.name).await?;
        if listed.is_empty() {
            warn!(%store, repository = %settings.name, "Snapshot listing empty, re-registering repository");
            backups.create_repository(store, settings).await?;
            return Ok(Poll::Pending("listing empty; repository re-registered".to_string()));
        }
        match listed.into_iter().find(|r| r.name == name) {
            Some(record) if record.is_successful() => Ok(Poll::Ready(record)),
            Some(record) => Err(OrchestratorError::invariant(
                "snapshot-successful",
                format!("snapshot {name} lists {} failed shards", record.failed_shards),
            )),
            None => Ok(Poll::Pending(format!("{name} not in listing"))),
        }
    })
    .await;

    match result {
        Err(OrchestratorError::ConvergenceTimeout { last_observed, .. }) => Err(OrchestratorError::invariant(
            "snapshot-present",
            format!("snapshot {name} never listed in {}: {last_observed}", settings.name),
        )),
        other => other,
    }
}

/// Restore a snapshot; any failed shard is an invariant violation.
pub async fn restore(
    backups: &dyn BackupStore,
    store: &Endpoint,
    repository: &str,
    name: &str,
) -> Result<BackupRecord> {
    let record = backups.restore_snapshot(store, repository, name).await?;
    if !record.is_successful() {
        return Err(OrchestratorError::invariant(
            "restore-successful",
            format!("restore of {name} finished with {} failed shards", record.failed_shards),
        ));
    }
    info!(%store, snapshot = name, "Snapshot restored");
    Ok(record)
}

/// Wait for green health without a timed-out health call.
pub async fn await_healthy(backups: &dyn BackupStore, store: &Endpoint, policy: PollPolicy) -> Result<ClusterHealth> {
    await_condition("search store green", policy, ErrorTolerance::TolerateTransient, || async move {
        let health = backups.cluster_health(store).await?;
        if health.is_green() {
            Ok(Poll::Ready(health))
        } else {
            Ok(Poll::Pending(format!("status {:?}, timed_out {}", health.status, health.timed_out)))
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::mock::{MockBackupStore, MockTransport};
    use std::time::Duration;

    fn store() -> Endpoint {
        Endpoint::new("127.0.0.1", 9200)
    }

    fn settings() -> RepositorySettings {
        RepositorySettings::for_cluster(&OrchestratorConfig::default(), "cluster-london")
    }

    fn policy() -> PollPolicy {
        PollPolicy::new(10, Duration::from_secs(10))
    }

    #[test]
    fn test_repository_settings_from_config() {
        let settings = settings();
        assert_eq!(settings.name, "camunda_backup");
        assert_eq!(settings.bucket, "cluster-london-elastic-backup");

        let config = OrchestratorConfig {
            backup_bucket: Some("shared-bucket".to_string()),
            ..OrchestratorConfig::default()
        };
        assert_eq!(RepositorySettings::for_cluster(&config, "x").bucket, "shared-bucket");
    }

    #[tokio::test]
    async fn test_http_create_repository_body_and_ack() {
        let transport = Arc::new(MockTransport::new());
        transport.push(200, r#"{"acknowledged":true}"#);
        transport.push(200, r#"{"acknowledged":false}"#);
        let backups = HttpBackupStore::new(transport.clone());

        backups.create_repository(&store(), &settings()).await.unwrap();
        let sent = &transport.requests()[0];
        assert_eq!(sent.method, Method::PUT);
        assert_eq!(sent.url, "http://127.0.0.1:9200/_snapshot/camunda_backup");
        assert_eq!(
            sent.body.as_deref(),
            Some(r#"{"type":"s3","settings":{"bucket":"cluster-london-elastic-backup","client":"camunda","base_path":"backups"}}"#)
        );

        let err = backups.create_repository(&store(), &settings()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Acceptance);
    }

    #[tokio::test]
    async fn test_http_snapshot_listing_and_health() {
        let transport = Arc::new(MockTransport::new());
        transport.push(
            200,
            r#"{"snapshot":{"snapshot":"failback","indices":["a"],"shards":{"total":6,"failed":0,"successful":6}}}"#,
        );
        transport.push(
            200,
            r#"{"snapshots":[{"snapshot":"failback","state":"SUCCESS","shards":{"total":6,"failed":0,"successful":6}}]}"#,
        );
        transport.push(200, r#"{"cluster_name":"x","status":"yellow","timed_out":false}"#);
        let backups = HttpBackupStore::new(transport.clone());

        let created = backups.create_snapshot(&store(), "camunda_backup", "failback").await.unwrap();
        assert_eq!(created, BackupRecord::new("failback", 6, 0));

        let listed = backups.list_snapshots(&store(), "camunda_backup").await.unwrap();
        assert_eq!(listed[0].state.as_deref(), Some("SUCCESS"));

        let health = backups.cluster_health(&store()).await.unwrap();
        assert_eq!(health.status, HealthStatus::Yellow);
        assert!(!health.is_green());

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert!(urls[0].ends_with("/_snapshot/camunda_backup/failback?wait_for_completion=true"));
        assert!(urls[1].ends_with("/_snapshot/camunda_backup/_all"));
        assert!(urls[2].ends_with("/_cluster/health"));
    }

    #[tokio::test]
    async fn test_http_restore_path() {
        let transport = Arc::new(MockTransport::new());
        transport.push(200, r#"{"snapshot":{"snapshot":"failback","shards":{"total":6,"failed":1,"successful":5}}}"#);
        let backups = HttpBackupStore::new(transport.clone());
        let err = restore(&backups, &store(), "camunda_backup", "failback").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvariantViolation);
        let sent = &transport.requests()[0];
        assert_eq!(sent.method, Method::POST);
        assert!(sent.url.ends_with("/_snapshot/camunda_backup/failback/_restore?wait_for_completion=true"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_present_recreates_repository_on_empty_listing() {
        let backups = MockBackupStore::new();
        backups.create_repository(&store(), &settings()).await.unwrap();
        take_snapshot(&backups, &store(), "camunda_backup", "failback").await.unwrap();
        backups.empty_listings(2);

        let record = verify_present(&backups, &store(), &settings(), "failback", policy())
            .await
            .unwrap();
        assert!(record.is_successful());
        assert_eq!(backups.repository_registrations(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_snapshot_is_invariant_violation() {
        let backups = MockBackupStore::new();
        backups.create_repository(&store(), &settings()).await.unwrap();
        take_snapshot(&backups, &store(), "camunda_backup", "other").await.unwrap();

        let err = verify_present(&backups, &store(), &settings(), "failback", policy())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvariantViolation);
        assert!(err.to_string().contains("never listed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_shards_fail_snapshot() {
        let backups = MockBackupStore::new();
        backups.create_repository(&store(), &settings()).await.unwrap();
        backups.fail_shards_on_next_snapshot(2);
        let err = take_snapshot(&backups, &store(), "camunda_backup", "failback")
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvariantViolation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_healthy_waits_for_green() {
        let backups = MockBackupStore::new();
        backups.script_health(
            &store(),
            [HealthStatus::Red, HealthStatus::Yellow, HealthStatus::Green],
        );
        let start = tokio::time::Instant::now();
        let health = await_healthy(&backups, &store(), policy()).await.unwrap();
        assert!(health.is_green());
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }
}
