//! Centralized wire and operational constants.
//!
//! # Categories
//!
//! - **Control Plane Routes**: management and gateway REST paths
//! - **Planned Operations**: operation names the control plane plans
//! - **Search Store Routes**: snapshot and health paths
//! - **Default Timing**: attempt budgets and intervals used by [`crate::config`]
//! - **Deployment**: release naming and environment slots

// =============================================================================
// Control Plane Routes
// =============================================================================

/// Default management (actuator) port of a broker.
pub const MANAGEMENT_PORT: u16 = 9600;

/// Default gateway REST port.
pub const GATEWAY_REST_PORT: u16 = 8080;

/// Default search store HTTP port.
pub const DATA_STORE_PORT: u16 = 9200;

/// Cluster topology change and state endpoint (PATCH / GET).
pub const CLUSTER_PATH: &str = "/actuator/cluster";

/// Prefix for per-exporter enable/disable endpoints.
pub const EXPORTERS_PATH: &str = "/actuator/exporters";

/// Pause exporting on all partitions.
pub const EXPORTING_PAUSE_PATH: &str = "/actuator/exporting/pause";

/// Resume exporting on all partitions.
pub const EXPORTING_RESUME_PATH: &str = "/actuator/exporting/resume";

/// Gateway topology read endpoint.
pub const TOPOLOGY_PATH: &str = "/v2/topology";

// =============================================================================
// Planned Operations
// =============================================================================

pub const OP_BROKER_ADD: &str = "BROKER_ADD";
pub const OP_BROKER_REMOVE: &str = "BROKER_REMOVE";
pub const OP_PARTITION_JOIN: &str = "PARTITION_JOIN";
pub const OP_PARTITION_LEAVE: &str = "PARTITION_LEAVE";
pub const OP_PARTITION_BOOTSTRAP: &str = "PARTITION_BOOTSTRAP";
pub const OP_PARTITION_FORCE_RECONFIGURE: &str = "PARTITION_FORCE_RECONFIGURE";
pub const OP_PARTITION_DISABLE_EXPORTER: &str = "PARTITION_DISABLE_EXPORTER";
pub const OP_PARTITION_ENABLE_EXPORTER: &str = "PARTITION_ENABLE_EXPORTER";

// =============================================================================
// Search Store Routes
// =============================================================================

/// Snapshot repository root.
pub const SNAPSHOT_PATH: &str = "/_snapshot";

/// Search store cluster health.
pub const CLUSTER_HEALTH_PATH: &str = "/_cluster/health";

/// Default snapshot repository name.
pub const DEFAULT_BACKUP_REPOSITORY: &str = "camunda_backup";

/// Default snapshot name.
pub const DEFAULT_BACKUP_NAME: &str = "failback";

/// Credentials client name registered in the search store keystore.
pub const BACKUP_CLIENT: &str = "camunda";

/// Path inside the bucket where snapshots are written.
pub const BACKUP_BASE_PATH: &str = "backups";

/// Suffix appended to the cluster name to form the bucket name.
pub const BACKUP_BUCKET_SUFFIX: &str = "-elastic-backup";

// =============================================================================
// Default Timing
// =============================================================================

/// Interval between poll attempts.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Broker add/remove budget: 40 x 15s = 10 minutes.
pub const DEFAULT_BROKER_CHANGE_MAX_ATTEMPTS: u32 = 40;

/// Partition resize (alone or combined) budget: 60 x 15s = 15 minutes.
pub const DEFAULT_PARTITION_CHANGE_MAX_ATTEMPTS: u32 = 60;

pub const DEFAULT_EXPORTER_DISABLE_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_EXPORTER_ENABLE_MAX_ATTEMPTS: u32 = 30;

/// Pause/resume exporting: attempts and fixed delay.
pub const DEFAULT_EXPORTING_RETRY_ATTEMPTS: u32 = 10;
pub const DEFAULT_EXPORTING_RETRY_DELAY_SECS: u64 = 30;

/// Member readiness: 20 x 15s.
pub const DEFAULT_READINESS_MAX_ATTEMPTS: u32 = 20;

/// Tunnel acquisition: attempts and fixed delay.
pub const DEFAULT_TUNNEL_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_TUNNEL_RETRY_DELAY_SECS: u64 = 15;

/// Budget for the cluster to settle after exporter changes.
pub const DEFAULT_SETTLE_MAX_ATTEMPTS: u32 = 20;
pub const DEFAULT_SETTLE_INTERVAL_SECS: u64 = 10;

/// Backup presence and search store health checks.
pub const DEFAULT_BACKUP_CHECK_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_BACKUP_CHECK_INTERVAL_SECS: u64 = 10;

/// Per-request HTTP timeout.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// How long a spawned port-forward may take to print its local address.
pub const PORT_FORWARD_READY_TIMEOUT_SECS: u64 = 10;

/// Status codes accepted for a dry-run topology change.
pub const DEFAULT_DRY_RUN_ACCEPTED_STATUSES: &[u16] = &[200, 202];

pub const DEFAULT_REPLICATION_FACTOR: u32 = 4;

// =============================================================================
// Deployment
// =============================================================================

/// Default release name.
pub const DEFAULT_RELEASE_NAME: &str = "camunda";

/// Default number of brokers per region.
pub const DEFAULT_BROKERS_PER_REGION: u32 = 4;

/// Default exporter id prefix; region index is appended.
pub const DEFAULT_EXPORTER_PREFIX: &str = "camundaregion";

/// Broker cluster (raft) port used in initial contact points.
pub const BROKER_CLUSTER_PORT: u16 = 26502;

/// First index of the orchestration env list owned by this crate.
///
/// Lower indices are taken by the chart's base values.
pub const RELEASE_ENV_BASE_INDEX: usize = 10;

pub const ENV_INITIAL_CONTACT_POINTS: &str = "ZEEBE_BROKER_CLUSTER_INITIALCONTACTPOINTS";
pub const ENV_SCHEMA_CREATION: &str = "CAMUNDA_DATABASE_SCHEMAMANAGER_CREATESCHEMA";
