//! Control-plane wire types.
//!
//! Field names follow the camelCase JSON of the management and gateway APIs.
//! Unknown enum values decode to an `Unknown` variant instead of failing, so
//! newer control planes do not break polling.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::OP_PARTITION_FORCE_RECONFIGURE;
use crate::error::{OrchestratorError, Result};
use crate::types::{ExporterId, NodeId};

// =============================================================================
// Gateway topology (/v2/topology)
// =============================================================================

/// The gateway's view of the cluster. Refreshed on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTopology {
    pub cluster_size: u32,
    pub partitions_count: u32,
    pub replication_factor: u32,
    #[serde(default)]
    pub brokers: Vec<BrokerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_version: Option<String>,
}

impl ClusterTopology {
    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.brokers.iter().map(|b| b.node_id).collect()
    }

    /// Union of partition ids hosted by any broker.
    pub fn partition_ids(&self) -> BTreeSet<u32> {
        self.brokers
            .iter()
            .flat_map(|b| b.partitions.iter().map(|p| p.partition_id))
            .collect()
    }

    pub fn broker(&self, id: NodeId) -> Option<&BrokerInfo> {
        self.brokers.iter().find(|b| b.node_id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerInfo {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub partitions: Vec<PartitionInfo>,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub partition_id: u32,
    pub role: PartitionRole,
    pub health: PartitionHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    #[serde(alias = "LEADER")]
    Leader,
    #[serde(alias = "FOLLOWER")]
    Follower,
    #[serde(alias = "INACTIVE")]
    Inactive,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionHealth {
    #[serde(alias = "HEALTHY")]
    Healthy,
    #[serde(alias = "UNHEALTHY")]
    Unhealthy,
    #[serde(alias = "DEAD")]
    Dead,
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Topology change (PATCH /actuator/cluster)
// =============================================================================

/// Body of a topology change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyChangeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brokers: Option<BrokersChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<PartitionsChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokersChange {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionsChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<u32>,
}

impl TopologyChangeRequest {
    pub fn add_brokers(ids: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            brokers: Some(BrokersChange {
                add: ids.into_iter().collect(),
                remove: Vec::new(),
            }),
            partitions: None,
        }
    }

    pub fn remove_brokers(ids: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            brokers: Some(BrokersChange {
                add: Vec::new(),
                remove: ids.into_iter().collect(),
            }),
            partitions: None,
        }
    }

    pub fn resize_partitions(count: Option<u32>, replication_factor: Option<u32>) -> Self {
        Self {
            brokers: None,
            partitions: Some(PartitionsChange {
                count,
                replication_factor,
            }),
        }
    }

    /// Attach a partition change to this request.
    pub fn with_partitions(mut self, count: Option<u32>, replication_factor: Option<u32>) -> Self {
        self.partitions = Some(PartitionsChange {
            count,
            replication_factor,
        });
        self
    }

    pub fn changes_partitions(&self) -> bool {
        self.partitions.is_some()
    }

    /// Structural checks done before anything is sent.
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_none() && self.partitions.is_none() {
            return Err(OrchestratorError::InvalidRequest(
                "topology change must name brokers or partitions".to_string(),
            ));
        }
        if let Some(brokers) = &self.brokers {
            if brokers.add.is_empty() && brokers.remove.is_empty() {
                return Err(OrchestratorError::InvalidRequest(
                    "broker change must add or remove at least one broker".to_string(),
                ));
            }
            let added: BTreeSet<_> = brokers.add.iter().collect();
            if added.len() != brokers.add.len() {
                return Err(OrchestratorError::InvalidRequest(
                    "broker add list contains duplicates".to_string(),
                ));
            }
            if let Some(both) = brokers.remove.iter().find(|id| added.contains(id)) {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "broker {both} is both added and removed"
                )));
            }
        }
        if let Some(partitions) = &self.partitions {
            if partitions.count.is_none() && partitions.replication_factor.is_none() {
                return Err(OrchestratorError::InvalidRequest(
                    "partition change must set count or replicationFactor".to_string(),
                ));
            }
            if partitions.count == Some(0) {
                return Err(OrchestratorError::InvalidRequest(
                    "partition count must be at least 1".to_string(),
                ));
            }
            if partitions.replication_factor == Some(0) {
                return Err(OrchestratorError::InvalidRequest(
                    "replication factor must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Query flags of a topology change submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOptions {
    /// Plan only; the cluster is not modified.
    pub dry_run: bool,
    /// Force reconfiguration around unreachable brokers.
    pub force: bool,
}

impl PatchOptions {
    pub fn apply() -> Self {
        Self::default()
    }

    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Query string for the flags that are set, including the leading `?`.
    pub fn query(&self) -> String {
        let mut flags = Vec::new();
        if self.dry_run {
            flags.push("dryRun=true");
        }
        if self.force {
            flags.push("force=true");
        }
        if flags.is_empty() {
            String::new()
        } else {
            format!("?{}", flags.join("&"))
        }
    }
}

/// Answer to a topology or exporter change submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyChangeResponse {
    #[serde(default)]
    pub change_id: Option<i64>,
    #[serde(default)]
    pub planned_changes: Vec<PlannedChange>,
    #[serde(default)]
    pub status: ChangeStatus,
}

impl TopologyChangeResponse {
    pub fn plans_operation(&self, operation: &str) -> bool {
        self.planned_changes.iter().any(|c| c.operation == operation)
    }

    pub fn operations(&self) -> Vec<&str> {
        self.planned_changes.iter().map(|c| c.operation.as_str()).collect()
    }
}

/// One planned step of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedChange {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exporter_id: Option<String>,
}

impl PlannedChange {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            broker_id: None,
            partition_id: None,
            exporter_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeStatus::Pending => "PENDING",
            ChangeStatus::InProgress => "IN_PROGRESS",
            ChangeStatus::Completed => "COMPLETED",
            ChangeStatus::Failed => "FAILED",
            ChangeStatus::Cancelled => "CANCELLED",
            ChangeStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Cluster state (GET /actuator/cluster)
// =============================================================================

/// Management view of members and outstanding changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterState {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub brokers: Vec<MemberState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_change: Option<ChangeSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change: Option<ChangeSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberState {
    pub id: NodeId,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub partitions: Vec<MemberPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPartition {
    pub id: u32,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub id: i64,
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Operations still to run; only present on a pending change.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<PlannedChange>,
}

impl ClusterState {
    pub fn member_ids(&self) -> BTreeSet<NodeId> {
        self.brokers.iter().map(|b| b.id).collect()
    }

    /// Number of distinct partitions hosted by the members.
    pub fn partition_count(&self) -> u32 {
        let ids: BTreeSet<u32> = self
            .brokers
            .iter()
            .flat_map(|b| b.partitions.iter().map(|p| p.id))
            .collect();
        ids.len() as u32
    }

    /// No pending change and the last change completed.
    pub fn is_settled(&self) -> bool {
        self.pending_change.is_none()
            && self
                .last_change
                .as_ref()
                .is_some_and(|c| c.status == ChangeStatus::Completed)
    }

    /// A pending change still plans a forced reconfiguration.
    pub fn has_pending_force_reconfigure(&self) -> bool {
        self.pending_change.as_ref().is_some_and(|c| {
            c.pending
                .iter()
                .any(|op| op.operation == OP_PARTITION_FORCE_RECONFIGURE)
        })
    }

    /// Short human description for logs and timeout errors.
    pub fn describe(&self) -> String {
        let pending = match &self.pending_change {
            Some(c) => format!("pending change {} {} ({} ops left)", c.id, c.status, c.pending.len()),
            None => "no pending change".to_string(),
        };
        let last = match &self.last_change {
            Some(c) => format!("last change {} {}", c.id, c.status),
            None => "no last change".to_string(),
        };
        let members: Vec<String> = self.member_ids().iter().map(|id| id.to_string()).collect();
        format!("{pending}; {last}; members [{}]", members.join(","))
    }
}

// =============================================================================
// Exporters
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExporterStatus {
    Enabled,
    Disabled,
    Enabling,
    Disabling,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ExporterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExporterStatus::Enabled => "ENABLED",
            ExporterStatus::Disabled => "DISABLED",
            ExporterStatus::Enabling => "ENABLING",
            ExporterStatus::Disabling => "DISABLING",
            ExporterStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExporterState {
    pub exporter_id: ExporterId,
    pub status: ExporterStatus,
}

/// Target of an exporter change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredExporterState {
    Enable,
    Disable,
}

impl DesiredExporterState {
    pub fn path_segment(self) -> &'static str {
        match self {
            DesiredExporterState::Enable => "enable",
            DesiredExporterState::Disable => "disable",
        }
    }

    /// Terminal status this change converges to.
    pub fn terminal_status(self) -> ExporterStatus {
        match self {
            DesiredExporterState::Enable => ExporterStatus::Enabled,
            DesiredExporterState::Disable => ExporterStatus::Disabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableExporterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_from: Option<ExporterId>,
}

/// Cluster-wide exporting switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportingAction {
    Pause,
    Resume,
}

impl ExportingAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportingAction::Pause => "pause",
            ExportingAction::Resume => "resume",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_brokers_wire_shape() {
        let request = TopologyChangeRequest::add_brokers([8, 9, 10, 11].map(NodeId));
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"brokers":{"add":[8,9,10,11]}}"#);
    }

    #[test]
    fn test_combined_change_wire_shape() {
        let request = TopologyChangeRequest::add_brokers([1, 3, 5, 7].map(NodeId))
            .with_partitions(None, Some(4));
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"brokers":{"add":[1,3,5,7]},"partitions":{"replicationFactor":4}}"#);
    }

    #[test]
    fn test_resize_wire_shape() {
        let request = TopologyChangeRequest::resize_partitions(Some(12), Some(4));
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"partitions":{"count":12,"replicationFactor":4}}"#);
    }

    #[test]
    fn test_validate_rejects_empty_and_conflicting_requests() {
        assert!(TopologyChangeRequest::default().validate().is_err());
        assert!(TopologyChangeRequest::add_brokers([]).validate().is_err());
        assert!(TopologyChangeRequest::resize_partitions(None, None).validate().is_err());
        assert!(TopologyChangeRequest::resize_partitions(Some(0), None).validate().is_err());

        let conflicting = TopologyChangeRequest {
            brokers: Some(BrokersChange {
                add: vec![NodeId(8)],
                remove: vec![NodeId(8)],
            }),
            partitions: None,
        };
        assert!(conflicting.validate().is_err());

        let duplicate = TopologyChangeRequest::add_brokers([NodeId(8), NodeId(8)]);
        assert!(duplicate.validate().is_err());

        assert!(TopologyChangeRequest::add_brokers([NodeId(8)]).validate().is_ok());
    }

    #[test]
    fn test_patch_options_query() {
        assert_eq!(PatchOptions::apply().query(), "");
        assert_eq!(PatchOptions::dry_run().query(), "?dryRun=true");
        assert_eq!(PatchOptions::apply().with_force(true).query(), "?force=true");
        assert_eq!(
            PatchOptions::dry_run().with_force(true).query(),
            "?dryRun=true&force=true"
        );
    }

    #[test]
    fn test_decode_cluster_state() {
        let body = r#"{
            "version": 12,
            "brokers": [
                {"id": 0, "state": "ACTIVE", "partitions": [{"id": 1, "state": "ACTIVE", "priority": 3}]},
                {"id": 1, "state": "ACTIVE", "partitions": [{"id": 1, "state": "ACTIVE", "priority": 2},
                                                            {"id": 2, "state": "ACTIVE", "priority": 3}]}
            ],
            "lastChange": {"id": 5, "status": "COMPLETED", "startedAt": "2024-01-01T00:00:00Z"}
        }"#;
        let state: ClusterState = serde_json::from_str(body).unwrap();
        assert!(state.is_settled());
        assert_eq!(state.partition_count(), 2);
        assert_eq!(state.member_ids().len(), 2);
    }

    #[test]
    fn test_pending_change_is_not_settled() {
        let body = r#"{
            "brokers": [],
            "pendingChange": {"id": 6, "status": "IN_PROGRESS",
                "pending": [{"operation": "PARTITION_FORCE_RECONFIGURE", "brokerId": 0, "partitionId": 1}]},
            "lastChange": {"id": 5, "status": "COMPLETED"}
        }"#;
        let state: ClusterState = serde_json::from_str(body).unwrap();
        assert!(!state.is_settled());
        assert!(state.has_pending_force_reconfigure());
        assert!(state.describe().contains("pending change 6 IN_PROGRESS"));
    }

    #[test]
    fn test_unknown_enum_values_do_not_fail() {
        let summary: ChangeSummary =
            serde_json::from_str(r#"{"id": 1, "status": "ROLLING_BACK"}"#).unwrap();
        assert_eq!(summary.status, ChangeStatus::Unknown);

        let exporter: ExporterState =
            serde_json::from_str(r#"{"exporterId": "camundaregion1", "status": "CONFIG_ERROR"}"#)
                .unwrap();
        assert_eq!(exporter.status, ExporterStatus::Unknown);
    }

    #[test]
    fn test_decode_gateway_topology() {
        let body = r#"{
            "clusterSize": 2, "partitionsCount": 1, "replicationFactor": 2,
            "gatewayVersion": "8.6.0",
            "brokers": [
                {"nodeId": 0, "host": "camunda-zeebe-0.camunda-zeebe.ns0.svc.cluster.local", "port": 26501,
                 "partitions": [{"partitionId": 1, "role": "leader", "health": "healthy"}], "version": "8.6.0"},
                {"nodeId": 1, "host": "camunda-zeebe-0.camunda-zeebe.ns1.svc.cluster.local", "port": 26501,
                 "partitions": [{"partitionId": 1, "role": "FOLLOWER", "health": "HEALTHY"}], "version": "8.6.0"}
            ]
        }"#;
        let topology: ClusterTopology = serde_json::from_str(body).unwrap();
        assert_eq!(topology.cluster_size, 2);
        assert_eq!(topology.partition_ids().into_iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(
            topology.broker(NodeId(1)).unwrap().partitions[0].role,
            PartitionRole::Follower
        );
    }

    #[test]
    fn test_change_response_without_id_decodes() {
        let response: TopologyChangeResponse =
            serde_json::from_str(r#"{"plannedChanges": [{"operation": "BROKER_ADD", "brokerId": 8}]}"#)
                .unwrap();
        assert_eq!(response.change_id, None);
        assert!(response.plans_operation("BROKER_ADD"));
    }

    #[test]
    fn test_enable_request_wire_shape() {
        let request = EnableExporterRequest {
            initialize_from: Some(ExporterId::new("camundaregion0").unwrap()),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"initializeFrom":"camundaregion0"}"#
        );
    }
}
