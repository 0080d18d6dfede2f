//! Cluster control client.
//!
//! [`ControlPlane`] is the typed contract of the broker management and
//! gateway APIs. [`HttpControlClient`] speaks it over HTTP;
//! `mock::MockControlPlane` simulates it in memory.
//!
//! Every call takes the endpoint explicitly. Endpoints are resolved per step
//! (possibly through a tunnel) and never cached by the client.

mod http;
mod model;

pub use http::HttpControlClient;
pub use model::{
    BrokerInfo, BrokersChange, ChangeStatus, ChangeSummary, ClusterState, ClusterTopology,
    DesiredExporterState, EnableExporterRequest, ExporterState, ExporterStatus, ExportingAction,
    MemberPartition, MemberState, PartitionHealth, PartitionInfo, PartitionRole, PartitionsChange,
    PatchOptions, PlannedChange, TopologyChangeRequest, TopologyChangeResponse,
};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Endpoint, ExporterId};

/// Broker control-plane operations.
///
/// Implementations return [`crate::error::OrchestratorError::Rejected`] for
/// statuses the operation does not accept and
/// [`crate::error::OrchestratorError::Unavailable`] for 5xx and connection
/// failures.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Read the gateway topology summary.
    async fn get_topology(&self, gateway: &Endpoint) -> Result<ClusterTopology>;

    /// Read members plus pending and last change.
    async fn get_cluster_state(&self, management: &Endpoint) -> Result<ClusterState>;

    /// Submit (or dry-run) a topology change.
    ///
    /// A real submission succeeds only on 202; a dry run succeeds on any of
    /// the configured dry-run statuses and must not modify the cluster.
    async fn patch_topology(
        &self,
        management: &Endpoint,
        request: &TopologyChangeRequest,
        options: PatchOptions,
    ) -> Result<TopologyChangeResponse>;

    /// Request an exporter enable or disable. Succeeds only on 202.
    async fn set_exporter_state(
        &self,
        management: &Endpoint,
        exporter: &ExporterId,
        desired: DesiredExporterState,
        initialize_from: Option<&ExporterId>,
    ) -> Result<TopologyChangeResponse>;

    async fn get_exporter_states(&self, management: &Endpoint) -> Result<Vec<ExporterState>>;

    /// Pause or resume exporting cluster-wide. Succeeds on any 2xx.
    async fn set_exporting(&self, management: &Endpoint, action: ExportingAction) -> Result<()>;
}
