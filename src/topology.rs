//! Topology change driver.
//!
//! Every change follows the same path:
//!
//! 1. build a [`TopologyChangeRequest`] and check it against the current
//!    [`ClusterState`] (known members, monotonic partition count)
//! 2. optionally dry-run it and log the planned operations
//! 3. submit it for real; anything but 202 with a change id fails fast
//! 4. poll `GET /actuator/cluster` until the change settled
//!
//! A change that does not settle within its budget is left outstanding and
//! surfaced as [`OrchestratorError::ConvergenceTimeout`]. Nothing is rolled
//! back.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::control::{
    ChangeStatus, ClusterState, ControlPlane, PatchOptions, PlannedChange, TopologyChangeRequest,
    TopologyChangeResponse,
};
use crate::error::{OrchestratorError, Result};
use crate::metrics;
use crate::poller::{ErrorTolerance, Poll, PollPolicy, await_condition};
use crate::readiness::ReadyBrokers;
use crate::types::{Endpoint, NodeId};

/// How brokers leave the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMode {
    /// Brokers hand their partitions over before leaving.
    Graceful,
    /// The brokers are known to be unreachable (their region's workload is
    /// gone); partitions are force-reconfigured around them. Using this on
    /// reachable brokers risks data loss.
    ForceUnreachable,
}

/// Result of a converged change.
#[derive(Debug, Clone)]
pub struct ChangeOutcome {
    pub change_id: i64,
    pub planned: Vec<PlannedChange>,
    /// Dry-run answer, when previews are enabled.
    pub preview: Option<TopologyChangeResponse>,
    pub final_state: ClusterState,
}

#[derive(Debug, Clone, Copy)]
struct DriverSettings {
    dry_run: bool,
    broker_poll: PollPolicy,
    partition_poll: PollPolicy,
}

/// Submits topology changes and waits for them to settle.
#[derive(Clone)]
pub struct TopologyDriver {
    control: Arc<dyn ControlPlane>,
    settings: DriverSettings,
}

impl std::fmt::Debug for TopologyDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyDriver")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TopologyDriver {
    pub fn new(control: Arc<dyn ControlPlane>, config: &OrchestratorConfig) -> Self {
        Self {
            control,
            settings: DriverSettings {
                dry_run: config.dry_run,
                broker_poll: config.broker_change_poll(),
                partition_poll: config.partition_change_poll(),
            },
        }
    }

    pub fn control(&self) -> &Arc<dyn ControlPlane> {
        &self.control
    }

    /// Admit brokers that passed the readiness gate.
    #[instrument(skip_all, fields(endpoint = %management, brokers = ready.len()))]
    pub async fn add_brokers(&self, management: &Endpoint, ready: &ReadyBrokers) -> Result<ChangeOutcome> {
        let ids = self.admissible(management, ready).await?;
        let request = TopologyChangeRequest::add_brokers(ids);
        self.submit("add_brokers", management, &request, false, self.settings.broker_poll)
            .await
    }

    /// Remove brokers from the cluster.
    #[instrument(skip_all, fields(endpoint = %management, ?mode))]
    pub async fn remove_brokers(
        &self,
        management: &Endpoint,
        ids: &[NodeId],
        mode: RemovalMode,
    ) -> Result<ChangeOutcome> {
        if ids.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "no brokers to remove".to_string(),
            ));
        }
        let state = self.control.get_cluster_state(management).await?;
        let members = state.member_ids();
        let unknown: Vec<String> = ids
            .iter()
            .filter(|id| !members.contains(id))
            .map(|id| id.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "brokers [{}] are not cluster members",
                unknown.join(",")
            )));
        }
        if ids.len() >= members.len() {
            return Err(OrchestratorError::InvalidRequest(
                "removing every broker would leave an empty cluster".to_string(),
            ));
        }

        let force = mode == RemovalMode::ForceUnreachable;
        if force {
            warn!(brokers = ?ids, "Force-removing brokers assumed unreachable");
        }
        let request = TopologyChangeRequest::remove_brokers(ids.iter().copied());
        self.submit("remove_brokers", management, &request, force, self.settings.broker_poll)
            .await
    }

    /// Grow the partition count and/or change the replication factor.
    #[instrument(skip_all, fields(endpoint = %management, count = count, replication_factor = replication_factor))]
    pub async fn resize_partitions(
        &self,
        management: &Endpoint,
        count: u32,
        replication_factor: u32,
    ) -> Result<ChangeOutcome> {
        self.check_partition_count(management, Some(count)).await?;
        let request = TopologyChangeRequest::resize_partitions(Some(count), Some(replication_factor));
        self.submit("resize_partitions", management, &request, false, self.settings.partition_poll)
            .await
    }

    /// Admit brokers and change partitions in a single change.
    #[instrument(skip_all, fields(endpoint = %management, brokers = ready.len(), ?count, ?replication_factor))]
    pub async fn add_brokers_and_resize(
        &self,
        management: &Endpoint,
        ready: &ReadyBrokers,
        count: Option<u32>,
        replication_factor: Option<u32>,
    ) -> Result<ChangeOutcome> {
        let ids = self.admissible(management, ready).await?;
        self.check_partition_count(management, count).await?;
        let request = TopologyChangeRequest::add_brokers(ids).with_partitions(count, replication_factor);
        self.submit(
            "add_brokers_and_resize",
            management,
            &request,
            false,
            self.settings.partition_poll,
        )
        .await
    }

    /// Wait for `change_id` to settle.
    ///
    /// Transient read errors count as "not yet". A change that ends FAILED
    /// or CANCELLED is fatal immediately. A forced change is settled only
    /// once no force reconfiguration is pending.
    pub async fn await_change(
        &self,
        management: &Endpoint,
        change_id: i64,
        forced: bool,
        policy: PollPolicy,
    ) -> Result<ClusterState> {
        let control = self.control.as_ref();
        let what = format!("topology change {change_id}");
        let result = await_condition(&what, policy, ErrorTolerance::TolerateTransient, || async move {
            let state = control.get_cluster_state(management).await?;
            if let Some(last) = state.last_change.as_ref().filter(|c| c.id == change_id) {
                if matches!(last.status, ChangeStatus::Failed | ChangeStatus::Cancelled) {
                    return Err(OrchestratorError::ChangeFailed {
                        change_id,
                        status: last.status.to_string(),
                    });
                }
            }
            let reached = state.last_change.as_ref().is_some_and(|c| c.id >= change_id);
            if state.is_settled() && reached && !(forced && state.has_pending_force_reconfigure()) {
                Ok(Poll::Ready(state))
            } else {
                Ok(Poll::Pending(state.describe()))
            }
        })
        .await;

        if let Err(e) = &result {
            error!(change_id, error = %e, "Topology change did not settle; left outstanding for investigation");
        }
        result
    }

    async fn admissible(&self, management: &Endpoint, ready: &ReadyBrokers) -> Result<Vec<NodeId>> {
        if ready.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "no brokers to add".to_string(),
            ));
        }
        let members = self.control.get_cluster_state(management).await?.member_ids();
        let present: BTreeSet<NodeId> = ready.ids().filter(|id| members.contains(id)).collect();
        if !present.is_empty() {
            let listed: Vec<String> = present.iter().map(|id| id.to_string()).collect();
            return Err(OrchestratorError::InvalidRequest(format!(
                "brokers [{}] are already cluster members",
                listed.join(",")
            )));
        }
        Ok(ready.ids().collect())
    }

    async fn check_partition_count(&self, management: &Endpoint, count: Option<u32>) -> Result<()> {
        let Some(count) = count else {
            return Ok(());
        };
        let current = self.control.get_cluster_state(management).await?.partition_count();
        if count < current {
            return Err(OrchestratorError::InvalidRequest(format!(
                "partition count cannot decrease: requested {count}, cluster has {current}"
            )));
        }
        Ok(())
    }

    async fn submit(
        &self,
        kind: &'static str,
        management: &Endpoint,
        request: &TopologyChangeRequest,
        force: bool,
        policy: PollPolicy,
    ) -> Result<ChangeOutcome> {
        request.validate()?;

        let preview = if self.settings.dry_run {
            let preview = self
                .control
                .patch_topology(management, request, PatchOptions::dry_run().with_force(force))
                .await
                .inspect_err(|_| metrics::record_topology_change(kind, "dry_run_rejected"))?;
            info!(kind, planned = ?preview.operations(), "Dry run planned");
            Some(preview)
        } else {
            None
        };

        let response = self
            .control
            .patch_topology(management, request, PatchOptions::apply().with_force(force))
            .await
            .inspect_err(|_| metrics::record_topology_change(kind, "rejected"))?;
        let Some(change_id) = response.change_id else {
            metrics::record_topology_change(kind, "rejected");
            return Err(OrchestratorError::Rejected {
                operation: "patch topology",
                endpoint: management.to_string(),
                status: 202,
                body: "accepted without a changeId".to_string(),
            });
        };
        metrics::record_topology_change(kind, "accepted");
        info!(kind, change_id, planned = response.planned_changes.len(), "Topology change accepted");

        let final_state = self
            .await_change(management, change_id, force, policy)
            .await
            .inspect_err(|_| metrics::record_topology_change(kind, "not_converged"))?;
        metrics::record_topology_change(kind, "converged");
        info!(kind, change_id, members = final_state.member_ids().len(), "Topology change completed");

        Ok(ChangeOutcome {
            change_id,
            planned: response.planned_changes,
            preview,
            final_state,
        })
    }
}
