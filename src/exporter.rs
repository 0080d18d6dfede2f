//! Exporter controller.
//!
//! Enable and disable are asynchronous: the control plane accepts with 202
//! and a planned `PARTITION_{ENABLE,DISABLE}_EXPORTER` operation, the
//! exporter passes through `ENABLING`/`DISABLING`, and the controller polls
//! until the terminal status shows up, then waits for the cluster's last
//! change to settle. Pause and resume act on every exporter and are retried
//! as whole calls while partition leadership is renegotiated.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::OrchestratorConfig;
use crate::constants::{OP_PARTITION_DISABLE_EXPORTER, OP_PARTITION_ENABLE_EXPORTER};
use crate::control::{ControlPlane, DesiredExporterState, ExporterState, ExporterStatus, ExportingAction};
use crate::error::{OrchestratorError, Result};
use crate::metrics;
use crate::poller::{ErrorTolerance, Poll, PollPolicy, await_condition};
use crate::retry::{self, FixedRetry};
use crate::types::{Endpoint, ExporterId};

#[derive(Clone)]
pub struct ExporterController {
    control: Arc<dyn ControlPlane>,
    disable_poll: PollPolicy,
    enable_poll: PollPolicy,
    settle_poll: PollPolicy,
    exporting_retry: FixedRetry,
}

impl std::fmt::Debug for ExporterController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterController")
            .field("disable_poll", &self.disable_poll)
            .field("enable_poll", &self.enable_poll)
            .field("settle_poll", &self.settle_poll)
            .field("exporting_retry", &self.exporting_retry)
            .finish_non_exhaustive()
    }
}

impl ExporterController {
    pub fn new(control: Arc<dyn ControlPlane>, config: &OrchestratorConfig) -> Self {
        Self {
            control,
            disable_poll: config.exporter_disable_poll(),
            enable_poll: config.exporter_enable_poll(),
            settle_poll: config.settle_poll(),
            exporting_retry: config.exporting_retry(),
        }
    }

    /// Current status of one exporter.
    pub async fn status(&self, management: &Endpoint, exporter: &ExporterId) -> Result<ExporterStatus> {
        let states = self.control.get_exporter_states(management).await?;
        find(&states, exporter)
            .map(|s| s.status)
            .ok_or_else(|| unknown_exporter(exporter, &states))
    }

    /// Disable `exporter` and wait for `DISABLED`.
    #[instrument(skip_all, fields(endpoint = %management, exporter = %exporter))]
    pub async fn disable(&self, management: &Endpoint, exporter: &ExporterId) -> Result<()> {
        self.change(management, exporter, DesiredExporterState::Disable, None)
            .await
    }

    /// Enable `exporter` and wait for `ENABLED`. With `initialize_from`, the
    /// exporter's position is seeded from that (enabled) peer.
    #[instrument(skip_all, fields(endpoint = %management, exporter = %exporter))]
    pub async fn enable(
        &self,
        management: &Endpoint,
        exporter: &ExporterId,
        initialize_from: Option<&ExporterId>,
    ) -> Result<()> {
        if initialize_from == Some(exporter) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "exporter {exporter} cannot initialize from itself"
            )));
        }
        self.change(management, exporter, DesiredExporterState::Enable, initialize_from)
            .await
    }

    /// Disable several exporters one after the other.
    pub async fn disable_many(&self, management: &Endpoint, exporters: &[ExporterId]) -> Result<()> {
        for exporter in exporters {
            self.disable(management, exporter).await?;
        }
        Ok(())
    }

    /// Pause exporting cluster-wide.
    pub async fn pause(&self, management: &Endpoint) -> Result<()> {
        self.exporting("pause-exporting", management, ExportingAction::Pause)
            .await
    }

    /// Resume exporting cluster-wide.
    pub async fn resume(&self, management: &Endpoint) -> Result<()> {
        self.exporting("resume-exporting", management, ExportingAction::Resume)
            .await
    }

    async fn exporting(
        &self,
        operation: &'static str,
        management: &Endpoint,
        action: ExportingAction,
    ) -> Result<()> {
        let control = self.control.as_ref();
        retry::with_fixed_policy(
            operation,
            self.exporting_retry,
            || async move { control.set_exporting(management, action).await },
            |e| e.is_transient(),
        )
        .await?;
        info!(%management, action = action.as_str(), "Exporting switched");
        Ok(())
    }

    async fn change(
        &self,
        management: &Endpoint,
        exporter: &ExporterId,
        desired: DesiredExporterState,
        initialize_from: Option<&ExporterId>,
    ) -> Result<()> {
        let action = desired.path_segment();
        let terminal = desired.terminal_status();

        let states = self.control.get_exporter_states(management).await?;
        let current = find(&states, exporter).ok_or_else(|| unknown_exporter(exporter, &states))?;
        if let Some(source) = initialize_from {
            match find(&states, source) {
                Some(s) if s.status == ExporterStatus::Enabled => {}
                Some(s) => {
                    return Err(OrchestratorError::InvalidRequest(format!(
                        "cannot initialize {exporter} from {source}: source is {}",
                        s.status
                    )));
                }
                None => return Err(unknown_exporter(source, &states)),
            }
        }
        if current.status == terminal {
            info!(%exporter, status = %terminal, "Exporter already in target state");
            return Ok(());
        }

        let response = self
            .control
            .set_exporter_state(management, exporter, desired, initialize_from)
            .await
            .inspect_err(|_| metrics::record_exporter_change(action, "rejected"))?;
        let expected = match desired {
            DesiredExporterState::Enable => OP_PARTITION_ENABLE_EXPORTER,
            DesiredExporterState::Disable => OP_PARTITION_DISABLE_EXPORTER,
        };
        if !response.plans_operation(expected) {
            metrics::record_exporter_change(action, "rejected");
            return Err(OrchestratorError::Rejected {
                operation: "exporter change",
                endpoint: management.to_string(),
                status: 202,
                body: format!("expected {expected}, planned {:?}", response.operations()),
            });
        }
        metrics::record_exporter_change(action, "accepted");
        info!(%exporter, action, change_id = ?response.change_id, "Exporter change accepted");

        let policy = match desired {
            DesiredExporterState::Enable => self.enable_poll,
            DesiredExporterState::Disable => self.disable_poll,
        };
        self.await_status(management, exporter, terminal, policy)
            .await
            .inspect_err(|_| metrics::record_exporter_change(action, "not_converged"))?;
        self.await_settled(management, response.change_id).await?;
        metrics::record_exporter_change(action, "converged");
        info!(%exporter, status = %terminal, "Exporter change completed");
        Ok(())
    }

    async fn await_status(
        &self,
        management: &Endpoint,
        exporter: &ExporterId,
        target: ExporterStatus,
        policy: PollPolicy,
    ) -> Result<()> {
        let control = self.control.as_ref();
        let what = format!("exporter {exporter} {target}");
        await_condition(&what, policy, ErrorTolerance::TolerateTransient, || async move {
            let states = control.get_exporter_states(management).await?;
            match find(&states, exporter) {
                Some(s) if s.status == target => Ok(Poll::Ready(())),
                Some(s) => Ok(Poll::Pending(format!("status {}", s.status))),
                None => Ok(Poll::Pending("not listed".to_string())),
            }
        })
        .await
    }

    /// Wait until the cluster has no pending change and the last one completed.
    async fn await_settled(&self, management: &Endpoint, change_id: Option<i64>) -> Result<()> {
        let control = self.control.as_ref();
        await_condition(
            "cluster settled after exporter change",
            self.settle_poll,
            ErrorTolerance::TolerateTransient,
            || async move {
                let state = control.get_cluster_state(management).await?;
                let reached = match change_id {
                    Some(id) => state.last_change.as_ref().is_some_and(|c| c.id >= id),
                    None => true,
                };
                if state.is_settled() && reached {
                    Ok(Poll::Ready(()))
                } else {
                    Ok(Poll::Pending(state.describe()))
                }
            },
        )
        .await
    }
}

fn find<'a>(states: &'a [ExporterState], exporter: &ExporterId) -> Option<&'a ExporterState> {
    states.iter().find(|s| &s.exporter_id == exporter)
}

fn unknown_exporter(exporter: &ExporterId, states: &[ExporterState]) -> OrchestratorError {
    let known: Vec<&str> = states.iter().map(|s| s.exporter_id.as_str()).collect();
    OrchestratorError::InvalidRequest(format!(
        "exporter {exporter} is not configured (known: {})",
        known.join(",")
    ))
}
