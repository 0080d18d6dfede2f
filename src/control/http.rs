use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument};

use super::ControlPlane;
use super::model::{
    ClusterState, ClusterTopology, DesiredExporterState, EnableExporterRequest, ExporterState,
    ExportingAction, PatchOptions, TopologyChangeRequest, TopologyChangeResponse,
};
use crate::config::OrchestratorConfig;
use crate::constants::{
    CLUSTER_PATH, EXPORTERS_PATH, EXPORTING_PAUSE_PATH, EXPORTING_RESUME_PATH, TOPOLOGY_PATH,
};
use crate::error::{OrchestratorError, Result};
use crate::http::{HttpResponse, HttpTransport, HyperTransport, Method};
use crate::types::{Endpoint, ExporterId};

const STATUS_OK: u16 = 200;
const STATUS_ACCEPTED: u16 = 202;

/// [`ControlPlane`] over the management and gateway REST APIs.
#[derive(Clone)]
pub struct HttpControlClient {
    transport: Arc<dyn HttpTransport>,
    dry_run_accepted: BTreeSet<u16>,
}

impl std::fmt::Debug for HttpControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpControlClient")
            .field("dry_run_accepted", &self.dry_run_accepted)
            .finish_non_exhaustive()
    }
}

impl HttpControlClient {
    pub fn new(transport: Arc<dyn HttpTransport>, dry_run_accepted: BTreeSet<u16>) -> Self {
        Self {
            transport,
            dry_run_accepted,
        }
    }

    /// hyper transport with the configured timeout and dry-run statuses.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            Arc::new(HyperTransport::new(config.http_timeout)),
            config.dry_run_accepted_statuses.clone(),
        )
    }

    async fn exchange(
        &self,
        operation: &'static str,
        method: Method,
        endpoint: &Endpoint,
        path: &str,
        body: Option<Bytes>,
        accepted: impl Fn(u16) -> bool,
    ) -> Result<HttpResponse> {
        let url = endpoint.url(path);
        let response = self
            .transport
            .send(method, &url, body)
            .await
            .map_err(|e| match e {
                OrchestratorError::Unavailable {
                    endpoint,
                    status,
                    reason,
                    ..
                } => OrchestratorError::Unavailable {
                    operation,
                    endpoint,
                    status,
                    reason,
                },
                other => other,
            })?;
        if accepted(response.status) {
            Ok(response)
        } else {
            Err(OrchestratorError::from_status(
                operation,
                url,
                response.status,
                response.text(),
            ))
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| OrchestratorError::InvalidRequest(format!("cannot encode request: {e}")))
}

#[async_trait]
impl ControlPlane for HttpControlClient {
    async fn get_topology(&self, gateway: &Endpoint) -> Result<ClusterTopology> {
        let response = self
            .exchange("get topology", Method::GET, gateway, TOPOLOGY_PATH, None, |s| {
                s == STATUS_OK
            })
            .await?;
        response.json(&gateway.to_string())
    }

    async fn get_cluster_state(&self, management: &Endpoint) -> Result<ClusterState> {
        let response = self
            .exchange("get cluster state", Method::GET, management, CLUSTER_PATH, None, |s| {
                s == STATUS_OK
            })
            .await?;
        response.json(&management.to_string())
    }

    #[instrument(skip_all, fields(endpoint = %management, dry_run = options.dry_run, force = options.force))]
    async fn patch_topology(
        &self,
        management: &Endpoint,
        request: &TopologyChangeRequest,
        options: PatchOptions,
    ) -> Result<TopologyChangeResponse> {
        request.validate()?;
        let body = encode(request)?;
        let path = format!("{CLUSTER_PATH}{}", options.query());
        let operation = if options.dry_run {
            "dry-run topology change"
        } else {
            "patch topology"
        };
        let dry_run_accepted = &self.dry_run_accepted;
        let response = self
            .exchange(operation, Method::PATCH, management, &path, Some(body), |s| {
                if options.dry_run {
                    dry_run_accepted.contains(&s)
                } else {
                    s == STATUS_ACCEPTED
                }
            })
            .await?;
        debug!(status = response.status, "Topology change answered");
        response.json(&management.to_string())
    }

    async fn set_exporter_state(
        &self,
        management: &Endpoint,
        exporter: &ExporterId,
        desired: DesiredExporterState,
        initialize_from: Option<&ExporterId>,
    ) -> Result<TopologyChangeResponse> {
        let path = format!("{EXPORTERS_PATH}/{exporter}/{}", desired.path_segment());
        let body = match (desired, initialize_from) {
            (DesiredExporterState::Enable, Some(source)) => Some(encode(&EnableExporterRequest {
                initialize_from: Some(source.clone()),
            })?),
            (DesiredExporterState::Disable, Some(_)) => {
                return Err(OrchestratorError::InvalidRequest(
                    "initializeFrom only applies to enable".to_string(),
                ));
            }
            (_, None) => None,
        };
        let operation = match desired {
            DesiredExporterState::Enable => "enable exporter",
            DesiredExporterState::Disable => "disable exporter",
        };
        let response = self
            .exchange(operation, Method::POST, management, &path, body, |s| {
                s == STATUS_ACCEPTED
            })
            .await?;
        response.json(&management.to_string())
    }

    async fn get_exporter_states(&self, management: &Endpoint) -> Result<Vec<ExporterState>> {
        let response = self
            .exchange("list exporters", Method::GET, management, EXPORTERS_PATH, None, |s| {
                s == STATUS_OK
            })
            .await?;
        response.json(&management.to_string())
    }

    async fn set_exporting(&self, management: &Endpoint, action: ExportingAction) -> Result<()> {
        let (operation, path) = match action {
            ExportingAction::Pause => ("pause exporting", EXPORTING_PAUSE_PATH),
            ExportingAction::Resume => ("resume exporting", EXPORTING_RESUME_PATH),
        };
        self.exchange(operation, Method::POST, management, path, None, |s| {
            (200..300).contains(&s)
        })
        .await?;
        Ok(())
    }
}
