//! In-memory collaborators.
//!
//! Everything the orchestrator talks to has a simulated counterpart here:
//!
//! - [`MockTransport`] replays scripted HTTP responses
//! - [`MockControlPlane`] simulates a dual-region cluster whose changes
//!   settle after a configurable number of polls
//! - [`MockPlatform`], [`MockDeployer`] and [`MockBackupStore`] stand in for
//!   the orchestration platform, the deployment manager and the search store
//!
//! All of them record calls for assertions and accept fault injection.
//!
//! Available in unit tests and with the `test-utilities` feature:
//!
//! ```toml
//! [dev-dependencies]
//! cluster-orchestrator = { path = ".", features = ["test-utilities"] }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use crate::backup::{BackupRecord, BackupStore, ClusterHealth, HealthStatus, RepositorySettings};
use crate::constants::{
    CLUSTER_PATH, DATA_STORE_PORT, EXPORTERS_PATH, GATEWAY_REST_PORT, MANAGEMENT_PORT,
    OP_BROKER_ADD, OP_BROKER_REMOVE, OP_PARTITION_BOOTSTRAP, OP_PARTITION_DISABLE_EXPORTER,
    OP_PARTITION_ENABLE_EXPORTER, OP_PARTITION_FORCE_RECONFIGURE, OP_PARTITION_JOIN,
    OP_PARTITION_LEAVE, SNAPSHOT_PATH,
};
use crate::control::{
    BrokerInfo, ChangeStatus, ChangeSummary, ClusterState, ClusterTopology, ControlPlane,
    DesiredExporterState, ExporterState, ExporterStatus, ExportingAction, MemberPartition,
    MemberState, PartitionHealth, PartitionInfo, PartitionRole, PatchOptions, PlannedChange,
    TopologyChangeRequest, TopologyChangeResponse,
};
use crate::deployment::{Deployer, ReleaseValues};
use crate::error::{OrchestratorError, Result};
use crate::http::{HttpResponse, HttpTransport, Method};
use crate::platform::{MemberPhase, Platform, PortForward};
use crate::readiness::ReadyBrokers;
use crate::types::{Access, ClusterHandle, Endpoint, ExporterId, NodeId, RegionIndex};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// HTTP transport
// =============================================================================

/// A request seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
}

/// Replays queued responses in order. An empty queue answers as an
/// unreachable endpoint.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<HttpResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, status: u16, body: &str) {
        lock(&self.responses).push_back(Ok(HttpResponse::new(status, body.to_string())));
    }

    /// Queue a connection failure.
    pub fn push_unavailable(&self, reason: &str) {
        lock(&self.responses).push_back(Err(OrchestratorError::Unavailable {
            operation: "http request",
            endpoint: "mock".to_string(),
            status: None,
            reason: reason.to_string(),
        }));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, method: Method, url: &str, body: Option<Bytes>) -> Result<HttpResponse> {
        lock(&self.requests).push(RecordedRequest {
            method,
            url: url.to_string(),
            body: body.map(|b| String::from_utf8_lossy(&b).into_owned()),
        });
        lock(&self.responses).pop_front().unwrap_or_else(|| {
            Err(OrchestratorError::Unavailable {
                operation: "http request",
                endpoint: url.to_string(),
                status: None,
                reason: "no scripted response".to_string(),
            })
        })
    }
}

// =============================================================================
// Control plane
// =============================================================================

const MOCK_BROKER_PORT: u16 = 26501;
const MOCK_VERSION: &str = "8.6.0";

#[derive(Debug, Clone)]
enum PendingEffect {
    Topology {
        members: BTreeSet<NodeId>,
        partitions: u32,
        replication_factor: u32,
    },
    Exporter {
        exporter: ExporterId,
        status: ExporterStatus,
    },
}

#[derive(Debug, Clone)]
struct PendingSim {
    id: i64,
    effect: PendingEffect,
    polls_left: u32,
    ops: Vec<PlannedChange>,
    fails: bool,
    started_at: String,
}

#[derive(Debug)]
struct ClusterSim {
    release: String,
    namespaces: [String; 2],
    members: BTreeSet<NodeId>,
    partitions: u32,
    replication_factor: u32,
    version: i64,
    next_change_id: i64,
    pending: Option<PendingSim>,
    last_change: Option<ChangeSummary>,
    exporters: BTreeMap<ExporterId, ExporterStatus>,
    settle_polls: u32,
    exporter_polls: u32,
    misplaced: BTreeSet<NodeId>,

    healthy_reads_before_failures: u32,
    state_read_failures: u32,
    patch_rejections: VecDeque<u16>,
    omit_change_id: bool,
    fail_next_change: bool,
    exporting_failures: u32,
    exporting_paused: bool,

    patches: Vec<(TopologyChangeRequest, PatchOptions)>,
    exporter_requests: Vec<(ExporterId, DesiredExporterState, Option<ExporterId>)>,
    exporting_calls: Vec<ExportingAction>,
    state_reads: u32,
}

/// Replica placement: partition `p` on `rf` consecutive members starting at
/// `p - 1`, the first one leading.
fn distribution(members: &BTreeSet<NodeId>, partitions: u32, replication_factor: u32) -> BTreeMap<NodeId, Vec<(u32, bool)>> {
    let ids: Vec<NodeId> = members.iter().copied().collect();
    let mut placed: BTreeMap<NodeId, Vec<(u32, bool)>> = ids.iter().map(|id| (*id, Vec::new())).collect();
    if ids.is_empty() {
        return placed;
    }
    let replicas = (replication_factor as usize).min(ids.len());
    for partition in 1..=partitions {
        for k in 0..replicas {
            let id = ids[(partition as usize - 1 + k) % ids.len()];
            placed.entry(id).or_default().push((partition, k == 0));
        }
    }
    placed
}

impl ClusterSim {
    fn host(&self, id: NodeId) -> String {
        let mut region = id.region();
        if self.misplaced.contains(&id) {
            region = region.other();
        }
        let ns = &self.namespaces[region.as_u32() as usize];
        let release = &self.release;
        format!("{release}-zeebe-{}.{release}-zeebe.{ns}.svc.cluster.local", id.get() / 2)
    }

    fn cluster_state(&self) -> ClusterState {
        let placed = distribution(&self.members, self.partitions, self.replication_factor);
        ClusterState {
            version: self.version,
            brokers: placed
                .into_iter()
                .map(|(id, partitions)| MemberState {
                    id,
                    state: "ACTIVE".to_string(),
                    partitions: partitions
                        .into_iter()
                        .map(|(p, leader)| MemberPartition {
                            id: p,
                            state: "ACTIVE".to_string(),
                            priority: if leader { 2 } else { 1 },
                        })
                        .collect(),
                })
                .collect(),
            pending_change: self.pending.as_ref().map(|p| ChangeSummary {
                id: p.id,
                status: ChangeStatus::InProgress,
                started_at: Some(p.started_at.clone()),
                completed_at: None,
                pending: p.ops.clone(),
            }),
            last_change: self.last_change.clone(),
        }
    }

    fn topology(&self) -> ClusterTopology {
        let placed = distribution(&self.members, self.partitions, self.replication_factor);
        ClusterTopology {
            cluster_size: self.members.len() as u32,
            partitions_count: self.partitions,
            replication_factor: self.replication_factor,
            brokers: placed
                .into_iter()
                .map(|(id, partitions)| BrokerInfo {
                    node_id: id,
                    host: self.host(id),
                    port: MOCK_BROKER_PORT,
                    partitions: partitions
                        .into_iter()
                        .map(|(p, leader)| PartitionInfo {
                            partition_id: p,
                            role: if leader {
                                PartitionRole::Leader
                            } else {
                                PartitionRole::Follower
                            },
                            health: PartitionHealth::Healthy,
                        })
                        .collect(),
                    version: MOCK_VERSION.to_string(),
                })
                .collect(),
            gateway_version: Some(MOCK_VERSION.to_string()),
        }
    }

    /// One poll's worth of progress on the pending change.
    fn advance(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        pending.polls_left = pending.polls_left.saturating_sub(1);
        if pending.polls_left > 0 {
            return;
        }
        let Some(done) = self.pending.take() else {
            return;
        };

        let status = if done.fails {
            ChangeStatus::Failed
        } else {
            match done.effect {
                PendingEffect::Topology {
                    members,
                    partitions,
                    replication_factor,
                } => {
                    self.members = members;
                    self.partitions = partitions;
                    self.replication_factor = replication_factor;
                }
                PendingEffect::Exporter { exporter, status } => {
                    self.exporters.insert(exporter, status);
                }
            }
            self.version += 1;
            ChangeStatus::Completed
        };
        self.last_change = Some(ChangeSummary {
            id: done.id,
            status,
            started_at: Some(done.started_at),
            completed_at: Some(Utc::now().to_rfc3339()),
            pending: Vec::new(),
        });
    }

    fn start(&mut self, effect: PendingEffect, ops: Vec<PlannedChange>, polls: u32) -> i64 {
        let id = self.next_change_id;
        self.next_change_id += 1;
        self.pending = Some(PendingSim {
            id,
            effect,
            polls_left: polls.max(1),
            ops,
            fails: std::mem::take(&mut self.fail_next_change),
            started_at: Utc::now().to_rfc3339(),
        });
        id
    }

    fn plan(&self, request: &TopologyChangeRequest, force: bool) -> std::result::Result<(PendingEffect, Vec<PlannedChange>), (u16, String)> {
        if let Some(pending) = &self.pending {
            return Err((409, format!("change {} is still in progress", pending.id)));
        }
        request.validate().map_err(|e| (400, e.to_string()))?;

        let mut members = self.members.clone();
        let mut ops = Vec::new();
        if let Some(brokers) = &request.brokers {
            for id in &brokers.add {
                if !members.insert(*id) {
                    return Err((400, format!("broker {id} is already a member")));
                }
                ops.push(PlannedChange {
                    broker_id: Some(*id),
                    ..PlannedChange::new(OP_BROKER_ADD)
                });
                ops.push(PlannedChange {
                    broker_id: Some(*id),
                    ..PlannedChange::new(OP_PARTITION_JOIN)
                });
            }
            for id in &brokers.remove {
                if !members.remove(id) {
                    return Err((400, format!("broker {id} is not a member")));
                }
                if force {
                    ops.extend((1..=self.partitions).map(|p| PlannedChange {
                        broker_id: Some(*id),
                        partition_id: Some(p),
                        ..PlannedChange::new(OP_PARTITION_FORCE_RECONFIGURE)
                    }));
                } else {
                    ops.push(PlannedChange {
                        broker_id: Some(*id),
                        ..PlannedChange::new(OP_PARTITION_LEAVE)
                    });
                }
                ops.push(PlannedChange {
                    broker_id: Some(*id),
                    ..PlannedChange::new(OP_BROKER_REMOVE)
                });
            }
        }
        if members.is_empty() {
            return Err((400, "change would remove every broker".to_string()));
        }

        let mut partitions = self.partitions;
        let mut replication_factor = self.replication_factor;
        if let Some(change) = &request.partitions {
            if let Some(count) = change.count {
                if count < self.partitions {
                    return Err((400, format!("cannot decrease partitions from {} to {count}", self.partitions)));
                }
                ops.extend((self.partitions + 1..=count).map(|p| PlannedChange {
                    partition_id: Some(p),
                    ..PlannedChange::new(OP_PARTITION_BOOTSTRAP)
                }));
                partitions = count;
            }
            if let Some(rf) = change.replication_factor {
                if rf as usize > members.len() {
                    return Err((400, format!("replication factor {rf} exceeds {} brokers", members.len())));
                }
                replication_factor = rf;
            }
        }

        Ok((
            PendingEffect::Topology {
                members,
                partitions,
                replication_factor,
            },
            ops,
        ))
    }
}

/// Simulated cluster behind a [`ControlPlane`].
///
/// Endpoints are recorded but do not matter: both regions see the same
/// cluster. A submitted change settles on the `settle_polls`-th cluster-state
/// read; exporter changes also progress on exporter listings.
#[derive(Debug)]
pub struct MockControlPlane {
    sim: Mutex<ClusterSim>,
}

impl MockControlPlane {
    /// Empty cluster with the given release and region namespaces.
    pub fn new(release: &str, ns0: &str, ns1: &str) -> Self {
        Self {
            sim: Mutex::new(ClusterSim {
                release: release.to_string(),
                namespaces: [ns0.to_string(), ns1.to_string()],
                members: BTreeSet::new(),
                partitions: 0,
                replication_factor: 0,
                version: 1,
                next_change_id: 1,
                pending: None,
                last_change: Some(ChangeSummary {
                    id: 0,
                    status: ChangeStatus::Completed,
                    started_at: None,
                    completed_at: None,
                    pending: Vec::new(),
                }),
                exporters: BTreeMap::new(),
                settle_polls: 1,
                exporter_polls: 2,
                misplaced: BTreeSet::new(),
                healthy_reads_before_failures: 0,
                state_read_failures: 0,
                patch_rejections: VecDeque::new(),
                omit_change_id: false,
                fail_next_change: false,
                exporting_failures: 0,
                exporting_paused: false,
                patches: Vec::new(),
                exporter_requests: Vec::new(),
                exporting_calls: Vec::new(),
                state_reads: 0,
            }),
        }
    }

    /// `size` brokers `0..size` across `camunda-primary` and `camunda-secondary`.
    pub fn dual_region(size: u32, partitions: u32, replication_factor: u32) -> Self {
        Self::new("camunda", "camunda-primary", "camunda-secondary")
            .with_brokers((0..size).map(NodeId))
            .with_partitions(partitions, replication_factor)
    }

    fn sim_mut(&mut self) -> &mut ClusterSim {
        self.sim.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_brokers(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.sim_mut().members = ids.into_iter().collect();
        self
    }

    pub fn with_partitions(mut self, count: u32, replication_factor: u32) -> Self {
        let sim = self.sim_mut();
        sim.partitions = count;
        sim.replication_factor = replication_factor;
        self
    }

    pub fn with_exporters<'a>(mut self, exporters: impl IntoIterator<Item = (&'a str, ExporterStatus)>) -> Self {
        let sim = self.sim_mut();
        for (id, status) in exporters {
            if let Ok(id) = ExporterId::new(id) {
                sim.exporters.insert(id, status);
            }
        }
        self
    }

    /// Cluster-state reads needed for a change to settle.
    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.sim_mut().settle_polls = polls;
        self
    }

    pub fn set_exporter_transition_polls(&self, polls: u32) {
        lock(&self.sim).exporter_polls = polls;
    }

    /// Report `id` as hosted in the other region's namespace.
    pub fn misplace(&self, id: NodeId) {
        lock(&self.sim).misplaced.insert(id);
    }

    /// After `healthy` successful cluster-state reads, fail the next `count` with 500.
    pub fn fail_state_reads_after(&self, healthy: u32, count: u32) {
        let mut sim = lock(&self.sim);
        sim.healthy_reads_before_failures = healthy;
        sim.state_read_failures = count;
    }

    pub fn reject_next_patch(&self, status: u16) {
        lock(&self.sim).patch_rejections.push_back(status);
    }

    /// Accept the next real submission without a change id.
    pub fn omit_change_id_once(&self) {
        lock(&self.sim).omit_change_id = true;
    }

    /// The next submitted change ends FAILED.
    pub fn fail_next_change(&self) {
        lock(&self.sim).fail_next_change = true;
    }

    /// Answer the next `count` pause/resume calls with 503.
    pub fn fail_next_exporting(&self, count: u32) {
        lock(&self.sim).exporting_failures = count;
    }

    pub fn patches(&self) -> Vec<(TopologyChangeRequest, PatchOptions)> {
        lock(&self.sim).patches.clone()
    }

    pub fn exporter_requests(&self) -> Vec<(ExporterId, DesiredExporterState, Option<ExporterId>)> {
        lock(&self.sim).exporter_requests.clone()
    }

    pub fn exporting_calls(&self) -> Vec<ExportingAction> {
        lock(&self.sim).exporting_calls.clone()
    }

    pub fn exporting_paused(&self) -> bool {
        lock(&self.sim).exporting_paused
    }

    pub fn state_reads(&self) -> u32 {
        lock(&self.sim).state_reads
    }

    pub fn members(&self) -> BTreeSet<NodeId> {
        lock(&self.sim).members.clone()
    }

    pub fn exporter_status(&self, id: &ExporterId) -> Option<ExporterStatus> {
        lock(&self.sim).exporters.get(id).copied()
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn get_topology(&self, _gateway: &Endpoint) -> Result<ClusterTopology> {
        Ok(lock(&self.sim).topology())
    }

    async fn get_cluster_state(&self, management: &Endpoint) -> Result<ClusterState> {
        let mut sim = lock(&self.sim);
        sim.state_reads += 1;
        if sim.healthy_reads_before_failures > 0 {
            sim.healthy_reads_before_failures -= 1;
        } else if sim.state_read_failures > 0 {
            sim.state_read_failures -= 1;
            return Err(OrchestratorError::from_status(
                "get cluster state",
                management.url(CLUSTER_PATH),
                500,
                "partition leadership changing",
            ));
        }
        sim.advance();
        Ok(sim.cluster_state())
    }

    async fn patch_topology(
        &self,
        management: &Endpoint,
        request: &TopologyChangeRequest,
        options: PatchOptions,
    ) -> Result<TopologyChangeResponse> {
        let mut sim = lock(&self.sim);
        sim.patches.push((request.clone(), options));
        let url = management.url(&format!("{CLUSTER_PATH}{}", options.query()));
        if let Some(status) = sim.patch_rejections.pop_front() {
            return Err(OrchestratorError::from_status("patch topology", url, status, "scripted rejection"));
        }

        let (effect, ops) = sim
            .plan(request, options.force)
            .map_err(|(status, body)| OrchestratorError::from_status("patch topology", url, status, body))?;

        if options.dry_run {
            return Ok(TopologyChangeResponse {
                change_id: Some(sim.next_change_id),
                planned_changes: ops,
                status: ChangeStatus::Pending,
            });
        }

        let polls = sim.settle_polls;
        let id = sim.start(effect, ops.clone(), polls);
        let change_id = if std::mem::take(&mut sim.omit_change_id) {
            None
        } else {
            Some(id)
        };
        Ok(TopologyChangeResponse {
            change_id,
            planned_changes: ops,
            status: ChangeStatus::InProgress,
        })
    }

    async fn set_exporter_state(
        &self,
        management: &Endpoint,
        exporter: &ExporterId,
        desired: DesiredExporterState,
        initialize_from: Option<&ExporterId>,
    ) -> Result<TopologyChangeResponse> {
        let mut sim = lock(&self.sim);
        sim.exporter_requests
            .push((exporter.clone(), desired, initialize_from.cloned()));
        let url = management.url(&format!("{EXPORTERS_PATH}/{exporter}/{}", desired.path_segment()));

        if let Some(pending) = &sim.pending {
            let body = format!("change {} is still in progress", pending.id);
            return Err(OrchestratorError::from_status("exporter change", url, 409, body));
        }
        if !sim.exporters.contains_key(exporter) {
            return Err(OrchestratorError::from_status("exporter change", url, 404, "exporter not found"));
        }
        if let Some(source) = initialize_from {
            if desired == DesiredExporterState::Disable || !sim.exporters.contains_key(source) {
                return Err(OrchestratorError::from_status("exporter change", url, 400, "invalid initializeFrom"));
            }
        }

        let (transitional, operation) = match desired {
            DesiredExporterState::Enable => (ExporterStatus::Enabling, OP_PARTITION_ENABLE_EXPORTER),
            DesiredExporterState::Disable => (ExporterStatus::Disabling, OP_PARTITION_DISABLE_EXPORTER),
        };
        sim.exporters.insert(exporter.clone(), transitional);
        let ops: Vec<PlannedChange> = (1..=sim.partitions.max(1))
            .map(|p| PlannedChange {
                partition_id: Some(p),
                exporter_id: Some(exporter.to_string()),
                ..PlannedChange::new(operation)
            })
            .collect();
        let polls = sim.exporter_polls;
        let effect = PendingEffect::Exporter {
            exporter: exporter.clone(),
            status: desired.terminal_status(),
        };
        let id = sim.start(effect, ops.clone(), polls);
        Ok(TopologyChangeResponse {
            change_id: Some(id),
            planned_changes: ops,
            status: ChangeStatus::InProgress,
        })
    }

    async fn get_exporter_states(&self, _management: &Endpoint) -> Result<Vec<ExporterState>> {
        let mut sim = lock(&self.sim);
        sim.advance();
        Ok(sim
            .exporters
            .iter()
            .map(|(id, status)| ExporterState {
                exporter_id: id.clone(),
                status: *status,
            })
            .collect())
    }

    async fn set_exporting(&self, management: &Endpoint, action: ExportingAction) -> Result<()> {
        let mut sim = lock(&self.sim);
        sim.exporting_calls.push(action);
        if sim.exporting_failures > 0 {
            sim.exporting_failures -= 1;
            return Err(OrchestratorError::from_status(
                "set exporting",
                management.url(&format!("/actuator/exporting/{}", action.as_str())),
                503,
                "leadership renegotiation",
            ));
        }
        sim.exporting_paused = action == ExportingAction::Pause;
        Ok(())
    }
}

// =============================================================================
// Platform
// =============================================================================

#[derive(Debug)]
struct PlatformState {
    services: HashSet<String>,
    scripts: HashMap<String, VecDeque<MemberPhase>>,
    phase_calls: HashMap<String, u32>,
    default_phase: MemberPhase,
    port_forward_failures: u32,
    port_forward_calls: u32,
    base_port: u16,
    local_ports: HashMap<(String, u16), u16>,
}

/// Each platform forwards into its own block of local ports.
static PORT_BLOCKS: AtomicU16 = AtomicU16::new(0);
const PORT_BLOCK_SIZE: u16 = 100;
const PORT_BLOCK_COUNT: u16 = 400;

/// Simulated orchestration platform for one region.
///
/// Unscripted members report the default phase (`Running`). A script is
/// replayed one phase per query; its last phase sticks. A forwarded service
/// always gets the same local port, distinct from every other platform's.
#[derive(Debug)]
pub struct MockPlatform {
    state: Mutex<PlatformState>,
    open: Arc<AtomicUsize>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlatformState {
                services: HashSet::new(),
                scripts: HashMap::new(),
                phase_calls: HashMap::new(),
                default_phase: MemberPhase::Running,
                port_forward_failures: 0,
                port_forward_calls: 0,
                base_port: 20000 + (PORT_BLOCKS.fetch_add(1, Ordering::Relaxed) % PORT_BLOCK_COUNT) * PORT_BLOCK_SIZE,
                local_ports: HashMap::new(),
            }),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn add_service(&self, name: &str) {
        lock(&self.state).services.insert(name.to_string());
    }

    pub fn remove_service(&self, name: &str) {
        lock(&self.state).services.remove(name);
    }

    pub fn script_member(&self, member: &str, phases: impl IntoIterator<Item = MemberPhase>) {
        lock(&self.state)
            .scripts
            .insert(member.to_string(), phases.into_iter().collect());
    }

    pub fn set_default_phase(&self, phase: MemberPhase) {
        lock(&self.state).default_phase = phase;
    }

    pub fn phase_calls(&self, member: &str) -> u32 {
        lock(&self.state).phase_calls.get(member).copied().unwrap_or(0)
    }

    pub fn fail_next_port_forwards(&self, count: u32) {
        lock(&self.state).port_forward_failures = count;
    }

    pub fn port_forward_calls(&self) -> u32 {
        lock(&self.state).port_forward_calls
    }

    /// Port-forwards opened and not yet closed.
    pub fn open_forwards(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn member_phase(&self, member: &str) -> Result<MemberPhase> {
        let mut state = lock(&self.state);
        *state.phase_calls.entry(member.to_string()).or_default() += 1;
        let default = state.default_phase;
        let phase = match state.scripts.get_mut(member) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().copied(),
            None => None,
        };
        Ok(phase.unwrap_or(default))
    }

    async fn service_exists(&self, service: &str) -> Result<bool> {
        Ok(lock(&self.state).services.contains(service))
    }

    async fn port_forward(&self, service: &str, remote_port: u16) -> Result<Box<dyn PortForward>> {
        let mut state = lock(&self.state);
        state.port_forward_calls += 1;
        if state.port_forward_failures > 0 {
            state.port_forward_failures -= 1;
            return Err(OrchestratorError::ResourceUnavailable {
                resource: format!("service/{service}:{remote_port}"),
                reason: "port-forward exited before forwarding".to_string(),
                retriable: true,
            });
        }
        let next = state.base_port + state.local_ports.len() as u16 % PORT_BLOCK_SIZE;
        let port = *state
            .local_ports
            .entry((service.to_string(), remote_port))
            .or_insert(next);
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockForward {
            endpoint: Endpoint::new("127.0.0.1", port),
            open: self.open.clone(),
            closed: false,
        }))
    }
}

struct MockForward {
    endpoint: Endpoint,
    open: Arc<AtomicUsize>,
    closed: bool,
}

impl PortForward for MockForward {
    fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockForward {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Deployer
// =============================================================================

/// Records installs and teardowns.
#[derive(Debug, Default)]
pub struct MockDeployer {
    installs: Mutex<Vec<ReleaseValues>>,
    teardowns: Mutex<Vec<String>>,
    install_failures: Mutex<u32>,
}

impl MockDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_install(&self) {
        *lock(&self.install_failures) += 1;
    }

    pub fn installs(&self) -> Vec<ReleaseValues> {
        lock(&self.installs).clone()
    }

    pub fn teardowns(&self) -> Vec<String> {
        lock(&self.teardowns).clone()
    }
}

#[async_trait]
impl Deployer for MockDeployer {
    async fn install_or_upgrade(&self, values: &ReleaseValues) -> Result<()> {
        values.render()?;
        {
            let mut failures = lock(&self.install_failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(OrchestratorError::ResourceUnavailable {
                    resource: format!("release {}", values.release),
                    reason: "scripted install failure".to_string(),
                    retriable: false,
                });
            }
        }
        lock(&self.installs).push(values.clone());
        Ok(())
    }

    async fn teardown(&self, release: &str) -> Result<()> {
        lock(&self.teardowns).push(release.to_string());
        Ok(())
    }
}

// =============================================================================
// Backup store
// =============================================================================

#[derive(Debug, Default)]
struct BackupWorld {
    /// endpoint -> repository name -> bucket
    repositories: HashMap<String, HashMap<String, String>>,
    /// bucket -> snapshots
    buckets: HashMap<String, Vec<BackupRecord>>,
    registrations: u32,
    empty_listings: u32,
    failed_shards_next: Option<u32>,
    health: HashMap<String, VecDeque<HealthStatus>>,
    snapshots_taken: Vec<String>,
    restores: Vec<(String, String)>,
}

impl BackupWorld {
    fn bucket(&self, store: &Endpoint, repository: &str) -> Result<String> {
        self.repositories
            .get(&store.to_string())
            .and_then(|repos| repos.get(repository))
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::from_status(
                    "snapshot repository",
                    store.url(&format!("{SNAPSHOT_PATH}/{repository}")),
                    404,
                    "repository_missing_exception",
                )
            })
    }
}

/// Search stores sharing snapshot buckets.
///
/// Repositories are registered per endpoint; snapshots live in buckets, so
/// a snapshot taken through one store is visible to any store that
/// registered a repository on the same bucket.
#[derive(Debug, Default)]
pub struct MockBackupStore {
    world: Mutex<BackupWorld>,
}

impl MockBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` listings come back empty.
    pub fn empty_listings(&self, count: u32) {
        lock(&self.world).empty_listings = count;
    }

    pub fn fail_shards_on_next_snapshot(&self, failed: u32) {
        lock(&self.world).failed_shards_next = Some(failed);
    }

    /// Health replayed one status per query for `store`; the last sticks.
    pub fn script_health(&self, store: &Endpoint, statuses: impl IntoIterator<Item = HealthStatus>) {
        lock(&self.world)
            .health
            .insert(store.to_string(), statuses.into_iter().collect());
    }

    pub fn repository_registrations(&self) -> u32 {
        lock(&self.world).registrations
    }

    pub fn snapshots_taken(&self) -> Vec<String> {
        lock(&self.world).snapshots_taken.clone()
    }

    /// `(endpoint, snapshot)` pairs restored.
    pub fn restores(&self) -> Vec<(String, String)> {
        lock(&self.world).restores.clone()
    }
}

#[async_trait]
impl BackupStore for MockBackupStore {
    async fn create_repository(&self, store: &Endpoint, settings: &RepositorySettings) -> Result<()> {
        let mut world = lock(&self.world);
        world.registrations += 1;
        world
            .repositories
            .entry(store.to_string())
            .or_default()
            .insert(settings.name.clone(), settings.bucket.clone());
        world.buckets.entry(settings.bucket.clone()).or_default();
        Ok(())
    }

    async fn create_snapshot(&self, store: &Endpoint, repository: &str, name: &str) -> Result<BackupRecord> {
        let mut world = lock(&self.world);
        let bucket = world.bucket(store, repository)?;
        if world.buckets.get(&bucket).is_some_and(|s| s.iter().any(|r| r.name == name)) {
            return Err(OrchestratorError::from_status(
                "create snapshot",
                store.url(&format!("{SNAPSHOT_PATH}/{repository}/{name}")),
                400,
                "invalid_snapshot_name_exception: snapshot with the same name already exists",
            ));
        }
        let failed = world.failed_shards_next.take().unwrap_or(0);
        let record = BackupRecord {
            state: Some(if failed == 0 { "SUCCESS" } else { "PARTIAL" }.to_string()),
            ..BackupRecord::new(name, 6, failed)
        };
        world.buckets.entry(bucket).or_default().push(record.clone());
        world.snapshots_taken.push(name.to_string());
        Ok(record)
    }

    async fn list_snapshots(&self, store: &Endpoint, repository: &str) -> Result<Vec<BackupRecord>> {
        let mut world = lock(&self.world);
        let bucket = world.bucket(store, repository)?;
        if world.empty_listings > 0 {
            world.empty_listings -= 1;
            return Ok(Vec::new());
        }
        Ok(world.buckets.get(&bucket).cloned().unwrap_or_default())
    }

    async fn restore_snapshot(&self, store: &Endpoint, repository: &str, name: &str) -> Result<BackupRecord> {
        let mut world = lock(&self.world);
        let bucket = world.bucket(store, repository)?;
        let record = world
            .buckets
            .get(&bucket)
            .and_then(|s| s.iter().find(|r| r.name == name))
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::from_status(
                    "restore snapshot",
                    store.url(&format!("{SNAPSHOT_PATH}/{repository}/{name}/_restore")),
                    404,
                    "snapshot_missing_exception",
                )
            })?;
        world.restores.push((store.to_string(), name.to_string()));
        Ok(record)
    }

    async fn cluster_health(&self, store: &Endpoint) -> Result<ClusterHealth> {
        let mut world = lock(&self.world);
        let status = match world.health.get_mut(&store.to_string()) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().copied(),
            None => None,
        };
        Ok(ClusterHealth {
            status: status.unwrap_or(HealthStatus::Green),
            timed_out: false,
        })
    }
}

// =============================================================================
// Handles
// =============================================================================

pub const MOCK_GATEWAY_SERVICE: &str = "camunda-zeebe-gateway";
pub const MOCK_DATA_STORE_SERVICE: &str = "camunda-elasticsearch";

/// Readiness token for a simulated cluster, bypassing the member gate.
pub fn ready_brokers(ids: impl IntoIterator<Item = u32>) -> ReadyBrokers {
    ReadyBrokers::from_observed(ids.into_iter().map(NodeId).collect())
}

/// Handle for region `index` reached through port-forwards on `platform`,
/// with a fresh [`MockDeployer`].
pub fn test_handle(index: RegionIndex, platform: Arc<MockPlatform>) -> ClusterHandle {
    test_handle_with(index, platform, Arc::new(MockDeployer::new()))
}

/// Handle for region `index`; registers the forwarded services on `platform`.
pub fn test_handle_with(
    index: RegionIndex,
    platform: Arc<MockPlatform>,
    deployer: Arc<MockDeployer>,
) -> ClusterHandle {
    platform.add_service(MOCK_GATEWAY_SERVICE);
    platform.add_service(MOCK_DATA_STORE_SERVICE);
    let (region, cluster_name, namespace) = match index {
        RegionIndex::Zero => ("eu-west-2", "cluster-london", "camunda-primary"),
        RegionIndex::One => ("eu-west-3", "cluster-paris", "camunda-secondary"),
    };
    ClusterHandle {
        region: region.to_string(),
        index,
        cluster_name: cluster_name.to_string(),
        namespace: namespace.to_string(),
        management: Access::PortForward {
            service: MOCK_GATEWAY_SERVICE.to_string(),
            remote_port: MANAGEMENT_PORT,
        },
        gateway: Access::PortForward {
            service: MOCK_GATEWAY_SERVICE.to_string(),
            remote_port: GATEWAY_REST_PORT,
        },
        data_store: Access::PortForward {
            service: MOCK_DATA_STORE_SERVICE.to_string(),
            remote_port: DATA_STORE_PORT,
        },
        platform,
        deployer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep() -> Endpoint {
        Endpoint::new("127.0.0.1", 9600)
    }

    #[test]
    fn test_distribution_places_every_replica() {
        let members: BTreeSet<NodeId> = (0..8).map(NodeId).collect();
        let placed = distribution(&members, 8, 4);
        let replicas: usize = placed.values().map(Vec::len).sum();
        assert_eq!(replicas, 32);
        assert!(placed.values().all(|p| p.len() == 4));
        let leaders = placed.values().flatten().filter(|(_, leader)| *leader).count();
        assert_eq!(leaders, 8);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mutate() {
        let control = MockControlPlane::dual_region(8, 8, 4);
        let before = control.get_topology(&ep()).await.unwrap();
        let preview = control
            .patch_topology(
                &ep(),
                &TopologyChangeRequest::add_brokers([8, 9].map(NodeId)),
                PatchOptions::dry_run(),
            )
            .await
            .unwrap();
        assert!(preview.plans_operation(OP_BROKER_ADD));
        assert!(control.get_cluster_state(&ep()).await.unwrap().pending_change.is_none());
        assert_eq!(control.get_topology(&ep()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_change_settles_after_configured_polls() {
        let control = MockControlPlane::dual_region(8, 8, 4).with_settle_polls(3);
        let response = control
            .patch_topology(
                &ep(),
                &TopologyChangeRequest::resize_partitions(Some(12), None),
                PatchOptions::apply(),
            )
            .await
            .unwrap();
        assert_eq!(response.change_id, Some(1));
        for _ in 0..2 {
            assert!(!control.get_cluster_state(&ep()).await.unwrap().is_settled());
        }
        let state = control.get_cluster_state(&ep()).await.unwrap();
        assert!(state.is_settled());
        assert_eq!(state.partition_count(), 12);
    }

    #[tokio::test]
    async fn test_concurrent_change_conflicts() {
        let control = MockControlPlane::dual_region(8, 8, 4).with_settle_polls(5);
        let request = TopologyChangeRequest::resize_partitions(Some(12), None);
        control.patch_topology(&ep(), &request, PatchOptions::apply()).await.unwrap();
        let err = control
            .patch_topology(&ep(), &request, PatchOptions::apply())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Rejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_transport_replays_in_order() {
        let transport = MockTransport::new();
        transport.push(200, "a");
        transport.push_unavailable("refused");
        let first = transport.send(Method::GET, "http://x/1", None).await.unwrap();
        assert_eq!(first.text(), "a");
        assert!(transport.send(Method::GET, "http://x/2", None).await.unwrap_err().is_transient());
        assert!(transport.send(Method::GET, "http://x/3", None).await.is_err());
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_backup_bucket_shared_between_stores() {
        let backups = MockBackupStore::new();
        let primary = Endpoint::new("127.0.0.1", 30001);
        let secondary = Endpoint::new("127.0.0.1", 30002);
        let settings = RepositorySettings {
            name: "camunda_backup".to_string(),
            bucket: "cluster-london-elastic-backup".to_string(),
            client: "camunda".to_string(),
            base_path: "backups".to_string(),
        };
        backups.create_repository(&primary, &settings).await.unwrap();
        backups.create_snapshot(&primary, "camunda_backup", "failback").await.unwrap();

        assert!(backups.list_snapshots(&secondary, "camunda_backup").await.is_err());
        backups.create_repository(&secondary, &settings).await.unwrap();
        assert_eq!(backups.list_snapshots(&secondary, "camunda_backup").await.unwrap().len(), 1);
        assert!(backups
            .create_snapshot(&secondary, "camunda_backup", "failback")
            .await
            .is_err());
    }
}
