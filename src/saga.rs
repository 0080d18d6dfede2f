//! Failover, failback and scaling procedures.
//!
//! A [`Saga`] drives one region pair through
//!
//! ```text
//! STEADY -> REGION_LOST -> DEGRADED_SINGLE_REGION
//!        -> BACKUP_IN_PROGRESS -> RESTORING -> REBALANCING -> STEADY
//! ```
//!
//! Steps run strictly one after the other. Each completed step is written to
//! the saga's journal; a step that fails aborts the run with
//! [`OrchestratorError::SagaAborted`] naming it, and nothing after it runs.
//! Calling the procedure again on the same saga resumes at the failed step,
//! skipping every journaled one, so a mutating step that succeeded is never
//! repeated. Tunnels are opened per step and closed when the step returns.
//!
//! [`ScaleProcedure`] composes the readiness gate, the topology driver and the
//! invariant checker for the steady-state scaling procedures.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::backup::{self, BackupStore, RepositorySettings};
use crate::config::OrchestratorConfig;
use crate::control::{ClusterTopology, ControlPlane};
use crate::deployment::{ContactPoints, ReleaseValues, data_store_url};
use crate::error::{OrchestratorError, Result};
use crate::exporter::ExporterController;
use crate::invariant;
use crate::metrics;
use crate::poller::PollPolicy;
use crate::readiness::{self, BrokerLayout};
use crate::retry::FixedRetry;
use crate::topology::{RemovalMode, TopologyDriver};
use crate::types::{ExporterId, NodeId, RegionIndex, RegionPair};

// =============================================================================
// State
// =============================================================================

/// Where a region pair stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SagaState {
    Steady,
    RegionLost,
    DegradedSingleRegion,
    BackupInProgress,
    Restoring,
    Rebalancing,
}

impl SagaState {
    pub const ALL: [SagaState; 6] = [
        SagaState::Steady,
        SagaState::RegionLost,
        SagaState::DegradedSingleRegion,
        SagaState::BackupInProgress,
        SagaState::Restoring,
        SagaState::Rebalancing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Steady => "steady",
            SagaState::RegionLost => "region_lost",
            SagaState::DegradedSingleRegion => "degraded_single_region",
            SagaState::BackupInProgress => "backup_in_progress",
            SagaState::Restoring => "restoring",
            SagaState::Rebalancing => "rebalancing",
        }
    }

    /// Failback is underway (or about to start).
    fn in_failback(&self) -> bool {
        matches!(
            self,
            SagaState::DegradedSingleRegion
                | SagaState::BackupInProgress
                | SagaState::Restoring
                | SagaState::Rebalancing
        )
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const FAILOVER: &str = "failover";
pub const FAILBACK: &str = "failback";

pub const STEP_TEARDOWN: &str = "teardown-lost-region";
pub const STEP_REMOVE_LOST_BROKERS: &str = "remove-lost-brokers";
pub const STEP_DISABLE_LOST_EXPORTER: &str = "disable-lost-exporter";
pub const STEP_VERIFY_SURVIVORS: &str = "verify-survivors";

pub const STEP_REDEPLOY_FAILBACK: &str = "redeploy-failback";
pub const STEP_RESTRICT_HEALTHY: &str = "restrict-healthy-region";
pub const STEP_PAUSE_EXPORTING: &str = "pause-exporting";
pub const STEP_REGISTER_REPOSITORIES: &str = "register-repositories";
pub const STEP_TAKE_BACKUP: &str = "take-backup";
pub const STEP_VERIFY_BACKUP: &str = "verify-backup";
pub const STEP_RESTORE_BACKUP: &str = "restore-backup";
pub const STEP_ENABLE_EXPORTER: &str = "enable-exporter";
pub const STEP_ADMIT_BROKERS: &str = "admit-brokers";
pub const STEP_RESUME_EXPORTING: &str = "resume-exporting";
pub const STEP_REDEPLOY_STEADY: &str = "redeploy-steady";
pub const STEP_REDEPLOY_HEALTHY: &str = "redeploy-healthy-region";
pub const STEP_VERIFY_TOPOLOGY: &str = "verify-topology";
pub const STEP_SMOKE_CHECK: &str = "smoke-check";

/// A completed saga step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub procedure: &'static str,
    pub step: &'static str,
    pub completed_at: DateTime<Utc>,
}

/// Functional check run once the pair is back to steady state, e.g. deploy a
/// process and query it through both regions.
#[async_trait]
pub trait SmokeCheck: Send + Sync {
    async fn check(&self, pair: &RegionPair) -> Result<()>;
}

/// What to bring back during a failback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailbackPlan {
    /// The region being recovered.
    pub region: RegionIndex,
    /// Seed the recovered region's search store from a snapshot of the
    /// healthy one. Without it the backup steps are skipped.
    pub restore_from_backup: bool,
    pub chart_version: Option<String>,
    pub values_files: Vec<PathBuf>,
    pub image_tag: Option<String>,
    /// Partition count expected at the end; the observed count when unset.
    pub expected_partitions: Option<u32>,
}

impl FailbackPlan {
    pub fn new(region: RegionIndex) -> Self {
        Self {
            region,
            restore_from_backup: true,
            chart_version: None,
            values_files: Vec::new(),
            image_tag: None,
            expected_partitions: None,
        }
    }

    pub fn restoring_from_backup(mut self, restore: bool) -> Self {
        self.restore_from_backup = restore;
        self
    }

    pub fn with_chart_version(mut self, version: impl Into<String>) -> Self {
        self.chart_version = Some(version.into());
        self
    }

    pub fn with_values_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.values_files.push(path.into());
        self
    }

    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = Some(tag.into());
        self
    }

    pub fn expecting_partitions(mut self, count: u32) -> Self {
        self.expected_partitions = Some(count);
        self
    }
}

/// Membership observed by failover before the lost region was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FailoverRecord {
    removed: Vec<NodeId>,
    survivors: u32,
    partitions: u32,
}

impl FailoverRecord {
    fn cluster_size(&self) -> u32 {
        self.survivors + self.removed.len() as u32
    }
}

/// Release flavour for one redeploy step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    FailBack,
    WithoutWebApps,
    Steady,
}

// =============================================================================
// Saga
// =============================================================================

/// Failover/failback driver for one region pair.
///
/// Assumes it is the only writer to the pair's cluster for the whole run.
pub struct Saga {
    topology: TopologyDriver,
    exporters: ExporterController,
    backups: Arc<dyn BackupStore>,
    smoke: Option<Arc<dyn SmokeCheck>>,
    config: OrchestratorConfig,
    layout: BrokerLayout,
    state: SagaState,
    lost: Option<RegionIndex>,
    record: Option<FailoverRecord>,
    journal: Vec<JournalEntry>,
}

impl fmt::Debug for Saga {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Saga")
            .field("state", &self.state)
            .field("lost", &self.lost)
            .field("layout", &self.layout)
            .field("journal", &self.journal.len())
            .finish_non_exhaustive()
    }
}

impl Saga {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        backups: Arc<dyn BackupStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let layout = BrokerLayout::new(config.release_name.clone(), config.brokers_per_region);
        let saga = Self {
            topology: TopologyDriver::new(control.clone(), &config),
            exporters: ExporterController::new(control, &config),
            backups,
            smoke: None,
            config,
            layout,
            state: SagaState::Steady,
            lost: None,
            record: None,
            journal: Vec::new(),
        };
        saga.publish_state();
        saga
    }

    pub fn with_smoke_check(mut self, smoke: Arc<dyn SmokeCheck>) -> Self {
        self.smoke = Some(smoke);
        self
    }

    /// Pick up a pair whose failover already happened elsewhere.
    pub fn degraded(mut self, lost: RegionIndex) -> Self {
        self.lost = Some(lost);
        self.transition(SagaState::DegradedSingleRegion);
        self
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn lost_region(&self) -> Option<RegionIndex> {
        self.lost
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn layout(&self) -> &BrokerLayout {
        &self.layout
    }

    /// Cut the pair down to the surviving region after `lost` is gone.
    #[instrument(skip_all, fields(lost = %lost))]
    pub async fn failover(&mut self, pair: &RegionPair, lost: RegionIndex) -> Result<()> {
        match (self.state, self.lost) {
            (SagaState::Steady, _) => {
                self.journal.clear();
                self.record = None;
                self.lost = Some(lost);
            }
            (SagaState::RegionLost, Some(current)) if current == lost => {
                info!(completed = self.journal.len(), "Resuming failover");
            }
            (SagaState::DegradedSingleRegion, Some(current)) if current == lost => {
                info!("Failover already completed");
                return Ok(());
            }
            (state, current) => {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "cannot fail over region {lost} while {state} (lost region {current:?})"
                )));
            }
        }
        self.transition(SagaState::RegionLost);
        warn!(region = %pair.get(lost).region, "Failing over to a single region");

        if !self.completed(FAILOVER, STEP_TEARDOWN) {
            let result = self.teardown_region(pair, lost).await;
            self.finish(FAILOVER, STEP_TEARDOWN, result)?;
        }
        if !self.completed(FAILOVER, STEP_REMOVE_LOST_BROKERS) {
            let result = self.remove_lost_brokers(pair, lost).await;
            self.finish(FAILOVER, STEP_REMOVE_LOST_BROKERS, result)?;
        }
        if !self.completed(FAILOVER, STEP_DISABLE_LOST_EXPORTER) {
            let result = self.disable_lost_exporter(pair, lost).await;
            self.finish(FAILOVER, STEP_DISABLE_LOST_EXPORTER, result)?;
        }
        if !self.completed(FAILOVER, STEP_VERIFY_SURVIVORS) {
            let result = self.verify_survivors(pair, lost.other()).await;
            self.finish(FAILOVER, STEP_VERIFY_SURVIVORS, result)?;
        }

        self.transition(SagaState::DegradedSingleRegion);
        info!(survivor = %pair.get(lost.other()).region, "Failover completed");
        Ok(())
    }

    /// Bring the lost region back and return the pair to dual-region steady state.
    #[instrument(skip_all, fields(region = %plan.region))]
    pub async fn failback(&mut self, pair: &RegionPair, plan: &FailbackPlan) -> Result<()> {
        if self.state == SagaState::Steady {
            info!("Pair already steady");
            return Ok(());
        }
        if !self.state.in_failback() || self.lost != Some(plan.region) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "cannot fail back region {} while {} (lost region {:?})",
                plan.region, self.state, self.lost
            )));
        }
        let recovering = plan.region;
        let healthy = recovering.other();
        info!(region = %pair.get(recovering).region, state = %self.state, "Failing back");

        if !self.completed(FAILBACK, STEP_REDEPLOY_FAILBACK) {
            let result = self.redeploy(pair, plan, recovering, Release::FailBack).await;
            self.finish(FAILBACK, STEP_REDEPLOY_FAILBACK, result)?;
        }
        if !self.completed(FAILBACK, STEP_RESTRICT_HEALTHY) {
            let result = self.redeploy(pair, plan, healthy, Release::WithoutWebApps).await;
            self.finish(FAILBACK, STEP_RESTRICT_HEALTHY, result)?;
        }

        if plan.restore_from_backup {
            self.transition(SagaState::BackupInProgress);
            if !self.completed(FAILBACK, STEP_PAUSE_EXPORTING) {
                let result = self.switch_exporting(pair, healthy, true).await;
                self.finish(FAILBACK, STEP_PAUSE_EXPORTING, result)?;
            }
            if !self.completed(FAILBACK, STEP_REGISTER_REPOSITORIES) {
                let result = self.register_repositories(pair, recovering).await;
                self.finish(FAILBACK, STEP_REGISTER_REPOSITORIES, result)?;
            }
            if !self.completed(FAILBACK, STEP_TAKE_BACKUP) {
                let result = self.take_backup(pair, healthy).await;
                self.finish(FAILBACK, STEP_TAKE_BACKUP, result)?;
            }
            if !self.completed(FAILBACK, STEP_VERIFY_BACKUP) {
                let result = self.verify_backup(pair, recovering).await;
                self.finish(FAILBACK, STEP_VERIFY_BACKUP, result)?;
            }

            self.transition(SagaState::Restoring);
            if !self.completed(FAILBACK, STEP_RESTORE_BACKUP) {
                let result = self.restore_backup(pair, recovering).await;
                self.finish(FAILBACK, STEP_RESTORE_BACKUP, result)?;
            }
        }

        self.transition(SagaState::Rebalancing);
        if !self.completed(FAILBACK, STEP_ENABLE_EXPORTER) {
            let result = self.enable_recovered_exporter(pair, recovering).await;
            self.finish(FAILBACK, STEP_ENABLE_EXPORTER, result)?;
        }
        if !self.completed(FAILBACK, STEP_ADMIT_BROKERS) {
            let result = self.admit_recovered_brokers(pair, recovering).await;
            self.finish(FAILBACK, STEP_ADMIT_BROKERS, result)?;
        }
        if !self.completed(FAILBACK, STEP_RESUME_EXPORTING) {
            let result = self.switch_exporting(pair, healthy, false).await;
            self.finish(FAILBACK, STEP_RESUME_EXPORTING, result)?;
        }
        if !self.completed(FAILBACK, STEP_REDEPLOY_STEADY) {
            let result = self.redeploy(pair, plan, recovering, Release::Steady).await;
            self.finish(FAILBACK, STEP_REDEPLOY_STEADY, result)?;
        }
        if !self.completed(FAILBACK, STEP_REDEPLOY_HEALTHY) {
            let result = self.redeploy(pair, plan, healthy, Release::Steady).await;
            self.finish(FAILBACK, STEP_REDEPLOY_HEALTHY, result)?;
        }
        if !self.completed(FAILBACK, STEP_VERIFY_TOPOLOGY) {
            let result = self.verify_pair(pair, healthy, plan.expected_partitions).await;
            self.finish(FAILBACK, STEP_VERIFY_TOPOLOGY, result)?;
        }
        if let Some(smoke) = self.smoke.clone() {
            if !self.completed(FAILBACK, STEP_SMOKE_CHECK) {
                let result = smoke.check(pair).await;
                self.finish(FAILBACK, STEP_SMOKE_CHECK, result)?;
            }
        }

        self.lost = None;
        self.record = None;
        self.transition(SagaState::Steady);
        info!("Failback completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    fn completed(&self, procedure: &'static str, step: &'static str) -> bool {
        let done = self
            .journal
            .iter()
            .any(|e| e.procedure == procedure && e.step == step);
        if done {
            metrics::record_saga_step(procedure, step, "skipped");
        }
        done
    }

    fn finish(&mut self, procedure: &'static str, step: &'static str, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                metrics::record_saga_step(procedure, step, "completed");
                info!(procedure, step, state = %self.state, "Saga step completed");
                self.journal.push(JournalEntry {
                    procedure,
                    step,
                    completed_at: Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                metrics::record_saga_step(procedure, step, "failed");
                metrics::record_error(e.class());
                error!(procedure, step, state = %self.state, error = %e, "Saga step failed, aborting");
                Err(OrchestratorError::SagaAborted {
                    step,
                    source: Box::new(e),
                })
            }
        }
    }

    fn transition(&mut self, next: SagaState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Saga state");
        }
        self.state = next;
        self.publish_state();
    }

    fn publish_state(&self) {
        let all: Vec<&str> = SagaState::ALL.iter().map(SagaState::as_str).collect();
        metrics::set_saga_state(self.state.as_str(), &all);
    }

    fn tunnel_retry(&self) -> FixedRetry {
        self.config.tunnel_retry()
    }

    fn exporter_id(&self, region: RegionIndex) -> Result<ExporterId> {
        ExporterId::for_region(&self.config.exporter_prefix, region)
    }

    fn repository(&self, pair: &RegionPair, healthy: RegionIndex) -> RepositorySettings {
        RepositorySettings::for_cluster(&self.config, &pair.get(healthy).cluster_name)
    }

    // -------------------------------------------------------------------------
    // Failover steps
    // -------------------------------------------------------------------------

    async fn teardown_region(&self, pair: &RegionPair, lost: RegionIndex) -> Result<()> {
        let handle = pair.get(lost);
        handle.deployer.teardown(&self.config.release_name).await?;
        info!(region = %handle.region, namespace = %handle.namespace, "Lost region torn down");
        Ok(())
    }

    /// Removes every member of the lost region, including brokers added by
    /// scaling beyond the configured layout. The first run records what the
    /// survivor and failback steps expect.
    async fn remove_lost_brokers(&mut self, pair: &RegionPair, lost: RegionIndex) -> Result<()> {
        let survivor = pair.get(lost.other());
        let control = self.topology.control().clone();

        let partitions = match &self.record {
            Some(record) => record.partitions,
            None => {
                let gateway = survivor.open_gateway(self.tunnel_retry()).await?;
                control.get_topology(gateway.endpoint()).await?.partitions_count
            }
        };
        let management = survivor.open_management(self.tunnel_retry()).await?;
        let members = control.get_cluster_state(management.endpoint()).await?.member_ids();
        let (ids, survivors): (Vec<NodeId>, Vec<NodeId>) =
            members.iter().copied().partition(|id| id.region() == lost);
        if self.record.is_none() {
            info!(
                removing = ?ids,
                survivors = survivors.len(),
                partitions,
                "Recorded membership before failover"
            );
            self.record = Some(FailoverRecord {
                removed: ids.clone(),
                survivors: survivors.len() as u32,
                partitions,
            });
        }
        if ids.is_empty() {
            info!("Lost region's brokers are no longer members");
            return Ok(());
        }
        self.topology
            .remove_brokers(management.endpoint(), &ids, RemovalMode::ForceUnreachable)
            .await?;
        Ok(())
    }

    async fn disable_lost_exporter(&self, pair: &RegionPair, lost: RegionIndex) -> Result<()> {
        let management = pair.get(lost.other()).open_management(self.tunnel_retry()).await?;
        self.exporters
            .disable(management.endpoint(), &self.exporter_id(lost)?)
            .await
    }

    async fn verify_survivors(&self, pair: &RegionPair, survivor: RegionIndex) -> Result<()> {
        let Some(record) = &self.record else {
            return Err(OrchestratorError::invariant(
                "failover-record",
                "membership was not recorded before the lost brokers were removed",
            ));
        };
        let handle = pair.get(survivor);
        let control = self.topology.control().as_ref();

        let members: BTreeSet<NodeId> = {
            let management = handle.open_management(self.tunnel_retry()).await?;
            control.get_cluster_state(management.endpoint()).await?.member_ids()
        };
        invariant::check_survivor_ids(&members, survivor)?;

        let gateway = handle.open_gateway(self.tunnel_retry()).await?;
        let topology = control.get_topology(gateway.endpoint()).await?;
        invariant::check_counts(&topology, record.survivors, record.partitions)?;
        invariant::check_region_parity(&topology, pair.namespaces())?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Failback steps
    // -------------------------------------------------------------------------

    /// Cluster size the pair returns to once both regions are back.
    fn dual_region_size(&self) -> u32 {
        self.record
            .as_ref()
            .map_or(self.layout.cluster_size(), FailoverRecord::cluster_size)
    }

    fn release_values(
        &self,
        pair: &RegionPair,
        plan: &FailbackPlan,
        region: RegionIndex,
    ) -> Result<ReleaseValues> {
        let [ns0, ns1] = pair.namespaces();
        let release = &self.config.release_name;
        let contact_points = ContactPoints::generate(release, ns0, ns1, self.dual_region_size())?;
        let mut values = ReleaseValues::new(release.clone(), region, contact_points);
        for target in [RegionIndex::Zero, RegionIndex::One] {
            values = values.with_exporter(
                self.exporter_id(target)?,
                data_store_url(release, &pair.get(target).namespace),
            );
        }
        if let Some(version) = &plan.chart_version {
            values = values.with_chart_version(version.clone());
        }
        for file in &plan.values_files {
            values = values.with_values_file(file.clone());
        }
        if let Some(tag) = &plan.image_tag {
            values = values.with_image_tag(tag.clone());
        }
        Ok(values)
    }

    async fn redeploy(
        &self,
        pair: &RegionPair,
        plan: &FailbackPlan,
        region: RegionIndex,
        release: Release,
    ) -> Result<()> {
        let base = self.release_values(pair, plan, region)?;
        let values = match release {
            Release::FailBack => base.failback(plan.restore_from_backup),
            Release::WithoutWebApps => base.without_web_apps(),
            Release::Steady => base.steady(),
        };
        let handle = pair.get(region);
        handle.deployer.install_or_upgrade(&values).await?;
        info!(
            region = %handle.region,
            installation = values.installation_type.as_str(),
            web_apps = values.web_apps_enabled,
            "Region redeployed"
        );
        Ok(())
    }

    async fn switch_exporting(&self, pair: &RegionPair, healthy: RegionIndex, pause: bool) -> Result<()> {
        let management = pair.get(healthy).open_management(self.tunnel_retry()).await?;
        if pause {
            self.exporters.pause(management.endpoint()).await
        } else {
            self.exporters.resume(management.endpoint()).await
        }
    }

    /// Both stores point their repository at the healthy cluster's bucket.
    async fn register_repositories(&self, pair: &RegionPair, recovering: RegionIndex) -> Result<()> {
        let settings = self.repository(pair, recovering.other());
        for region in [recovering.other(), recovering] {
            let store = pair.get(region).open_data_store(self.tunnel_retry()).await?;
            self.backups.create_repository(store.endpoint(), &settings).await?;
            info!(region = %pair.get(region).region, repository = %settings.name, bucket = %settings.bucket, "Repository registered");
        }
        Ok(())
    }

    async fn take_backup(&self, pair: &RegionPair, healthy: RegionIndex) -> Result<()> {
        let settings = self.repository(pair, healthy);
        let store = pair.get(healthy).open_data_store(self.tunnel_retry()).await?;
        backup::take_snapshot(
            self.backups.as_ref(),
            store.endpoint(),
            &settings.name,
            &self.config.backup_name,
        )
        .await?;
        Ok(())
    }

    /// The snapshot must be visible from the store it is restored into.
    async fn verify_backup(&self, pair: &RegionPair, recovering: RegionIndex) -> Result<()> {
        let settings = self.repository(pair, recovering.other());
        let store = pair.get(recovering).open_data_store(self.tunnel_retry()).await?;
        backup::verify_present(
            self.backups.as_ref(),
            store.endpoint(),
            &settings,
            &self.config.backup_name,
            self.config.backup_check_poll(),
        )
        .await?;
        Ok(())
    }

    async fn restore_backup(&self, pair: &RegionPair, recovering: RegionIndex) -> Result<()> {
        let settings = self.repository(pair, recovering.other());
        let store = pair.get(recovering).open_data_store(self.tunnel_retry()).await?;
        backup::restore(
            self.backups.as_ref(),
            store.endpoint(),
            &settings.name,
            &self.config.backup_name,
        )
        .await?;
        backup::await_healthy(self.backups.as_ref(), store.endpoint(), self.config.backup_check_poll()).await?;
        Ok(())
    }

    async fn enable_recovered_exporter(&self, pair: &RegionPair, recovering: RegionIndex) -> Result<()> {
        let management = pair.get(recovering.other()).open_management(self.tunnel_retry()).await?;
        self.exporters
            .enable(
                management.endpoint(),
                &self.exporter_id(recovering)?,
                Some(&self.exporter_id(recovering.other())?),
            )
            .await
    }

    async fn admit_recovered_brokers(&self, pair: &RegionPair, recovering: RegionIndex) -> Result<()> {
        let management = pair.get(recovering.other()).open_management(self.tunnel_retry()).await?;
        let members = self
            .topology
            .control()
            .get_cluster_state(management.endpoint())
            .await?
            .member_ids();
        let expected = match &self.record {
            Some(record) => record.removed.clone(),
            None => self.layout.region_node_ids(recovering),
        };
        let ids: Vec<NodeId> = expected.into_iter().filter(|id| !members.contains(id)).collect();
        if ids.is_empty() {
            info!("Recovered region's brokers are already members");
            return Ok(());
        }
        let ready = readiness::await_brokers_running(
            pair.get(recovering),
            &self.layout,
            &ids,
            self.config.readiness_poll(),
        )
        .await?;
        self.topology
            .add_brokers_and_resize(
                management.endpoint(),
                &ready,
                None,
                Some(self.config.replication_factor),
            )
            .await?;
        Ok(())
    }

    async fn verify_pair(&self, pair: &RegionPair, via: RegionIndex, expected_partitions: Option<u32>) -> Result<()> {
        let gateway = pair.get(via).open_gateway(self.tunnel_retry()).await?;
        let control = self.topology.control().as_ref();
        let recorded = self.record.as_ref().map(|r| r.partitions);
        let partitions = match expected_partitions.or(recorded) {
            Some(count) => count,
            None => control.get_topology(gateway.endpoint()).await?.partitions_count,
        };
        invariant::verify_dual_region(
            control,
            gateway.endpoint(),
            pair.namespaces(),
            self.dual_region_size(),
            partitions,
        )
        .await?;
        Ok(())
    }
}

// =============================================================================
// Scaling
// =============================================================================

/// Steady-state scaling, always through the primary region's endpoints.
#[derive(Debug, Clone)]
pub struct ScaleProcedure {
    topology: TopologyDriver,
    layout: BrokerLayout,
    readiness: PollPolicy,
    tunnel_retry: FixedRetry,
}

impl ScaleProcedure {
    pub fn new(control: Arc<dyn ControlPlane>, config: &OrchestratorConfig) -> Self {
        Self {
            topology: TopologyDriver::new(control, config),
            layout: BrokerLayout::new(config.release_name.clone(), config.brokers_per_region),
            readiness: config.readiness_poll(),
            tunnel_retry: config.tunnel_retry(),
        }
    }

    async fn current(&self, pair: &RegionPair) -> Result<ClusterTopology> {
        let gateway = pair.primary.open_gateway(self.tunnel_retry).await?;
        self.topology.control().get_topology(gateway.endpoint()).await
    }

    async fn verify(&self, pair: &RegionPair, size: u32, partitions: u32) -> Result<ClusterTopology> {
        let gateway = pair.primary.open_gateway(self.tunnel_retry).await?;
        let topology =
            invariant::verify(self.topology.control().as_ref(), gateway.endpoint(), size, partitions).await?;
        invariant::check_region_parity(&topology, pair.namespaces())?;
        Ok(topology)
    }

    /// Gate the new brokers, admit them, verify the grown cluster.
    #[instrument(skip_all, fields(brokers = ?ids))]
    pub async fn scale_brokers(&self, pair: &RegionPair, ids: &[NodeId]) -> Result<ClusterTopology> {
        let before = self.current(pair).await?;
        let ready = readiness::await_pair_brokers_running(pair, &self.layout, ids, self.readiness).await?;
        {
            let management = pair.primary.open_management(self.tunnel_retry).await?;
            self.topology.add_brokers(management.endpoint(), &ready).await?;
        }
        self.verify(pair, before.cluster_size + ready.len() as u32, before.partitions_count)
            .await
    }

    /// Grow the partition count, keeping the replication factor.
    #[instrument(skip_all, fields(count = count))]
    pub async fn scale_partitions(&self, pair: &RegionPair, count: u32) -> Result<ClusterTopology> {
        let before = self.current(pair).await?;
        {
            let management = pair.primary.open_management(self.tunnel_retry).await?;
            self.topology
                .resize_partitions(management.endpoint(), count, before.replication_factor)
                .await?;
        }
        self.verify(pair, before.cluster_size, count).await
    }

    /// Admit brokers and grow partitions in one change.
    #[instrument(skip_all, fields(brokers = ?ids, count = count))]
    pub async fn scale_brokers_and_partitions(
        &self,
        pair: &RegionPair,
        ids: &[NodeId],
        count: u32,
    ) -> Result<ClusterTopology> {
        let before = self.current(pair).await?;
        let ready = readiness::await_pair_brokers_running(pair, &self.layout, ids, self.readiness).await?;
        {
            let management = pair.primary.open_management(self.tunnel_retry).await?;
            self.topology
                .add_brokers_and_resize(management.endpoint(), &ready, Some(count), None)
                .await?;
        }
        self.verify(pair, before.cluster_size + ready.len() as u32, count).await
    }

    /// Remove brokers; partitions stay where they are.
    #[instrument(skip_all, fields(brokers = ?ids, ?mode))]
    pub async fn scale_down(&self, pair: &RegionPair, ids: &[NodeId], mode: RemovalMode) -> Result<ClusterTopology> {
        let before = self.current(pair).await?;
        {
            let management = pair.primary.open_management(self.tunnel_retry).await?;
            self.topology.remove_brokers(management.endpoint(), ids, mode).await?;
        }
        let size = before.cluster_size.saturating_sub(ids.len() as u32);
        self.verify(pair, size, before.partitions_count).await
    }
}
