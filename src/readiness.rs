//! Readiness gate.
//!
//! A broker id may only appear in an `add` topology change after its member
//! reported `Running`. [`ReadyBrokers`] is the proof: it can only be built by
//! [`await_brokers_running`], and the topology driver's add operations
//! require one.

use std::collections::BTreeSet;

use tracing::info;

use crate::error::{OrchestratorError, Result};
use crate::platform::{MemberPhase, Platform};
use crate::poller::{ErrorTolerance, Poll, PollPolicy, await_condition};
use crate::types::{ClusterHandle, NodeId, RegionIndex};

/// Mapping between node ids, regions and member names.
///
/// Region `r` ordinal `i` is node id `2 * i + r` and member `{release}-zeebe-{i}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerLayout {
    pub release: String,
    pub brokers_per_region: u32,
}

impl BrokerLayout {
    pub fn new(release: impl Into<String>, brokers_per_region: u32) -> Self {
        Self {
            release: release.into(),
            brokers_per_region,
        }
    }

    pub fn cluster_size(&self) -> u32 {
        self.brokers_per_region * 2
    }

    pub fn node_id(&self, region: RegionIndex, ordinal: u32) -> NodeId {
        NodeId(2 * ordinal + region.as_u32())
    }

    pub fn ordinal(&self, id: NodeId) -> u32 {
        id.get() / 2
    }

    pub fn member_name_for_ordinal(&self, ordinal: u32) -> String {
        format!("{}-zeebe-{}", self.release, ordinal)
    }

    pub fn member_name(&self, id: NodeId) -> String {
        self.member_name_for_ordinal(self.ordinal(id))
    }

    /// Node ids of `region` for ordinals `0..brokers_per_region`.
    pub fn region_node_ids(&self, region: RegionIndex) -> Vec<NodeId> {
        (0..self.brokers_per_region)
            .map(|ordinal| self.node_id(region, ordinal))
            .collect()
    }

    /// Node ids of both regions.
    pub fn all_node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = [RegionIndex::Zero, RegionIndex::One]
            .iter()
            .flat_map(|r| self.region_node_ids(*r))
            .collect();
        ids.sort();
        ids
    }
}

/// Broker ids whose members were observed `Running`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyBrokers {
    ids: BTreeSet<NodeId>,
}

impl ReadyBrokers {
    /// Token for ids observed outside the member gate, e.g. a simulated cluster.
    #[cfg(any(test, feature = "test-utilities"))]
    pub(crate) fn from_observed(ids: BTreeSet<NodeId>) -> Self {
        Self { ids }
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Combine tokens from several regions.
    pub fn merge(mut self, other: ReadyBrokers) -> ReadyBrokers {
        self.ids.extend(other.ids);
        self
    }
}

/// Poll `member` until it reports `Running`.
///
/// Platform lookups that fail transiently count as "not yet".
pub async fn await_member_running(
    platform: &dyn Platform,
    member: &str,
    policy: PollPolicy,
) -> Result<()> {
    let what = format!("member {member} running");
    await_condition(&what, policy, ErrorTolerance::TolerateTransient, || async move {
        match platform.member_phase(member).await? {
            MemberPhase::Running => Ok(Poll::Ready(())),
            phase => Ok(Poll::Pending(format!("phase {phase}"))),
        }
    })
    .await
}

/// Gate `ids` of `handle`'s region: every id must belong to the region and
/// its member must reach `Running`.
pub async fn await_brokers_running(
    handle: &ClusterHandle,
    layout: &BrokerLayout,
    ids: &[NodeId],
    policy: PollPolicy,
) -> Result<ReadyBrokers> {
    if let Some(foreign) = ids.iter().find(|id| id.region() != handle.index) {
        return Err(OrchestratorError::InvalidRequest(format!(
            "broker {foreign} does not belong to region {} ({})",
            handle.index, handle.region
        )));
    }

    for id in ids {
        let member = layout.member_name(*id);
        await_member_running(handle.platform.as_ref(), &member, policy).await?;
        info!(region = %handle.region, broker = %id, member = %member, "Member running");
    }

    Ok(ReadyBrokers {
        ids: ids.iter().copied().collect(),
    })
}

/// Gate ids spread over both regions, routing each to its own region's platform.
pub async fn await_pair_brokers_running(
    pair: &crate::types::RegionPair,
    layout: &BrokerLayout,
    ids: &[NodeId],
    policy: PollPolicy,
) -> Result<ReadyBrokers> {
    let mut ready = ReadyBrokers {
        ids: BTreeSet::new(),
    };
    for region in [RegionIndex::Zero, RegionIndex::One] {
        let region_ids: Vec<NodeId> = ids.iter().copied().filter(|id| id.region() == region).collect();
        if region_ids.is_empty() {
            continue;
        }
        let gated = await_brokers_running(pair.get(region), layout, &region_ids, policy).await?;
        ready = ready.merge(gated);
    }
    Ok(ready)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::mock::{MockPlatform, test_handle};
    use std::sync::Arc;
    use std::time::Duration;

    fn layout() -> BrokerLayout {
        BrokerLayout::new("camunda", 4)
    }

    fn policy() -> PollPolicy {
        PollPolicy::new(20, Duration::from_secs(15))
    }

    #[test]
    fn test_layout_mapping() {
        let layout = layout();
        assert_eq!(layout.node_id(RegionIndex::Zero, 3), NodeId(6));
        assert_eq!(layout.node_id(RegionIndex::One, 3), NodeId(7));
        assert_eq!(layout.member_name(NodeId(7)), "camunda-zeebe-3");
        assert_eq!(layout.member_name(NodeId(10)), "camunda-zeebe-5");
        assert_eq!(
            layout.region_node_ids(RegionIndex::One),
            vec![NodeId(1), NodeId(3), NodeId(5), NodeId(7)]
        );
        assert_eq!(layout.all_node_ids().len(), 8);
        assert_eq!(layout.cluster_size(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_becomes_running() {
        let platform = MockPlatform::new();
        platform.script_member(
            "camunda-zeebe-4",
            [MemberPhase::Absent, MemberPhase::Pending, MemberPhase::Running],
        );
        await_member_running(&platform, "camunda-zeebe-4", policy())
            .await
            .unwrap();
        assert_eq!(platform.phase_calls("camunda-zeebe-4"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_never_running_times_out() {
        let platform = MockPlatform::new();
        platform.script_member("camunda-zeebe-4", [MemberPhase::Pending]);
        let err = await_member_running(&platform, "camunda-zeebe-4", policy())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::ConvergenceTimeout);
        assert!(err.to_string().contains("Pending"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_rejects_foreign_region_ids() {
        let platform = Arc::new(MockPlatform::new());
        let handle = test_handle(RegionIndex::Zero, platform.clone());
        let err = await_brokers_running(&handle, &layout(), &[NodeId(8), NodeId(9)], policy())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
        assert_eq!(platform.phase_calls("camunda-zeebe-4"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_gate_routes_by_parity() {
        let primary = Arc::new(MockPlatform::new());
        let secondary = Arc::new(MockPlatform::new());
        for member in ["camunda-zeebe-4", "camunda-zeebe-5"] {
            primary.script_member(member, [MemberPhase::Running]);
            secondary.script_member(member, [MemberPhase::Pending, MemberPhase::Running]);
        }
        let pair = crate::types::RegionPair::new(
            test_handle(RegionIndex::Zero, primary.clone()),
            test_handle(RegionIndex::One, secondary.clone()),
        )
        .unwrap();

        let ids = [8, 9, 10, 11].map(NodeId);
        let ready = await_pair_brokers_running(&pair, &layout(), &ids, policy())
            .await
            .unwrap();
        assert_eq!(ready.ids().collect::<Vec<_>>(), ids.to_vec());
        assert_eq!(primary.phase_calls("camunda-zeebe-4"), 1);
        assert_eq!(secondary.phase_calls("camunda-zeebe-5"), 2);
    }
}
