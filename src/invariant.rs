//! Topology invariants.
//!
//! Closing assertions of every scaling, failover and failback procedure.
//! Region parity (even ids in region 0, odd ids in region 1) comes from the
//! brokers' round-robin placement, not from a documented contract, so it is
//! checked against where each broker actually runs. A violation means
//! placement changed and someone needs to look.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::control::{ClusterTopology, ControlPlane};
use crate::error::{OrchestratorError, Result};
use crate::types::{Endpoint, NodeId, RegionIndex};

/// Fetch the gateway topology and check sizes and partition completeness.
///
/// Asserts `clusterSize` and `partitionsCount` equal the expectations, that
/// the gateway lists that many brokers, and that every partition id
/// `1..=expected_partitions` is hosted by some broker.
pub async fn verify(
    control: &dyn ControlPlane,
    gateway: &Endpoint,
    expected_size: u32,
    expected_partitions: u32,
) -> Result<ClusterTopology> {
    let topology = control.get_topology(gateway).await?;
    check_counts(&topology, expected_size, expected_partitions)?;
    info!(
        %gateway,
        cluster_size = topology.cluster_size,
        partitions = topology.partitions_count,
        "Topology verified"
    );
    Ok(topology)
}

pub fn check_counts(topology: &ClusterTopology, expected_size: u32, expected_partitions: u32) -> Result<()> {
    if topology.cluster_size != expected_size {
        return Err(OrchestratorError::invariant(
            "cluster-size",
            format!("expected clusterSize {expected_size}, got {}", topology.cluster_size),
        ));
    }
    if topology.partitions_count != expected_partitions {
        return Err(OrchestratorError::invariant(
            "partition-count",
            format!(
                "expected partitionsCount {expected_partitions}, got {}",
                topology.partitions_count
            ),
        ));
    }
    if topology.brokers.len() as u32 != expected_size {
        return Err(OrchestratorError::invariant(
            "brokers-listed",
            format!("expected {expected_size} brokers listed, got {}", topology.brokers.len()),
        ));
    }

    let hosted = topology.partition_ids();
    let missing: Vec<String> = (1..=expected_partitions)
        .filter(|id| !hosted.contains(id))
        .map(|id| id.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(OrchestratorError::invariant(
            "partitions-hosted",
            format!("partitions [{}] are not hosted by any broker", missing.join(",")),
        ));
    }
    Ok(())
}

/// Region a broker runs in, judged by its host name containing a namespace.
fn hosting_region(host: &str, namespaces: [&str; 2]) -> Option<RegionIndex> {
    let in_ns = |ns: &str| host.contains(&format!(".{ns}."));
    match (in_ns(namespaces[0]), in_ns(namespaces[1])) {
        (true, false) => Some(RegionIndex::Zero),
        (false, true) => Some(RegionIndex::One),
        _ => None,
    }
}

/// Every broker runs in the region its id's parity names.
pub fn check_region_parity(topology: &ClusterTopology, namespaces: [&str; 2]) -> Result<()> {
    for broker in &topology.brokers {
        let expected = broker.node_id.region();
        match hosting_region(&broker.host, namespaces) {
            Some(actual) if actual == expected => {
                debug!(broker = %broker.node_id, region = %actual, "Parity holds");
            }
            Some(actual) => {
                return Err(OrchestratorError::invariant(
                    "region-parity",
                    format!(
                        "broker {} runs in region {actual} ({}) but its id belongs to region {expected}; \
                         broker placement may have changed, investigate",
                        broker.node_id, broker.host
                    ),
                ));
            }
            None => {
                return Err(OrchestratorError::invariant(
                    "region-parity",
                    format!(
                        "broker {} host {} matches neither namespace {} nor {}",
                        broker.node_id, broker.host, namespaces[0], namespaces[1]
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// After a failover only the surviving region's ids remain.
pub fn check_survivor_ids(ids: &BTreeSet<NodeId>, survivor: RegionIndex) -> Result<()> {
    let foreign: Vec<String> = ids
        .iter()
        .filter(|id| id.region() != survivor)
        .map(|id| id.to_string())
        .collect();
    if !foreign.is_empty() {
        return Err(OrchestratorError::invariant(
            "survivor-parity",
            format!(
                "brokers [{}] do not belong to surviving region {survivor}; investigate",
                foreign.join(",")
            ),
        ));
    }
    Ok(())
}

/// Both regions host the same number of brokers.
pub fn check_region_balance(topology: &ClusterTopology) -> Result<()> {
    let (zero, one): (Vec<NodeId>, Vec<NodeId>) = topology
        .brokers
        .iter()
        .map(|b| b.node_id)
        .partition(|id| id.region() == RegionIndex::Zero);
    if zero.len() != one.len() {
        return Err(OrchestratorError::invariant(
            "region-balance",
            format!("region 0 has {} brokers, region 1 has {}", zero.len(), one.len()),
        ));
    }
    Ok(())
}

/// Full dual-region check: counts, partition completeness, parity, balance.
pub async fn verify_dual_region(
    control: &dyn ControlPlane,
    gateway: &Endpoint,
    namespaces: [&str; 2],
    expected_size: u32,
    expected_partitions: u32,
) -> Result<ClusterTopology> {
    let topology = verify(control, gateway, expected_size, expected_partitions).await?;
    check_region_parity(&topology, namespaces)?;
    check_region_balance(&topology)?;
    Ok(topology)
}
