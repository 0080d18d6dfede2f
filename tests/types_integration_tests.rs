//! Integration tests for identifiers and region handles.

use std::sync::Arc;

use cluster_orchestrator::mock::{MockPlatform, test_handle};
use cluster_orchestrator::prelude::*;

// ============================================================================
// Identifiers
// ============================================================================

#[test]
fn test_node_ids_serialize_as_plain_numbers() {
    let ids = vec![NodeId(0), NodeId(7)];
    assert_eq!(serde_json::to_string(&ids).unwrap(), "[0,7]");
    let parsed: Vec<NodeId> = serde_json::from_str("[2,9]").unwrap();
    assert_eq!(parsed[0].region(), RegionIndex::Zero);
    assert_eq!(parsed[1].region(), RegionIndex::One);
}

#[test]
fn test_exporter_ids_per_region() {
    let zero = ExporterId::for_region("camundaregion", RegionIndex::Zero).unwrap();
    let one = ExporterId::for_region("camundaregion", RegionIndex::One).unwrap();
    assert_eq!(zero.as_str(), "camundaregion0");
    assert_eq!(one.to_string(), "camundaregion1");
    assert!(ExporterId::for_region("Camunda Region", RegionIndex::Zero).is_err());
}

#[test]
fn test_exporter_id_json_is_validated() {
    let id: ExporterId = serde_json::from_str("\"camundaregion1\"").unwrap();
    assert_eq!(id.as_str(), "camundaregion1");
    assert!(serde_json::from_str::<ExporterId>("\"region/1\"").is_err());
}

#[test]
fn test_endpoint_from_str() {
    let endpoint: Endpoint = "camunda-zeebe-gateway:9600".parse().unwrap();
    assert_eq!(endpoint.port, 9600);
    assert_eq!(
        endpoint.url("/actuator/cluster"),
        "http://camunda-zeebe-gateway:9600/actuator/cluster"
    );
    assert!("no-port".parse::<Endpoint>().is_err());
    assert!(":9600".parse::<Endpoint>().is_err());
}

// ============================================================================
// Region pairs
// ============================================================================

#[test]
fn test_region_pair_routes_by_index() {
    let platform = Arc::new(MockPlatform::new());
    let pair = RegionPair::new(
        test_handle(RegionIndex::Zero, platform.clone()),
        test_handle(RegionIndex::One, platform),
    )
    .unwrap();

    assert_eq!(pair.get(RegionIndex::Zero).region, "eu-west-2");
    assert_eq!(pair.get(RegionIndex::One).cluster_name, "cluster-paris");
    assert_eq!(pair.namespaces(), ["camunda-primary", "camunda-secondary"]);
}

#[test]
fn test_region_pair_rejects_swapped_or_shared_namespaces() {
    let platform = Arc::new(MockPlatform::new());
    let zero = test_handle(RegionIndex::Zero, platform.clone());
    let one = test_handle(RegionIndex::One, platform);

    let err = RegionPair::new(one.clone(), zero.clone()).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);

    let mut shared = one;
    shared.namespace = zero.namespace.clone();
    let err = RegionPair::new(zero, shared).unwrap_err();
    assert!(err.to_string().contains("distinct namespaces"));
}
