//! Core identifiers and cluster handles.
//!
//! Broker node ids encode their home region by parity: region index 0 owns
//! the even ids, region index 1 the odd ids. [`NodeId::region`] and
//! [`crate::readiness::BrokerLayout`] are the only places that mapping is
//! computed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::deployment::Deployer;
use crate::error::{OrchestratorError, Result};
use crate::platform::Platform;

/// Broker node id. The same id always refers to the same region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Region that owns this id.
    pub fn region(self) -> RegionIndex {
        if self.0 % 2 == 0 {
            RegionIndex::Zero
        } else {
            RegionIndex::One
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        NodeId(id)
    }
}

/// Index of a region within the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegionIndex {
    /// Primary region, even node ids.
    Zero,
    /// Secondary region, odd node ids.
    One,
}

impl RegionIndex {
    pub fn as_u32(self) -> u32 {
        match self {
            RegionIndex::Zero => 0,
            RegionIndex::One => 1,
        }
    }

    /// The other region of the pair.
    pub fn other(self) -> RegionIndex {
        match self {
            RegionIndex::Zero => RegionIndex::One,
            RegionIndex::One => RegionIndex::Zero,
        }
    }
}

impl fmt::Display for RegionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

impl TryFrom<u32> for RegionIndex {
    type Error = OrchestratorError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(RegionIndex::Zero),
            1 => Ok(RegionIndex::One),
            other => Err(OrchestratorError::Config(format!(
                "region index must be 0 or 1, got {other}"
            ))),
        }
    }
}

/// Identifier of a configured exporter, e.g. `camundaregion0`.
///
/// Only lowercase ASCII letters, digits, `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExporterId(String);

impl ExporterId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "exporter id must not be empty".to_string(),
            ));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
        {
            return Err(OrchestratorError::InvalidRequest(format!(
                "exporter id '{id}' contains invalid character '{bad}'"
            )));
        }
        Ok(ExporterId(id))
    }

    /// Exporter id for a region: prefix followed by the region index.
    pub fn for_region(prefix: &str, region: RegionIndex) -> Result<Self> {
        Self::new(format!("{prefix}{}", region.as_u32()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExporterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ExporterId {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ExporterId {
    type Error = OrchestratorError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ExporterId> for String {
    fn from(id: ExporterId) -> Self {
        id.0
    }
}

/// A reachable `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Plain-HTTP URL for `path` on this endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| OrchestratorError::Config(format!("endpoint '{s}' has no port")))?;
        let port = port
            .parse()
            .map_err(|_| OrchestratorError::Config(format!("endpoint '{s}' has invalid port")))?;
        if host.is_empty() {
            return Err(OrchestratorError::Config(format!("endpoint '{s}' has no host")));
        }
        Ok(Endpoint::new(host, port))
    }
}

/// How an endpoint of a region is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Already routable from where the orchestrator runs.
    Direct(Endpoint),
    /// Reached through a platform port-forward to a named service.
    PortForward { service: String, remote_port: u16 },
}

/// Everything needed to operate on one region.
#[derive(Clone)]
pub struct ClusterHandle {
    pub region: String,
    pub index: RegionIndex,
    pub cluster_name: String,
    pub namespace: String,
    /// Broker management API of the region.
    pub management: Access,
    /// Gateway REST API of the region.
    pub gateway: Access,
    /// Search store HTTP API of the region.
    pub data_store: Access,
    pub platform: Arc<dyn Platform>,
    pub deployer: Arc<dyn Deployer>,
}

impl fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("region", &self.region)
            .field("index", &self.index)
            .field("cluster_name", &self.cluster_name)
            .field("namespace", &self.namespace)
            .field("management", &self.management)
            .field("gateway", &self.gateway)
            .field("data_store", &self.data_store)
            .finish_non_exhaustive()
    }
}

/// The two regions, passed explicitly to every procedure.
#[derive(Debug, Clone)]
pub struct RegionPair {
    pub primary: ClusterHandle,
    pub secondary: ClusterHandle,
}

impl RegionPair {
    /// Build a pair, checking the handles sit at index 0 and 1 in distinct
    /// namespaces.
    pub fn new(primary: ClusterHandle, secondary: ClusterHandle) -> Result<Self> {
        if primary.index != RegionIndex::Zero || secondary.index != RegionIndex::One {
            return Err(OrchestratorError::Config(format!(
                "primary must have region index 0 and secondary index 1, got {} and {}",
                primary.index, secondary.index
            )));
        }
        if primary.namespace == secondary.namespace {
            return Err(OrchestratorError::Config(format!(
                "regions must use distinct namespaces, both use '{}'",
                primary.namespace
            )));
        }
        Ok(Self { primary, secondary })
    }

    pub fn get(&self, index: RegionIndex) -> &ClusterHandle {
        match index {
            RegionIndex::Zero => &self.primary,
            RegionIndex::One => &self.secondary,
        }
    }

    /// Namespaces indexed by region.
    pub fn namespaces(&self) -> [&str; 2] {
        [&self.primary.namespace, &self.secondary.namespace]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parity() {
        assert_eq!(NodeId(0).region(), RegionIndex::Zero);
        assert_eq!(NodeId(6).region(), RegionIndex::Zero);
        assert_eq!(NodeId(7).region(), RegionIndex::One);
        assert_eq!(NodeId(11).region(), RegionIndex::One);
    }

    #[test]
    fn test_region_index_other() {
        assert_eq!(RegionIndex::Zero.other(), RegionIndex::One);
        assert_eq!(RegionIndex::One.other(), RegionIndex::Zero);
        assert!(RegionIndex::try_from(2).is_err());
        assert_eq!(RegionIndex::try_from(1).unwrap(), RegionIndex::One);
    }

    #[test]
    fn test_exporter_id_validation() {
        assert!(ExporterId::new("camundaregion0").is_ok());
        assert!(ExporterId::new("").is_err());
        assert!(ExporterId::new("Camunda Region").is_err());
        assert_eq!(
            ExporterId::for_region("camundaregion", RegionIndex::One)
                .unwrap()
                .as_str(),
            "camundaregion1"
        );
    }

    #[test]
    fn test_exporter_id_serde_rejects_invalid() {
        let ok: ExporterId = serde_json::from_str("\"elasticsearchregion0\"").unwrap();
        assert_eq!(ok.as_str(), "elasticsearchregion0");
        assert!(serde_json::from_str::<ExporterId>("\"BAD ID\"").is_err());
    }

    #[test]
    fn test_endpoint_parse_and_url() {
        let ep: Endpoint = "127.0.0.1:9600".parse().unwrap();
        assert_eq!(ep, Endpoint::new("127.0.0.1", 9600));
        assert_eq!(ep.url("/actuator/cluster"), "http://127.0.0.1:9600/actuator/cluster");
        assert!("nohost".parse::<Endpoint>().is_err());
        assert!(":9600".parse::<Endpoint>().is_err());
        assert!("host:port".parse::<Endpoint>().is_err());
    }
}
