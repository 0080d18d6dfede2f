//! # Cluster Orchestrator
//! Topology reconfiguration orchestrator for a replicated, partitioned broker
//! cluster stretched across two independent regions.
//!
//! The orchestrator talks to the broker control plane over HTTP, submits
//! topology changes (add/remove brokers, resize partitions, enable/disable
//! exporters), waits for the cluster to converge, and sequences those
//! operations into failover, failback and scaling procedures.
//!
//! # Layers
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │     saga (failover/back,     │
//!                 │        scaling procedures)   │
//!                 └──┬───────────┬───────────┬───┘
//!                    │           │           │
//!          ┌─────────▼──┐  ┌─────▼─────┐  ┌──▼────────┐
//!          │  topology  │  │  exporter │  │  backup   │
//!          │   driver   │  │ controller│  │  store    │
//!          └─────┬──────┘  └─────┬─────┘  └──┬────────┘
//!                │               │           │
//!          ┌─────▼───────────────▼──┐   ┌────▼───────┐
//!          │ control (ControlPlane) │   │  poller /  │
//!          │   + http transport     │   │   retry    │
//!          └────────────────────────┘   └────────────┘
//! ```
//!
//! External collaborators (the orchestration platform, the deployment
//! manager, the search store) sit behind traits: [`platform::Platform`],
//! [`deployment::Deployer`] and [`backup::BackupStore`]. With the
//! `test-utilities` feature, the `mock` module provides in-memory versions of
//! all of them.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cluster_orchestrator::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     cluster_orchestrator::telemetry::init_logging(LogFormat::from_env())
//!         .map_err(|e| e as Box<dyn std::error::Error>)?;
//!
//!     let config = OrchestratorConfig::from_env()?;
//!     let control: Arc<dyn ControlPlane> = Arc::new(HttpControlClient::from_config(&config));
//!     let driver = TopologyDriver::new(control, &config);
//!
//!     let management = Endpoint::new("127.0.0.1", 9600);
//!     let outcome = driver.resize_partitions(&management, 12, 4).await?;
//!     println!("change {} completed", outcome.change_id);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod backup;
pub mod config;
pub mod constants;
pub mod control;
pub mod deployment;
pub mod error;
pub mod exporter;
pub mod http;
pub mod invariant;
pub mod metrics;
#[cfg(any(test, feature = "test-utilities"))]
pub mod mock;
pub mod platform;
pub mod poller;
pub mod readiness;
pub mod retry;
pub mod saga;
pub mod telemetry;
pub mod topology;
pub mod tunnel;
pub mod types;

pub mod prelude {
    //! Commonly used orchestrator types.
    pub use crate::backup::{BackupRecord, BackupStore, HttpBackupStore, RepositorySettings};
    pub use crate::config::{OrchestratorConfig, OrchestratorProfile};
    pub use crate::control::{
        ClusterState, ClusterTopology, ControlPlane, ExporterStatus, HttpControlClient,
        TopologyChangeRequest, TopologyChangeResponse,
    };
    pub use crate::deployment::{ContactPoints, Deployer, ReleaseValues};
    pub use crate::error::{ErrorClass, OrchestratorError, Result};
    pub use crate::exporter::ExporterController;
    pub use crate::poller::{Poll, PollPolicy};
    pub use crate::readiness::{BrokerLayout, ReadyBrokers};
    pub use crate::saga::{FailbackPlan, Saga, SagaState, ScaleProcedure, SmokeCheck};
    pub use crate::telemetry::LogFormat;
    pub use crate::topology::{RemovalMode, TopologyDriver};
    pub use crate::types::{
        Access, ClusterHandle, Endpoint, ExporterId, NodeId, RegionIndex, RegionPair,
    };
}
