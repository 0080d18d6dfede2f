//! Scoped access to region endpoints.
//!
//! [`acquire`] turns an [`Access`] into a [`ScopedEndpoint`]. For
//! port-forwarded access the service must exist (checked once), then the
//! port-forward is attempted under a fixed retry policy. The forward is
//! closed when the [`ScopedEndpoint`] drops, on every path out of the
//! caller's scope.

use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use crate::metrics;
use crate::platform::{Platform, PortForward};
use crate::retry::{self, FixedRetry};
use crate::types::{Access, ClusterHandle, Endpoint};

/// An endpoint usable for the lifetime of this value.
pub struct ScopedEndpoint {
    endpoint: Endpoint,
    forward: Option<Box<dyn PortForward>>,
}

impl ScopedEndpoint {
    /// Wrap a directly routable endpoint; dropping it releases nothing.
    pub fn direct(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            forward: None,
        }
    }

    fn forwarded(forward: Box<dyn PortForward>) -> Self {
        metrics::OPEN_TUNNELS.inc();
        Self {
            endpoint: forward.local_endpoint().clone(),
            forward: Some(forward),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_tunnel(&self) -> bool {
        self.forward.is_some()
    }
}

impl std::fmt::Debug for ScopedEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedEndpoint")
            .field("endpoint", &self.endpoint)
            .field("tunnel", &self.forward.is_some())
            .finish()
    }
}

impl Drop for ScopedEndpoint {
    fn drop(&mut self) {
        if let Some(mut forward) = self.forward.take() {
            forward.close();
            metrics::OPEN_TUNNELS.dec();
            debug!(local = %self.endpoint, "Tunnel closed");
        }
    }
}

/// Resolve `access` on `platform`.
pub async fn acquire(
    platform: &dyn Platform,
    access: &Access,
    policy: FixedRetry,
) -> Result<ScopedEndpoint> {
    let (service, remote_port) = match access {
        Access::Direct(endpoint) => return Ok(ScopedEndpoint::direct(endpoint.clone())),
        Access::PortForward {
            service,
            remote_port,
        } => (service.as_str(), *remote_port),
    };

    if !platform.service_exists(service).await? {
        return Err(OrchestratorError::ResourceUnavailable {
            resource: format!("service {service}"),
            reason: "service does not exist".to_string(),
            retriable: false,
        });
    }

    let forward = retry::with_fixed_policy(
        "port-forward",
        policy,
        || async move { platform.port_forward(service, remote_port).await },
        |e| e.is_retriable(),
    )
    .await?;

    info!(service, remote_port, local = %forward.local_endpoint(), "Tunnel open");
    Ok(ScopedEndpoint::forwarded(forward))
}

impl ClusterHandle {
    /// Broker management API of this region.
    pub async fn open_management(&self, policy: FixedRetry) -> Result<ScopedEndpoint> {
        acquire(self.platform.as_ref(), &self.management, policy).await
    }

    /// Gateway REST API of this region.
    pub async fn open_gateway(&self, policy: FixedRetry) -> Result<ScopedEndpoint> {
        acquire(self.platform.as_ref(), &self.gateway, policy).await
    }

    /// Search store API of this region.
    pub async fn open_data_store(&self, policy: FixedRetry) -> Result<ScopedEndpoint> {
        acquire(self.platform.as_ref(), &self.data_store, policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::mock::MockPlatform;
    use std::time::Duration;

    fn policy() -> FixedRetry {
        FixedRetry::new(5, Duration::from_secs(15))
    }

    fn forwarded() -> Access {
        Access::PortForward {
            service: "camunda-zeebe-gateway".to_string(),
            remote_port: 9600,
        }
    }

    #[tokio::test]
    async fn test_direct_access_needs_no_platform_call() {
        let platform = MockPlatform::new();
        let scoped = acquire(&platform, &Access::Direct(Endpoint::new("10.0.0.5", 9600)), policy())
            .await
            .unwrap();
        assert_eq!(scoped.endpoint(), &Endpoint::new("10.0.0.5", 9600));
        assert!(!scoped.is_tunnel());
        assert_eq!(platform.port_forward_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_service_fails_without_retry() {
        let platform = MockPlatform::new();
        let err = acquire(&platform, &forwarded(), policy()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::ResourceAcquisition);
        assert!(!err.is_retriable());
        assert_eq!(platform.port_forward_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_forward_retried_then_released_on_drop() {
        let platform = MockPlatform::new();
        platform.add_service("camunda-zeebe-gateway");
        platform.fail_next_port_forwards(2);

        let start = tokio::time::Instant::now();
        {
            let scoped = acquire(&platform, &forwarded(), policy()).await.unwrap();
            assert!(scoped.is_tunnel());
            assert_eq!(platform.open_forwards(), 1);
        }
        assert_eq!(platform.open_forwards(), 0);
        assert_eq!(platform.port_forward_calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_forward_exhausts_budget() {
        let platform = MockPlatform::new();
        platform.add_service("camunda-zeebe-gateway");
        platform.fail_next_port_forwards(10);

        let err = acquire(&platform, &forwarded(), policy()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::ResourceAcquisition);
        assert_eq!(platform.port_forward_calls(), 5);
        assert_eq!(platform.open_forwards(), 0);
    }

    #[tokio::test]
    async fn test_tunnel_released_on_error_path() {
        async fn failing_step(platform: &MockPlatform) -> Result<()> {
            let _scoped = acquire(platform, &forwarded(), policy()).await?;
            Err(OrchestratorError::invariant("test", "step failed while tunnel open"))
        }

        let platform = MockPlatform::new();
        platform.add_service("camunda-zeebe-gateway");
        assert!(failing_step(&platform).await.is_err());
        assert_eq!(platform.open_forwards(), 0);
        assert_eq!(platform.port_forward_calls(), 1);
    }
}
