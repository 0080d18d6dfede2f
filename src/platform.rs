//! Orchestration-platform seam.
//!
//! The orchestrator needs three things from the platform that runs the
//! brokers: the lifecycle phase of a named member, whether a service exists,
//! and a port-forward to a service. [`KubectlPlatform`] provides them by
//! shelling out to `kubectl`.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::constants::PORT_FORWARD_READY_TIMEOUT_SECS;
use crate::error::{OrchestratorError, Result};
use crate::types::Endpoint;

/// Lifecycle phase of a workload member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberPhase {
    Pending,
    /// The single canonical schedulable state.
    Running,
    Succeeded,
    Failed,
    /// The member does not exist (yet).
    Absent,
    Unknown,
}

impl FromStr for MemberPhase {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim() {
            "Pending" => MemberPhase::Pending,
            "Running" => MemberPhase::Running,
            "Succeeded" => MemberPhase::Succeeded,
            "Failed" => MemberPhase::Failed,
            "" => MemberPhase::Absent,
            _ => MemberPhase::Unknown,
        })
    }
}

impl fmt::Display for MemberPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An open port-forward. Closing is idempotent.
pub trait PortForward: Send {
    fn local_endpoint(&self) -> &Endpoint;
    fn close(&mut self);
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn member_phase(&self, member: &str) -> Result<MemberPhase>;
    async fn service_exists(&self, service: &str) -> Result<bool>;
    async fn port_forward(&self, service: &str, remote_port: u16) -> Result<Box<dyn PortForward>>;
}

/// [`Platform`] backed by the `kubectl` CLI for one namespace.
#[derive(Debug, Clone)]
pub struct KubectlPlatform {
    namespace: String,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
}

impl KubectlPlatform {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kubeconfig: None,
            context: None,
        }
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("kubectl");
        if let Some(path) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(path);
        }
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.arg("--namespace").arg(&self.namespace);
        cmd.stdin(Stdio::null());
        cmd
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.contains("not found")
}

/// Extract the local address from a `kubectl port-forward` banner line,
/// e.g. `Forwarding from 127.0.0.1:43567 -> 9600`.
pub fn parse_forwarding_line(line: &str) -> Option<Endpoint> {
    let rest = line.trim().strip_prefix("Forwarding from ")?;
    let (local, _) = rest.split_once(" -> ")?;
    let (host, port) = local.rsplit_once(':')?;
    if host.starts_with('[') {
        return None;
    }
    Some(Endpoint::new(host, port.parse().ok()?))
}

async fn read_banner(
    lines: &mut Lines<BufReader<ChildStdout>>,
) -> std::io::Result<Option<Endpoint>> {
    while let Some(line) = lines.next_line().await? {
        if let Some(endpoint) = parse_forwarding_line(&line) {
            return Ok(Some(endpoint));
        }
    }
    Ok(None)
}

#[async_trait]
impl Platform for KubectlPlatform {
    async fn member_phase(&self, member: &str) -> Result<MemberPhase> {
        let output = self
            .command()
            .args(["get", "pod", member, "-o", "jsonpath={.status.phase}"])
            .output()
            .await?;
        if output.status.success() {
            let phase = String::from_utf8_lossy(&output.stdout)
                .parse()
                .unwrap_or(MemberPhase::Unknown);
            return Ok(phase);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            Ok(MemberPhase::Absent)
        } else {
            Err(OrchestratorError::Unavailable {
                operation: "get member phase",
                endpoint: format!("{}/{}", self.namespace, member),
                status: None,
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn service_exists(&self, service: &str) -> Result<bool> {
        let output = self
            .command()
            .args(["get", "service", service, "-o", "name"])
            .output()
            .await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            Ok(false)
        } else {
            Err(OrchestratorError::Unavailable {
                operation: "look up service",
                endpoint: format!("{}/{}", self.namespace, service),
                status: None,
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn port_forward(&self, service: &str, remote_port: u16) -> Result<Box<dyn PortForward>> {
        let resource = format!("{}/service/{}", self.namespace, service);
        let target = format!("service/{service}");
        let ports = format!(":{remote_port}");
        let mut child = self
            .command()
            .args(["port-forward", target.as_str(), ports.as_str()])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| OrchestratorError::ResourceUnavailable {
            resource: resource.clone(),
            reason: "port-forward stdout not captured".to_string(),
            retriable: false,
        })?;
        let mut lines = BufReader::new(stdout).lines();

        let banner = tokio::time::timeout(
            Duration::from_secs(PORT_FORWARD_READY_TIMEOUT_SECS),
            read_banner(&mut lines),
        )
        .await;

        let endpoint = match banner {
            Ok(Ok(Some(endpoint))) => endpoint,
            Ok(Ok(None)) => {
                return Err(OrchestratorError::ResourceUnavailable {
                    resource,
                    reason: "port-forward exited before forwarding".to_string(),
                    retriable: true,
                });
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(OrchestratorError::ResourceUnavailable {
                    resource,
                    reason: format!("no forwarding banner within {PORT_FORWARD_READY_TIMEOUT_SECS}s"),
                    retriable: true,
                });
            }
        };

        // kubectl dies on a closed stdout pipe; keep draining it.
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

        debug!(%resource, local = %endpoint, "Port-forward established");
        Ok(Box::new(KubectlPortForward {
            child: Some(child),
            endpoint,
        }))
    }
}

struct KubectlPortForward {
    child: Option<Child>,
    endpoint: Endpoint,
}

impl PortForward for KubectlPortForward {
    fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!(local = %self.endpoint, error = %e, "Failed to stop port-forward");
            }
        }
    }
}

impl Drop for KubectlPortForward {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forwarding_line() {
        assert_eq!(
            parse_forwarding_line("Forwarding from 127.0.0.1:43567 -> 9600"),
            Some(Endpoint::new("127.0.0.1", 43567))
        );
        assert_eq!(parse_forwarding_line("Forwarding from [::1]:43567 -> 9600"), None);
        assert_eq!(parse_forwarding_line("Handling connection for 43567"), None);
        assert_eq!(parse_forwarding_line("Forwarding from 127.0.0.1:abc -> 9600"), None);
    }

    #[test]
    fn test_member_phase_parse() {
        assert_eq!("Running".parse::<MemberPhase>().unwrap(), MemberPhase::Running);
        assert_eq!("Pending\n".parse::<MemberPhase>().unwrap(), MemberPhase::Pending);
        assert_eq!("".parse::<MemberPhase>().unwrap(), MemberPhase::Absent);
        assert_eq!("Evicted".parse::<MemberPhase>().unwrap(), MemberPhase::Unknown);
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found("Error from server (NotFound): pods \"camunda-zeebe-9\" not found"));
        assert!(!is_not_found("Unable to connect to the server: dial tcp: i/o timeout"));
    }
}
