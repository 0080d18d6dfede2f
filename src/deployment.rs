//! Deployment-manager seam and typed release values.
//!
//! Values are built as a [`ReleaseValues`] struct and only flattened to the
//! deployment manager's string-keyed `--set` / `--set-string` maps by
//! [`ReleaseValues::render`]. [`HelmDeployer`] runs the `helm` CLI.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::constants::{
    BROKER_CLUSTER_PORT, DATA_STORE_PORT, ENV_INITIAL_CONTACT_POINTS, ENV_SCHEMA_CREATION,
    RELEASE_ENV_BASE_INDEX,
};
use crate::error::{OrchestratorError, Result};
use crate::types::{ExporterId, RegionIndex};

/// Initial contact string shared by every broker of both regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactPoints(String);

impl ContactPoints {
    /// Contact points for a dual-region cluster of `cluster_size` brokers.
    ///
    /// Emits `{release}-zeebe-{i}.{release}-zeebe.{ns}.svc.cluster.local:26502`
    /// alternating region 0 and region 1 for `i in 0..cluster_size / 2`.
    pub fn generate(release: &str, ns0: &str, ns1: &str, cluster_size: u32) -> Result<Self> {
        if cluster_size % 2 != 0 {
            return Err(OrchestratorError::Config(format!(
                "cluster size {cluster_size} is odd; a dual-region cluster needs an even size"
            )));
        }
        if cluster_size < 4 {
            return Err(OrchestratorError::Config(format!(
                "cluster size {cluster_size} is too small; at least 4 brokers are required"
            )));
        }
        if ns0 == ns1 {
            return Err(OrchestratorError::Config(format!(
                "region namespaces must differ, both are '{ns0}'"
            )));
        }

        let points: Vec<String> = (0..cluster_size / 2)
            .flat_map(|i| {
                [ns0, ns1].map(|ns| {
                    format!("{release}-zeebe-{i}.{release}-zeebe.{ns}.svc.cluster.local:{BROKER_CLUSTER_PORT}")
                })
            })
            .collect();
        Ok(ContactPoints(points.join(",")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.split(',').count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContactPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Search store URL of a region, as exporters reach it.
pub fn data_store_url(release: &str, namespace: &str) -> String {
    format!("http://{release}-elasticsearch-master-hl.{namespace}.svc.cluster.local:{DATA_STORE_PORT}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallationType {
    #[default]
    Normal,
    /// Recreating a lost region while the other one keeps serving.
    FailBack,
}

impl InstallationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallationType::Normal => "normal",
            InstallationType::FailBack => "failBack",
        }
    }
}

/// An exporter and the store it writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterEndpoint {
    pub exporter: ExporterId,
    pub url: String,
}

impl ExporterEndpoint {
    fn env_name(&self) -> String {
        format!(
            "ZEEBE_BROKER_EXPORTERS_{}_ARGS_CONNECT_URL",
            self.exporter.as_str().to_ascii_uppercase().replace('-', "_")
        )
    }
}

/// Values of one region's release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseValues {
    pub release: String,
    pub region: RegionIndex,
    pub chart_version: Option<String>,
    pub values_files: Vec<PathBuf>,
    pub installation_type: InstallationType,
    /// Operate and Tasklist.
    pub web_apps_enabled: bool,
    pub schema_creation_enabled: bool,
    pub contact_points: ContactPoints,
    pub exporter_endpoints: Vec<ExporterEndpoint>,
    pub image_tag: Option<String>,
    /// Additional `--set` values, applied last.
    pub extra: BTreeMap<String, String>,
}

/// [`ReleaseValues`] flattened for the deployment manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedValues {
    pub set: BTreeMap<String, String>,
    pub set_string: BTreeMap<String, String>,
}

impl ReleaseValues {
    /// Regular install with every component enabled.
    pub fn new(release: impl Into<String>, region: RegionIndex, contact_points: ContactPoints) -> Self {
        Self {
            release: release.into(),
            region,
            chart_version: None,
            values_files: Vec::new(),
            installation_type: InstallationType::Normal,
            web_apps_enabled: true,
            schema_creation_enabled: true,
            contact_points,
            exporter_endpoints: Vec::new(),
            image_tag: None,
            extra: BTreeMap::new(),
        }
    }

    /// Recreate a region during failback: web apps off and, when the
    /// region's data will be restored from a snapshot, schema creation off.
    pub fn failback(mut self, restoring_from_backup: bool) -> Self {
        self.installation_type = InstallationType::FailBack;
        self.web_apps_enabled = false;
        self.schema_creation_enabled = !restoring_from_backup;
        self
    }

    /// Keep the healthy region serving while its peer is rebuilt: web apps
    /// off, schema creation on.
    pub fn without_web_apps(mut self) -> Self {
        self.installation_type = InstallationType::Normal;
        self.web_apps_enabled = false;
        self.schema_creation_enabled = true;
        self
    }

    /// Back to a regular install with web apps on.
    pub fn steady(mut self) -> Self {
        self.installation_type = InstallationType::Normal;
        self.web_apps_enabled = true;
        self.schema_creation_enabled = true;
        self
    }

    pub fn with_exporter(mut self, exporter: ExporterId, url: impl Into<String>) -> Self {
        self.exporter_endpoints.push(ExporterEndpoint {
            exporter,
            url: url.into(),
        });
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

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.release.is_empty() {
            return Err(OrchestratorError::Config("release name must not be empty".to_string()));
        }
        if self.contact_points.is_empty() {
            return Err(OrchestratorError::Config("contact points must not be empty".to_string()));
        }
        if let Some(key) = self.extra.keys().find(|k| k.trim().is_empty()) {
            return Err(OrchestratorError::Config(format!("extra value key '{key}' is blank")));
        }
        if self.image_tag.as_deref().is_some_and(str::is_empty) {
            return Err(OrchestratorError::Config("image tag must not be empty".to_string()));
        }
        Ok(())
    }

    /// Flatten to `--set` and `--set-string` maps.
    ///
    /// Environment overrides occupy `orchestration.env[N]` slots from
    /// [`RELEASE_ENV_BASE_INDEX`] upward in a fixed order.
    pub fn render(&self) -> Result<RenderedValues> {
        self.validate()?;
        let mut out = RenderedValues::default();

        if !self.web_apps_enabled {
            out.set.insert("orchestration.profiles.operate".to_string(), "false".to_string());
            out.set.insert("orchestration.profiles.tasklist".to_string(), "false".to_string());
        }
        if self.installation_type != InstallationType::Normal {
            out.set.insert(
                "global.multiregion.installationType".to_string(),
                self.installation_type.as_str().to_string(),
            );
        }
        out.set.insert(
            "global.multiregion.regionId".to_string(),
            self.region.as_u32().to_string(),
        );
        if let Some(tag) = &self.image_tag {
            out.set.insert("orchestration.image.tag".to_string(), tag.clone());
        }

        let mut env: Vec<(String, String)> = vec![(
            ENV_INITIAL_CONTACT_POINTS.to_string(),
            self.contact_points.to_string(),
        )];
        env.extend(self.exporter_endpoints.iter().map(|e| (e.env_name(), e.url.clone())));
        if !self.schema_creation_enabled {
            env.push((ENV_SCHEMA_CREATION.to_string(), "false".to_string()));
        }
        for (offset, (name, value)) in env.into_iter().enumerate() {
            let slot = RELEASE_ENV_BASE_INDEX + offset;
            out.set_string.insert(format!("orchestration.env[{slot}].name"), name);
            out.set_string.insert(format!("orchestration.env[{slot}].value"), value);
        }

        for (key, value) in &self.extra {
            out.set.insert(key.clone(), value.clone());
        }
        Ok(out)
    }
}

/// Installs and removes a region's release.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn install_or_upgrade(&self, values: &ReleaseValues) -> Result<()>;

    /// Remove the release and its persistent volumes.
    async fn teardown(&self, release: &str) -> Result<()>;
}

/// [`Deployer`] backed by the `helm` CLI for one namespace.
#[derive(Debug, Clone)]
pub struct HelmDeployer {
    namespace: String,
    chart: String,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    timeout: Duration,
}

impl HelmDeployer {
    pub fn new(namespace: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            chart: chart.into(),
            kubeconfig: None,
            context: None,
            timeout: Duration::from_secs(600),
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        if let Some(path) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(path);
        }
        if let Some(context) = &self.context {
            // helm spells it --kube-context
            let flag = if program == "helm" { "--kube-context" } else { "--context" };
            cmd.arg(flag).arg(context);
        }
        cmd.arg("--namespace").arg(&self.namespace);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Arguments of `helm upgrade --install` for `values`.
    pub fn install_args(&self, values: &ReleaseValues) -> Result<Vec<String>> {
        let rendered = values.render()?;
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            values.release.clone(),
            self.chart.clone(),
            "--wait".to_string(),
            "--timeout".to_string(),
            format!("{}s", self.timeout.as_secs()),
        ];
        if let Some(version) = &values.chart_version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        for file in &values.values_files {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        for (key, value) in &rendered.set {
            args.push("--set".to_string());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &rendered.set_string {
            args.push("--set-string".to_string());
            args.push(format!("{key}={value}"));
        }
        Ok(args)
    }

    async fn run(&self, program: &str, args: &[String], resource: &str) -> Result<String> {
        let output = self.command(program).args(args).output().await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Err(OrchestratorError::ResourceUnavailable {
            resource: resource.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            retriable: false,
        })
    }
}

#[async_trait]
impl Deployer for HelmDeployer {
    async fn install_or_upgrade(&self, values: &ReleaseValues) -> Result<()> {
        let args = self.install_args(values)?;
        let resource = format!("release {}/{}", self.namespace, values.release);
        self.run("helm", &args, &resource).await?;
        info!(
            namespace = %self.namespace,
            release = %values.release,
            installation = values.installation_type.as_str(),
            web_apps = values.web_apps_enabled,
            "Release installed"
        );
        Ok(())
    }

    async fn teardown(&self, release: &str) -> Result<()> {
        let resource = format!("release {}/{}", self.namespace, release);
        let uninstall = ["uninstall".to_string(), release.to_string(), "--wait".to_string()];
        match self.run("helm", &uninstall, &resource).await {
            Ok(_) => {}
            Err(OrchestratorError::ResourceUnavailable { reason, .. }) if reason.contains("not found") => {
                warn!(%resource, "Release already absent");
            }
            Err(e) => return Err(e),
        }

        let delete_pvcs = ["delete".to_string(), "pvc".to_string(), "--all".to_string()];
        self.run("kubectl", &delete_pvcs, &format!("pvcs of {}", self.namespace))
            .await?;
        info!(namespace = %self.namespace, release, "Release torn down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_points() -> ContactPoints {
        ContactPoints::generate("camunda", "camunda-primary", "camunda-secondary", 8).unwrap()
    }

    #[test]
    fn test_contact_points_alternate_regions() {
        let points = contact_points();
        let entries: Vec<&str> = points.as_str().split(',').collect();
        assert_eq!(entries.len(), 8);
        assert_eq!(
            entries[0],
            "camunda-zeebe-0.camunda-zeebe.camunda-primary.svc.cluster.local:26502"
        );
        assert_eq!(
            entries[1],
            "camunda-zeebe-0.camunda-zeebe.camunda-secondary.svc.cluster.local:26502"
        );
        assert_eq!(
            entries[7],
            "camunda-zeebe-3.camunda-zeebe.camunda-secondary.svc.cluster.local:26502"
        );
        assert!(!points.as_str().ends_with(','));
    }

    #[test]
    fn test_contact_points_rejections() {
        assert!(ContactPoints::generate("camunda", "a", "b", 7).is_err());
        assert!(ContactPoints::generate("camunda", "a", "b", 2).is_err());
        assert!(ContactPoints::generate("camunda", "a", "a", 8).is_err());
        assert_eq!(ContactPoints::generate("camunda", "a", "b", 4).unwrap().len(), 4);
    }

    #[test]
    fn test_render_normal_release() {
        let values = ReleaseValues::new("camunda", RegionIndex::One, contact_points())
            .with_exporter(
                ExporterId::new("camundaregion0").unwrap(),
                data_store_url("camunda", "camunda-primary"),
            )
            .with_image_tag("8.6.0");
        let rendered = values.render().unwrap();

        assert!(!rendered.set.contains_key("orchestration.profiles.operate"));
        assert_eq!(rendered.set["global.multiregion.regionId"], "1");
        assert_eq!(rendered.set["orchestration.image.tag"], "8.6.0");
        assert_eq!(
            rendered.set_string["orchestration.env[10].name"],
            ENV_INITIAL_CONTACT_POINTS
        );
        assert_eq!(
            rendered.set_string["orchestration.env[11].name"],
            "ZEEBE_BROKER_EXPORTERS_CAMUNDAREGION0_ARGS_CONNECT_URL"
        );
        assert_eq!(
            rendered.set_string["orchestration.env[11].value"],
            "http://camunda-elasticsearch-master-hl.camunda-primary.svc.cluster.local:9200"
        );
        assert!(!rendered.set_string.values().any(|v| v == ENV_SCHEMA_CREATION));
    }

    #[test]
    fn test_render_failback_release() {
        let values = ReleaseValues::new("camunda", RegionIndex::One, contact_points()).failback(true);
        let rendered = values.render().unwrap();
        assert_eq!(rendered.set["orchestration.profiles.operate"], "false");
        assert_eq!(rendered.set["orchestration.profiles.tasklist"], "false");
        assert_eq!(rendered.set["global.multiregion.installationType"], "failBack");
        assert_eq!(rendered.set_string["orchestration.env[11].name"], ENV_SCHEMA_CREATION);
        assert_eq!(rendered.set_string["orchestration.env[11].value"], "false");

        let without_restore = ReleaseValues::new("camunda", RegionIndex::One, contact_points()).failback(false);
        assert!(without_restore.schema_creation_enabled);
        assert!(!without_restore.web_apps_enabled);

        let steady = values.steady().render().unwrap();
        assert!(!steady.set.contains_key("orchestration.profiles.operate"));
        assert!(!steady.set.contains_key("global.multiregion.installationType"));
    }

    #[test]
    fn test_render_healthy_region_without_web_apps() {
        let rendered = ReleaseValues::new("camunda", RegionIndex::Zero, contact_points())
            .without_web_apps()
            .render()
            .unwrap();
        assert_eq!(rendered.set["orchestration.profiles.operate"], "false");
        assert_eq!(rendered.set["orchestration.profiles.tasklist"], "false");
        assert!(!rendered.set.contains_key("global.multiregion.installationType"));
        assert_eq!(rendered.set["global.multiregion.regionId"], "0");
        assert!(!rendered.set_string.values().any(|v| v == ENV_SCHEMA_CREATION));
    }

    #[test]
    fn test_extra_values_override_and_validate() {
        let values = ReleaseValues::new("camunda", RegionIndex::Zero, contact_points())
            .failback(true)
            .with_extra("orchestration.profiles.operate", "true");
        assert_eq!(values.render().unwrap().set["orchestration.profiles.operate"], "true");

        let blank = ReleaseValues::new("camunda", RegionIndex::Zero, contact_points()).with_extra(" ", "x");
        assert!(blank.render().is_err());
    }

    #[test]
    fn test_helm_install_args() {
        let deployer = HelmDeployer::new("camunda-secondary", "camunda/camunda-platform")
            .with_timeout(Duration::from_secs(1800));
        let values = ReleaseValues::new("camunda", RegionIndex::One, contact_points())
            .with_chart_version("11.0.0")
            .with_values_file("values.yml")
            .failback(true);
        let args = deployer.install_args(&values).unwrap();
        assert_eq!(&args[..4], &["upgrade", "--install", "camunda", "camunda/camunda-platform"]);
        assert!(args.windows(2).any(|w| w == ["--timeout", "1800s"]));
        assert!(args.windows(2).any(|w| w == ["--version", "11.0.0"]));
        assert!(args.windows(2).any(|w| w == ["-f", "values.yml"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["--set", "orchestration.profiles.tasklist=false"]));
    }
}
