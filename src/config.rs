//! Configuration for the orchestrator.
//!
//! # Configuration Profiles
//!
//! ```rust,no_run
//! use cluster_orchestrator::config::{OrchestratorConfig, OrchestratorProfile};
//!
//! // Operational profile - bounds sized for real clusters (minutes-scale waits)
//! let ops = OrchestratorConfig::from_profile(OrchestratorProfile::Operational);
//!
//! // Rehearsal profile - short intervals for dry runs against mock collaborators
//! let rehearsal = OrchestratorConfig::from_profile(OrchestratorProfile::Rehearsal);
//! ```
//!
//! Every attempt budget is expressed as a [`PollPolicy`] or [`FixedRetry`]
//! derived from this struct; components never hard-code their own bounds.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKUP_CHECK_INTERVAL_SECS, DEFAULT_BACKUP_CHECK_MAX_ATTEMPTS,
    DEFAULT_BACKUP_NAME, DEFAULT_BACKUP_REPOSITORY, DEFAULT_BROKER_CHANGE_MAX_ATTEMPTS,
    DEFAULT_BROKERS_PER_REGION, DEFAULT_DRY_RUN_ACCEPTED_STATUSES,
    DEFAULT_EXPORTER_DISABLE_MAX_ATTEMPTS, DEFAULT_EXPORTER_ENABLE_MAX_ATTEMPTS,
    DEFAULT_EXPORTER_PREFIX, DEFAULT_EXPORTING_RETRY_ATTEMPTS,
    DEFAULT_EXPORTING_RETRY_DELAY_SECS, DEFAULT_HTTP_TIMEOUT_SECS,
    DEFAULT_PARTITION_CHANGE_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_READINESS_MAX_ATTEMPTS, DEFAULT_RELEASE_NAME, DEFAULT_REPLICATION_FACTOR,
    DEFAULT_SETTLE_INTERVAL_SECS, DEFAULT_SETTLE_MAX_ATTEMPTS, DEFAULT_TUNNEL_RETRY_ATTEMPTS,
    DEFAULT_TUNNEL_RETRY_DELAY_SECS,
};
use crate::error::OrchestratorError;
use crate::poller::PollPolicy;
use crate::retry::FixedRetry;

/// Validated configuration profiles.
///
/// | Profile | Use Case | Poll interval | Budgets |
/// |---------|----------|---------------|---------|
/// | Operational | Real clusters | 15s | Full |
/// | Rehearsal | Mock collaborators, dry rehearsals | 10ms | Full attempt counts |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorProfile {
    /// Minutes-scale waits against a live cluster pair.
    Operational,
    /// Same attempt counts, millisecond intervals.
    Rehearsal,
}

impl OrchestratorProfile {
    pub fn description(&self) -> &'static str {
        match self {
            OrchestratorProfile::Operational => "Live cluster pair, minutes-scale waits",
            OrchestratorProfile::Rehearsal => "Mock collaborators, millisecond waits",
        }
    }

    pub fn all() -> &'static [OrchestratorProfile] {
        &[OrchestratorProfile::Operational, OrchestratorProfile::Rehearsal]
    }
}

impl std::fmt::Display for OrchestratorProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorProfile::Operational => write!(f, "operational"),
            OrchestratorProfile::Rehearsal => write!(f, "rehearsal"),
        }
    }
}

impl std::str::FromStr for OrchestratorProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "operational" | "ops" | "production" | "prod" => Ok(OrchestratorProfile::Operational),
            "rehearsal" | "mock" | "dev" => Ok(OrchestratorProfile::Rehearsal),
            _ => Err(format!(
                "Unknown profile '{}'. Valid profiles: operational, rehearsal",
                s
            )),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Interval between convergence checks.
    pub poll_interval: Duration,
    /// Attempts for broker add/remove convergence.
    pub broker_change_max_attempts: u32,
    /// Attempts for partition resize (alone or combined) convergence.
    pub partition_change_max_attempts: u32,
    pub exporter_disable_max_attempts: u32,
    pub exporter_enable_max_attempts: u32,
    /// Whole-call attempts for pause/resume exporting.
    pub exporting_retry_attempts: u32,
    pub exporting_retry_delay: Duration,
    /// Member readiness attempts, checked every `poll_interval`.
    pub readiness_max_attempts: u32,
    pub tunnel_retry_attempts: u32,
    pub tunnel_retry_delay: Duration,
    /// Budget for the cluster's last change to settle after exporter changes.
    pub settle_max_attempts: u32,
    pub settle_interval: Duration,
    /// Budget for backup presence and search store health checks.
    pub backup_check_max_attempts: u32,
    pub backup_check_interval: Duration,

    pub backup_repository: String,
    /// Bucket backing the snapshot repository; derived from the cluster name when unset.
    pub backup_bucket: Option<String>,
    pub backup_name: String,

    /// Preview every topology change with a dry run before submitting it.
    pub dry_run: bool,
    /// Status codes accepted as dry-run success.
    pub dry_run_accepted_statuses: BTreeSet<u16>,

    pub http_timeout: Duration,
    pub replication_factor: u32,

    pub release_name: String,
    pub brokers_per_region: u32,
    /// Exporter id prefix; the region index is appended.
    pub exporter_prefix: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            broker_change_max_attempts: DEFAULT_BROKER_CHANGE_MAX_ATTEMPTS,
            partition_change_max_attempts: DEFAULT_PARTITION_CHANGE_MAX_ATTEMPTS,
            exporter_disable_max_attempts: DEFAULT_EXPORTER_DISABLE_MAX_ATTEMPTS,
            exporter_enable_max_attempts: DEFAULT_EXPORTER_ENABLE_MAX_ATTEMPTS,
            exporting_retry_attempts: DEFAULT_EXPORTING_RETRY_ATTEMPTS,
            exporting_retry_delay: Duration::from_secs(DEFAULT_EXPORTING_RETRY_DELAY_SECS),
            readiness_max_attempts: DEFAULT_READINESS_MAX_ATTEMPTS,
            tunnel_retry_attempts: DEFAULT_TUNNEL_RETRY_ATTEMPTS,
            tunnel_retry_delay: Duration::from_secs(DEFAULT_TUNNEL_RETRY_DELAY_SECS),
            settle_max_attempts: DEFAULT_SETTLE_MAX_ATTEMPTS,
            settle_interval: Duration::from_secs(DEFAULT_SETTLE_INTERVAL_SECS),
            backup_check_max_attempts: DEFAULT_BACKUP_CHECK_MAX_ATTEMPTS,
            backup_check_interval: Duration::from_secs(DEFAULT_BACKUP_CHECK_INTERVAL_SECS),
            backup_repository: DEFAULT_BACKUP_REPOSITORY.to_string(),
            backup_bucket: None,
            backup_name: DEFAULT_BACKUP_NAME.to_string(),
            dry_run: true,
            dry_run_accepted_statuses: DEFAULT_DRY_RUN_ACCEPTED_STATUSES.iter().copied().collect(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            release_name: DEFAULT_RELEASE_NAME.to_string(),
            brokers_per_region: DEFAULT_BROKERS_PER_REGION,
            exporter_prefix: DEFAULT_EXPORTER_PREFIX.to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_profile(profile: OrchestratorProfile) -> Self {
        let base = Self::default();
        match profile {
            OrchestratorProfile::Operational => base,
            OrchestratorProfile::Rehearsal => Self {
                poll_interval: Duration::from_millis(10),
                exporting_retry_delay: Duration::from_millis(10),
                tunnel_retry_delay: Duration::from_millis(10),
                settle_interval: Duration::from_millis(10),
                backup_check_interval: Duration::from_millis(10),
                http_timeout: Duration::from_secs(5),
                ..base
            },
        }
    }

    /// Load the profile named by `ORCH_PROFILE`, then apply the other
    /// environment overrides on top of it.
    pub fn from_profile_env() -> Result<Self, Box<dyn std::error::Error>> {
        let profile = std::env::var("ORCH_PROFILE")
            .ok()
            .and_then(|s| s.parse::<OrchestratorProfile>().ok())
            .unwrap_or(OrchestratorProfile::Operational);
        tracing::info!(profile = %profile, description = profile.description(), "Using orchestrator profile");
        Self::from_env_with_defaults(Self::from_profile(profile))
    }

    /// Validate the configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let attempt_fields = [
            ("broker_change_max_attempts", self.broker_change_max_attempts),
            ("partition_change_max_attempts", self.partition_change_max_attempts),
            ("exporter_disable_max_attempts", self.exporter_disable_max_attempts),
            ("exporter_enable_max_attempts", self.exporter_enable_max_attempts),
            ("exporting_retry_attempts", self.exporting_retry_attempts),
            ("readiness_max_attempts", self.readiness_max_attempts),
            ("tunnel_retry_attempts", self.tunnel_retry_attempts),
            ("settle_max_attempts", self.settle_max_attempts),
            ("backup_check_max_attempts", self.backup_check_max_attempts),
        ];
        for (name, value) in attempt_fields {
            if value == 0 {
                errors.push(format!("{name} must be at least 1"));
            }
        }

        if self.poll_interval.is_zero() {
            errors.push("poll_interval must be greater than zero".to_string());
        }

        // Resizes redistribute data; their budget must not be tighter than broker moves.
        if self.partition_change_max_attempts < self.broker_change_max_attempts {
            errors.push(format!(
                "partition_change_max_attempts ({}) must be >= broker_change_max_attempts ({})",
                self.partition_change_max_attempts, self.broker_change_max_attempts
            ));
        }

        if self.exporter_enable_max_attempts < self.exporter_disable_max_attempts {
            errors.push(format!(
                "exporter_enable_max_attempts ({}) must be >= exporter_disable_max_attempts ({})",
                self.exporter_enable_max_attempts, self.exporter_disable_max_attempts
            ));
        }

        if self.dry_run && self.dry_run_accepted_statuses.is_empty() {
            errors.push("dry_run_accepted_statuses must not be empty when dry_run is on".to_string());
        }
        for status in &self.dry_run_accepted_statuses {
            if !(200..300).contains(status) {
                errors.push(format!("dry-run accepted status {status} is not a 2xx code"));
            }
        }

        if self.http_timeout.is_zero() {
            errors.push("http_timeout must be greater than zero".to_string());
        }

        if self.replication_factor == 0 {
            errors.push("replication_factor must be at least 1".to_string());
        }

        if self.brokers_per_region == 0 {
            errors.push("brokers_per_region must be at least 1".to_string());
        } else if self.replication_factor > self.brokers_per_region * 2 {
            errors.push(format!(
                "replication_factor ({}) exceeds cluster size ({})",
                self.replication_factor,
                self.brokers_per_region * 2
            ));
        }

        if self.backup_repository.is_empty() {
            errors.push("backup_repository must not be empty".to_string());
        }
        if self.backup_name.is_empty() {
            errors.push("backup_name must not be empty".to_string());
        }
        if self.release_name.is_empty() {
            errors.push("release_name must not be empty".to_string());
        }
        if crate::types::ExporterId::new(format!("{}0", self.exporter_prefix)).is_err() {
            errors.push(format!(
                "exporter_prefix '{}' does not form a valid exporter id",
                self.exporter_prefix
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ORCH_POLL_INTERVAL_SECS` (default: 15)
    /// - `ORCH_BROKER_CHANGE_MAX_ATTEMPTS` (default: 40)
    /// - `ORCH_PARTITION_CHANGE_MAX_ATTEMPTS` (default: 60)
    /// - `ORCH_EXPORTER_DISABLE_MAX_ATTEMPTS` (default: 5)
    /// - `ORCH_EXPORTER_ENABLE_MAX_ATTEMPTS` (default: 30)
    /// - `ORCH_EXPORTING_RETRY_ATTEMPTS` (default: 10)
    /// - `ORCH_EXPORTING_RETRY_DELAY_SECS` (default: 30)
    /// - `ORCH_READINESS_MAX_ATTEMPTS` (default: 20)
    /// - `ORCH_TUNNEL_RETRY_ATTEMPTS` (default: 5)
    /// - `ORCH_TUNNEL_RETRY_DELAY_SECS` (default: 15)
    /// - `ORCH_BACKUP_REPOSITORY` (default: camunda_backup)
    /// - `ORCH_BACKUP_BUCKET` (default: `{cluster}-elastic-backup`)
    /// - `ORCH_BACKUP_NAME` (default: failback)
    /// - `ORCH_DRY_RUN` (default: true)
    /// - `ORCH_DRY_RUN_ACCEPTED_STATUSES` (default: 200,202)
    /// - `ORCH_HTTP_TIMEOUT_SECS` (default: 30)
    /// - `ORCH_REPLICATION_FACTOR` (default: 4)
    /// - `ORCH_RELEASE_NAME` (default: camunda)
    /// - `ORCH_BROKERS_PER_REGION` (default: 4)
    /// - `ORCH_EXPORTER_PREFIX` (default: camundaregion)
    ///
    /// Unparseable numeric values fall back to the default; an unparseable
    /// status list is an error, and so is a result that fails [`Self::validate`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Self::from_env_with_defaults(Self::default())
    }

    fn from_env_with_defaults(defaults: Self) -> Result<Self, Box<dyn std::error::Error>> {
        let poll_interval = env_parse::<u64>("ORCH_POLL_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let broker_change_max_attempts = env_parse("ORCH_BROKER_CHANGE_MAX_ATTEMPTS")
            .unwrap_or(defaults.broker_change_max_attempts);

        let partition_change_max_attempts = env_parse("ORCH_PARTITION_CHANGE_MAX_ATTEMPTS")
            .unwrap_or(defaults.partition_change_max_attempts);

        let exporter_disable_max_attempts = env_parse("ORCH_EXPORTER_DISABLE_MAX_ATTEMPTS")
            .unwrap_or(defaults.exporter_disable_max_attempts);

        let exporter_enable_max_attempts = env_parse("ORCH_EXPORTER_ENABLE_MAX_ATTEMPTS")
            .unwrap_or(defaults.exporter_enable_max_attempts);

        let exporting_retry_attempts = env_parse("ORCH_EXPORTING_RETRY_ATTEMPTS")
            .unwrap_or(defaults.exporting_retry_attempts);

        let exporting_retry_delay = env_parse::<u64>("ORCH_EXPORTING_RETRY_DELAY_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.exporting_retry_delay);

        let readiness_max_attempts =
            env_parse("ORCH_READINESS_MAX_ATTEMPTS").unwrap_or(defaults.readiness_max_attempts);

        let tunnel_retry_attempts =
            env_parse("ORCH_TUNNEL_RETRY_ATTEMPTS").unwrap_or(defaults.tunnel_retry_attempts);

        let tunnel_retry_delay = env_parse::<u64>("ORCH_TUNNEL_RETRY_DELAY_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.tunnel_retry_delay);

        let backup_repository =
            std::env::var("ORCH_BACKUP_REPOSITORY").unwrap_or(defaults.backup_repository);
        let backup_bucket = std::env::var("ORCH_BACKUP_BUCKET")
            .ok()
            .filter(|b| !b.is_empty())
            .or(defaults.backup_bucket);
        let backup_name = std::env::var("ORCH_BACKUP_NAME").unwrap_or(defaults.backup_name);

        let dry_run = std::env::var("ORCH_DRY_RUN")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(defaults.dry_run);

        let dry_run_accepted_statuses = match std::env::var("ORCH_DRY_RUN_ACCEPTED_STATUSES") {
            Ok(raw) => parse_status_list(&raw)
                .map_err(|e| format!("Invalid ORCH_DRY_RUN_ACCEPTED_STATUSES: {}", e))?,
            Err(_) => defaults.dry_run_accepted_statuses,
        };

        let http_timeout = env_parse::<u64>("ORCH_HTTP_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);

        let replication_factor =
            env_parse("ORCH_REPLICATION_FACTOR").unwrap_or(defaults.replication_factor);

        let release_name = std::env::var("ORCH_RELEASE_NAME").unwrap_or(defaults.release_name);
        let brokers_per_region =
            env_parse("ORCH_BROKERS_PER_REGION").unwrap_or(defaults.brokers_per_region);
        let exporter_prefix =
            std::env::var("ORCH_EXPORTER_PREFIX").unwrap_or(defaults.exporter_prefix);

        let config = Self {
            poll_interval,
            broker_change_max_attempts,
            partition_change_max_attempts,
            exporter_disable_max_attempts,
            exporter_enable_max_attempts,
            exporting_retry_attempts,
            exporting_retry_delay,
            readiness_max_attempts,
            tunnel_retry_attempts,
            tunnel_retry_delay,
            settle_max_attempts: defaults.settle_max_attempts,
            settle_interval: defaults.settle_interval,
            backup_check_max_attempts: defaults.backup_check_max_attempts,
            backup_check_interval: defaults.backup_check_interval,
            backup_repository,
            backup_bucket,
            backup_name,
            dry_run,
            dry_run_accepted_statuses,
            http_timeout,
            replication_factor,
            release_name,
            brokers_per_region,
            exporter_prefix,
        };
        config.validate().map_err(|errors| {
            for error in &errors {
                tracing::error!(%error, "Invalid configuration");
            }
            OrchestratorError::Config(errors.join("; "))
        })?;
        Ok(config)
    }

    // -------------------------------------------------------------------------
    // Derived policies
    // -------------------------------------------------------------------------

    pub fn broker_change_poll(&self) -> PollPolicy {
        PollPolicy::new(self.broker_change_max_attempts, self.poll_interval)
    }

    pub fn partition_change_poll(&self) -> PollPolicy {
        PollPolicy::new(self.partition_change_max_attempts, self.poll_interval)
    }

    pub fn exporter_disable_poll(&self) -> PollPolicy {
        PollPolicy::new(self.exporter_disable_max_attempts, self.poll_interval)
    }

    pub fn exporter_enable_poll(&self) -> PollPolicy {
        PollPolicy::new(self.exporter_enable_max_attempts, self.poll_interval)
    }

    pub fn readiness_poll(&self) -> PollPolicy {
        PollPolicy::new(self.readiness_max_attempts, self.poll_interval)
    }

    pub fn settle_poll(&self) -> PollPolicy {
        PollPolicy::new(self.settle_max_attempts, self.settle_interval)
    }

    pub fn backup_check_poll(&self) -> PollPolicy {
        PollPolicy::new(self.backup_check_max_attempts, self.backup_check_interval)
    }

    pub fn exporting_retry(&self) -> FixedRetry {
        FixedRetry::new(self.exporting_retry_attempts, self.exporting_retry_delay)
    }

    pub fn tunnel_retry(&self) -> FixedRetry {
        FixedRetry::new(self.tunnel_retry_attempts, self.tunnel_retry_delay)
    }

    /// Bucket name for a cluster: the configured one, or `{cluster}-elastic-backup`.
    pub fn backup_bucket_for(&self, cluster_name: &str) -> String {
        self.backup_bucket.clone().unwrap_or_else(|| {
            format!("{cluster_name}{}", crate::constants::BACKUP_BUCKET_SUFFIX)
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse a comma-separated list of HTTP status codes.
pub fn parse_status_list(raw: &str) -> Result<BTreeSet<u16>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .map_err(|e| format!("'{}' is not a status code: {}", s, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.broker_change_max_attempts, 40);
        assert_eq!(config.partition_change_max_attempts, 60);
        assert!(config.dry_run_accepted_statuses.contains(&200));
        assert!(config.dry_run_accepted_statuses.contains(&202));
    }

    #[test]
    fn test_profiles_are_valid() {
        for profile in OrchestratorProfile::all() {
            let config = OrchestratorConfig::from_profile(*profile);
            assert!(config.validate().is_ok(), "profile {profile} should validate");
        }
    }

    #[test]
    fn test_rehearsal_keeps_attempt_counts() {
        let ops = OrchestratorConfig::from_profile(OrchestratorProfile::Operational);
        let rehearsal = OrchestratorConfig::from_profile(OrchestratorProfile::Rehearsal);
        assert_eq!(ops.broker_change_max_attempts, rehearsal.broker_change_max_attempts);
        assert!(rehearsal.poll_interval < ops.poll_interval);
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(
            "ops".parse::<OrchestratorProfile>().unwrap(),
            OrchestratorProfile::Operational
        );
        assert_eq!(
            "Rehearsal".parse::<OrchestratorProfile>().unwrap(),
            OrchestratorProfile::Rehearsal
        );
        assert!("nonsense".parse::<OrchestratorProfile>().is_err());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = OrchestratorConfig {
            broker_change_max_attempts: 0,
            replication_factor: 0,
            dry_run_accepted_statuses: BTreeSet::new(),
            backup_name: String::new(),
            ..OrchestratorConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("broker_change_max_attempts")));
        assert!(errors.iter().any(|e| e.contains("replication_factor")));
        assert!(errors.iter().any(|e| e.contains("dry_run_accepted_statuses")));
        assert!(errors.iter().any(|e| e.contains("backup_name")));
    }

    #[test]
    fn test_validate_resize_budget_not_tighter_than_broker_budget() {
        let config = OrchestratorConfig {
            partition_change_max_attempts: 10,
            ..OrchestratorConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("partition_change_max_attempts")));
    }

    #[test]
    fn test_validate_rejects_non_2xx_dry_run_status() {
        let config = OrchestratorConfig {
            dry_run_accepted_statuses: [200, 409].into_iter().collect(),
            ..OrchestratorConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("409")));
    }

    #[test]
    fn test_empty_statuses_allowed_without_dry_run() {
        let config = OrchestratorConfig {
            dry_run: false,
            dry_run_accepted_statuses: BTreeSet::new(),
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_status_list() {
        let parsed = parse_status_list("200, 202,").unwrap();
        assert_eq!(parsed.into_iter().collect::<Vec<_>>(), vec![200, 202]);
        assert!(parse_status_list("200,abc").is_err());
    }

    #[test]
    fn test_derived_policies() {
        let config = OrchestratorConfig::default();
        let broker = config.broker_change_poll();
        assert_eq!(broker.max_attempts, 40);
        assert_eq!(broker.budget(), Duration::from_secs(600));
        assert_eq!(config.partition_change_poll().budget(), Duration::from_secs(900));
        assert_eq!(config.exporting_retry().attempts, 10);
        assert_eq!(config.tunnel_retry().delay, Duration::from_secs(15));
    }

    #[test]
    fn test_backup_bucket_derivation() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.backup_bucket_for("prod-a"), "prod-a-elastic-backup");
        let config = OrchestratorConfig {
            backup_bucket: Some("shared".to_string()),
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.backup_bucket_for("prod-a"), "shared");
    }
}
