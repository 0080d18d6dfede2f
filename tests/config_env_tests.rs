//! Integration tests for OrchestratorConfig::from_env() and from_profile_env().
//!
//! Environment variables are process-global, so every test here runs under
//! `#[serial]` and goes through `with_env_vars`, which clears and restores
//! every variable the loader reads.

use cluster_orchestrator::config::{OrchestratorConfig, OrchestratorProfile};
use serial_test::serial;
use std::env;
use std::time::Duration;

/// All environment variables read by the configuration loaders.
const ALL_CONFIG_ENV_VARS: &[&str] = &[
    "ORCH_PROFILE",
    "ORCH_POLL_INTERVAL_SECS",
    "ORCH_BROKER_CHANGE_MAX_ATTEMPTS",
    "ORCH_PARTITION_CHANGE_MAX_ATTEMPTS",
    "ORCH_EXPORTER_DISABLE_MAX_ATTEMPTS",
    "ORCH_EXPORTER_ENABLE_MAX_ATTEMPTS",
    "ORCH_EXPORTING_RETRY_ATTEMPTS",
    "ORCH_EXPORTING_RETRY_DELAY_SECS",
    "ORCH_READINESS_MAX_ATTEMPTS",
    "ORCH_TUNNEL_RETRY_ATTEMPTS",
    "ORCH_TUNNEL_RETRY_DELAY_SECS",
    "ORCH_BACKUP_REPOSITORY",
    "ORCH_BACKUP_BUCKET",
    "ORCH_BACKUP_NAME",
    "ORCH_DRY_RUN",
    "ORCH_DRY_RUN_ACCEPTED_STATUSES",
    "ORCH_HTTP_TIMEOUT_SECS",
    "ORCH_REPLICATION_FACTOR",
    "ORCH_RELEASE_NAME",
    "ORCH_BROKERS_PER_REGION",
    "ORCH_EXPORTER_PREFIX",
];

/// Run `f` with exactly `vars` set among the loader's variables.
fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let originals: Vec<_> = ALL_CONFIG_ENV_VARS
        .iter()
        .map(|k| (*k, env::var(*k).ok()))
        .collect();

    for key in ALL_CONFIG_ENV_VARS {
        unsafe { env::remove_var(key) };
    }
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }

    let result = f();

    for (key, original) in originals {
        match original {
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
    }
    result
}

// ============================================================================
// from_env
// ============================================================================

#[test]
#[serial]
fn test_from_env_defaults() {
    with_env_vars(&[], || {
        let config = OrchestratorConfig::from_env().unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert!(config.dry_run);
        assert_eq!(config.release_name, "camunda");
        assert_eq!(config.brokers_per_region, 4);
        assert_eq!(config.backup_bucket, None);
    });
}

#[test]
#[serial]
fn test_from_env_attempt_budgets() {
    with_env_vars(
        &[
            ("ORCH_POLL_INTERVAL_SECS", "5"),
            ("ORCH_BROKER_CHANGE_MAX_ATTEMPTS", "80"),
            ("ORCH_PARTITION_CHANGE_MAX_ATTEMPTS", "120"),
            ("ORCH_EXPORTING_RETRY_ATTEMPTS", "3"),
            ("ORCH_EXPORTING_RETRY_DELAY_SECS", "1"),
            ("ORCH_TUNNEL_RETRY_DELAY_SECS", "2"),
        ],
        || {
            let config = OrchestratorConfig::from_env().unwrap();
            assert_eq!(config.poll_interval, Duration::from_secs(5));
            assert_eq!(config.broker_change_poll().budget(), Duration::from_secs(400));
            assert_eq!(config.partition_change_max_attempts, 120);
            assert_eq!(config.exporting_retry().attempts, 3);
            assert_eq!(config.exporting_retry().delay, Duration::from_secs(1));
            assert_eq!(config.tunnel_retry().delay, Duration::from_secs(2));
            assert!(config.validate().is_ok());
        },
    );
}

#[test]
#[serial]
fn test_from_env_unparseable_numbers_fall_back() {
    with_env_vars(
        &[
            ("ORCH_BROKER_CHANGE_MAX_ATTEMPTS", "forty"),
            ("ORCH_POLL_INTERVAL_SECS", "-1"),
            ("ORCH_REPLICATION_FACTOR", " 3 "),
        ],
        || {
            let config = OrchestratorConfig::from_env().unwrap();
            assert_eq!(config.broker_change_max_attempts, 40);
            assert_eq!(config.poll_interval, Duration::from_secs(15));
            assert_eq!(config.replication_factor, 3);
        },
    );
}

#[test]
#[serial]
fn test_from_env_dry_run_switch() {
    for (raw, expected) in [("false", false), ("FALSE", false), ("0", false), ("true", true), ("yes", true)] {
        with_env_vars(&[("ORCH_DRY_RUN", raw)], || {
            let config = OrchestratorConfig::from_env().unwrap();
            assert_eq!(config.dry_run, expected, "ORCH_DRY_RUN={raw}");
        });
    }
}

#[test]
#[serial]
fn test_from_env_dry_run_statuses() {
    with_env_vars(&[("ORCH_DRY_RUN_ACCEPTED_STATUSES", "200")], || {
        let config = OrchestratorConfig::from_env().unwrap();
        assert_eq!(config.dry_run_accepted_statuses.len(), 1);
        assert!(config.dry_run_accepted_statuses.contains(&200));
    });

    with_env_vars(&[("ORCH_DRY_RUN_ACCEPTED_STATUSES", "200,accepted")], || {
        let err = OrchestratorConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("ORCH_DRY_RUN_ACCEPTED_STATUSES"));
    });
}

#[test]
#[serial]
fn test_from_env_backup_settings() {
    with_env_vars(
        &[
            ("ORCH_BACKUP_REPOSITORY", "zeebe_backup"),
            ("ORCH_BACKUP_NAME", "failback-2"),
            ("ORCH_BACKUP_BUCKET", ""),
        ],
        || {
            let config = OrchestratorConfig::from_env().unwrap();
            assert_eq!(config.backup_repository, "zeebe_backup");
            assert_eq!(config.backup_name, "failback-2");
            assert_eq!(config.backup_bucket, None);
            assert_eq!(config.backup_bucket_for("cluster-london"), "cluster-london-elastic-backup");
        },
    );

    with_env_vars(&[("ORCH_BACKUP_BUCKET", "shared-backups")], || {
        let config = OrchestratorConfig::from_env().unwrap();
        assert_eq!(config.backup_bucket_for("cluster-london"), "shared-backups");
    });
}

#[test]
#[serial]
fn test_from_env_release_layout() {
    with_env_vars(
        &[
            ("ORCH_RELEASE_NAME", "orchestration"),
            ("ORCH_BROKERS_PER_REGION", "6"),
            ("ORCH_EXPORTER_PREFIX", "region"),
        ],
        || {
            let config = OrchestratorConfig::from_env().unwrap();
            assert_eq!(config.release_name, "orchestration");
            assert_eq!(config.brokers_per_region, 6);
            assert_eq!(config.exporter_prefix, "region");
        },
    );
}

#[test]
#[serial]
fn test_from_env_rejects_zero_attempt_budget() {
    with_env_vars(&[("ORCH_BROKER_CHANGE_MAX_ATTEMPTS", "0")], || {
        let err = OrchestratorConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("broker_change_max_attempts"), "{err}");
    });
}

#[test]
#[serial]
fn test_from_env_reports_every_invalid_setting() {
    with_env_vars(
        &[
            ("ORCH_PARTITION_CHANGE_MAX_ATTEMPTS", "10"),
            ("ORCH_BACKUP_NAME", ""),
        ],
        || {
            let err = OrchestratorConfig::from_env().unwrap_err();
            let message = err.to_string();
            assert!(message.contains("partition_change_max_attempts"), "{message}");
            assert!(message.contains("backup_name"), "{message}");
        },
    );
}

// ============================================================================
// from_profile_env
// ============================================================================

#[test]
#[serial]
fn test_profile_env_defaults_to_operational() {
    with_env_vars(&[], || {
        let config = OrchestratorConfig::from_profile_env().unwrap();
        assert_eq!(config, OrchestratorConfig::from_profile(OrchestratorProfile::Operational));
    });

    with_env_vars(&[("ORCH_PROFILE", "chaos")], || {
        let config = OrchestratorConfig::from_profile_env().unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(15));
    });
}

#[test]
#[serial]
fn test_profile_env_rehearsal_with_overrides() {
    with_env_vars(&[("ORCH_PROFILE", "rehearsal")], || {
        let config = OrchestratorConfig::from_profile_env().unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.settle_interval, Duration::from_millis(10));
        assert_eq!(config.broker_change_max_attempts, 40);
    });

    with_env_vars(
        &[("ORCH_PROFILE", "rehearsal"), ("ORCH_POLL_INTERVAL_SECS", "1")],
        || {
            let config = OrchestratorConfig::from_profile_env().unwrap();
            assert_eq!(config.poll_interval, Duration::from_secs(1));
            // untouched profile values survive
            assert_eq!(config.tunnel_retry_delay, Duration::from_millis(10));
        },
    );
}

#[test]
#[serial]
fn test_profile_env_validates_overrides() {
    with_env_vars(
        &[("ORCH_PROFILE", "rehearsal"), ("ORCH_REPLICATION_FACTOR", "9")],
        || {
            let err = OrchestratorConfig::from_profile_env().unwrap_err();
            assert!(err.to_string().contains("replication_factor"), "{err}");
        },
    );
}
