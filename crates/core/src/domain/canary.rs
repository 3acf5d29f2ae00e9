// Canary Rollout Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Canary request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryConfig {
    pub version: String,
    /// Initial cohort size (0-100)
    pub canary_percentage: u32,
    /// Passed to the health probe (URL or service name)
    pub health_check_target: String,
    /// Global error rate, in percent, above which the canary is rolled back
    pub rollback_error_rate_threshold: f64,
    pub monitoring_duration_secs: u64,
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,
}

fn default_sample_interval() -> u64 {
    30
}

impl CanaryConfig {
    pub fn new(version: impl Into<String>, health_check_target: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            canary_percentage: 10,
            health_check_target: health_check_target.into(),
            rollback_error_rate_threshold: 5.0,
            monitoring_duration_secs: 300,
            sample_interval_secs: default_sample_interval(),
        }
    }

    /// Flag gating the canary code path
    pub fn flag_name(&self) -> String {
        format!("canary_{}", self.version)
    }
}

/// Canary lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanaryPhase {
    Monitoring,
    Promoted,
    RolledBack,
    /// Cancelled by a newer canary on the same flag
    Superseded,
}

impl CanaryPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CanaryPhase::Monitoring)
    }
}

impl std::fmt::Display for CanaryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanaryPhase::Monitoring => write!(f, "MONITORING"),
            CanaryPhase::Promoted => write!(f, "PROMOTED"),
            CanaryPhase::RolledBack => write!(f, "ROLLED_BACK"),
            CanaryPhase::Superseded => write!(f, "SUPERSEDED"),
        }
    }
}

impl std::str::FromStr for CanaryPhase {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MONITORING" => Ok(CanaryPhase::Monitoring),
            "PROMOTED" => Ok(CanaryPhase::Promoted),
            "ROLLED_BACK" => Ok(CanaryPhase::RolledBack),
            "SUPERSEDED" => Ok(CanaryPhase::Superseded),
            other => Err(DomainError::ValidationError(format!(
                "unknown canary phase: {}",
                other
            ))),
        }
    }
}

/// One health observation during a monitoring window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    /// Global error rate in percent
    pub error_rate: f64,
    pub probe_healthy: bool,
    pub timestamp: i64, // epoch ms
}

impl HealthSample {
    pub fn is_healthy(&self, threshold: f64) -> bool {
        self.probe_healthy && self.error_rate <= threshold
    }
}

/// Observable canary progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryState {
    pub flag_name: String,
    pub version: String,
    pub phase: CanaryPhase,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub samples: Vec<HealthSample>,
    pub reason: Option<String>,
}

impl CanaryState {
    pub fn new(config: &CanaryConfig, started_at: i64) -> Self {
        Self {
            flag_name: config.flag_name(),
            version: config.version.clone(),
            phase: CanaryPhase::Monitoring,
            started_at,
            finished_at: None,
            samples: Vec::new(),
            reason: None,
        }
    }

    /// Move to a terminal phase. No-op if already terminal.
    pub fn finish(&mut self, phase: CanaryPhase, reason: Option<String>, now_millis: i64) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = phase;
        self.reason = reason;
        self.finished_at = Some(now_millis);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_name() {
        let config = CanaryConfig::new("2.4.0", "http://localhost/health");
        assert_eq!(config.flag_name(), "canary_2.4.0");
        assert_eq!(config.sample_interval_secs, 30);
    }

    #[test]
    fn test_sample_health() {
        let ok = HealthSample {
            error_rate: 4.9,
            probe_healthy: true,
            timestamp: 0,
        };
        assert!(ok.is_healthy(5.0));
        assert!(!HealthSample { error_rate: 5.1, ..ok.clone() }.is_healthy(5.0));
        assert!(!HealthSample { probe_healthy: false, ..ok }.is_healthy(5.0));
    }

    #[test]
    fn test_finish_only_once() {
        let config = CanaryConfig::new("2.4.0", "target");
        let mut state = CanaryState::new(&config, 0);

        assert!(state.finish(CanaryPhase::Promoted, None, 10));
        assert!(!state.finish(CanaryPhase::RolledBack, Some("late".into()), 20));
        assert_eq!(state.phase, CanaryPhase::Promoted);
        assert_eq!(state.finished_at, Some(10));
    }

    #[test]
    fn test_phase_parses_its_display_form() {
        for phase in [
            CanaryPhase::Monitoring,
            CanaryPhase::Promoted,
            CanaryPhase::RolledBack,
            CanaryPhase::Superseded,
        ] {
            assert_eq!(phase.to_string().parse::<CanaryPhase>().unwrap(), phase);
        }
        assert!("rolled_back".parse::<CanaryPhase>().is_err());
    }

    #[test]
    fn test_sample_interval_defaults_when_missing() {
        let json = r#"{"version":"3.0.0","canary_percentage":10,"health_check_target":"t",
            "rollback_error_rate_threshold":5.0,"monitoring_duration_secs":60}"#;
        let config: CanaryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sample_interval_secs, 30);
    }
}
