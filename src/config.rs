//! Engine configuration (§6 "Configuration").
//!
//! All values have defaults matching the spec's recognized options; callers
//! override only what they need.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub sessions: SessionConfig,
    pub timeouts: TimeoutConfig,
    pub enforcement: EnforcementConfig,
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.sessions.validate()?;
        self.timeouts.validate()?;
        self.enforcement.validate()?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sessions: SessionConfig::default(),
            timeouts: TimeoutConfig::default(),
            enforcement: EnforcementConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Session registry sizing and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// `MAX_TRACKED_SESSIONS` (default 1000).
    pub max_tracked_sessions: usize,
    /// Idle expiry in seconds (default 24h).
    pub idle_expiry_secs: u64,
}

impl SessionConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_tracked_sessions == 0 {
            return Err(EngineError::InvalidInput(
                "max_tracked_sessions must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn idle_expiry(&self) -> Duration {
        Duration::from_secs(self.idle_expiry_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_tracked_sessions: 1000,
            idle_expiry_secs: 24 * 60 * 60,
        }
    }
}

/// `timeframe` execution-timeout presets plus coordinator timers (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub quick_secs: u64,
    pub thorough_secs: u64,
    pub comprehensive_secs: u64,
    pub stale_threshold_secs: u64,
    pub dependency_wait_secs: u64,
}

impl TimeoutConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.quick_secs == 0 || self.thorough_secs == 0 || self.comprehensive_secs == 0 {
            return Err(EngineError::InvalidInput(
                "execution timeout presets must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn preset(&self, timeframe: crate::plan::Timeframe) -> Duration {
        use crate::plan::Timeframe::*;
        match timeframe {
            Quick => Duration::from_secs(self.quick_secs),
            Thorough => Duration::from_secs(self.thorough_secs),
            Comprehensive => Duration::from_secs(self.comprehensive_secs),
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn dependency_wait(&self) -> Duration {
        Duration::from_secs(self.dependency_wait_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            quick_secs: 30,
            thorough_secs: 5 * 60,
            comprehensive_secs: 15 * 60,
            stale_threshold_secs: 30,
            dependency_wait_secs: 5 * 60,
        }
    }
}

/// Completion-gatekeeper enforcement level (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnforcementLevel {
    None,
    Lenient,
    Standard,
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementConfig {
    pub level: EnforcementLevel,
    pub minimum_completion_threshold: f64,
    pub require_confirmation_threshold: f64,
    pub critical_techniques: Vec<String>,
}

impl EnforcementConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&self.minimum_completion_threshold)
            || !(0.0..=1.0).contains(&self.require_confirmation_threshold)
        {
            return Err(EngineError::InvalidInput(
                "completion thresholds must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            level: EnforcementLevel::Standard,
            minimum_completion_threshold: 0.60,
            require_confirmation_threshold: 0.80,
            critical_techniques: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryLevel {
    Basic,
    Detailed,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryStorage {
    Memory,
    Filesystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyMode {
    Minimal,
    Anonymized,
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub level: TelemetryLevel,
    pub storage: TelemetryStorage,
    pub privacy_mode: PrivacyMode,
    pub batch_size: usize,
    pub flush_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: TelemetryLevel::Basic,
            storage: TelemetryStorage::Memory,
            privacy_mode: PrivacyMode::Anonymized,
            batch_size: 64,
            flush_interval_secs: 10,
        }
    }
}
