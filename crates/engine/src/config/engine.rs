//! Engine configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineResult;

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `TRAMITA_`:
/// - `TRAMITA_STRICT_VALIDATION`: Reject rule sets with validation errors (default: false)
/// - `TRAMITA_NOTIFICATIONS_ENABLED`: Register the notification handler (default: true)
/// - `TRAMITA_WORKFLOWS_ENABLED`: Register task and workflow handlers (default: true)
/// - `TRAMITA_GROUP_LOCK_TIMEOUT_MS`: Group lock acquisition deadline (default: 5000)
/// - `TRAMITA_SUB_WORKFLOW_WAIT_TIMEOUT_SECS`: Deadline for waiting on children (optional)
/// - `TRAMITA_EVENT_CHANNEL_CAPACITY`: Instance event buffer size (default: 256)
/// - `TRAMITA_RACE_CANCEL_REASON`: Reason recorded on race losers
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Fail rule-set loading instead of warning on validation issues
    #[serde(default)]
    pub strict_validation: bool,

    /// Notification subsystem enabled
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,

    /// Task/workflow subsystem enabled
    #[serde(default = "default_true")]
    pub workflows_enabled: bool,

    /// Group lock acquisition timeout in milliseconds
    #[serde(default = "default_group_lock_timeout_ms")]
    pub group_lock_timeout_ms: u64,

    /// Sub-workflow wait timeout in seconds (unbounded when unset)
    #[serde(default)]
    pub sub_workflow_wait_timeout_secs: Option<u64>,

    /// Capacity of the instance event broadcast channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Cancellation reason recorded on race group losers
    #[serde(default = "default_race_cancel_reason")]
    pub race_cancel_reason: String,
}

fn default_true() -> bool {
    true
}

fn default_group_lock_timeout_ms() -> u64 {
    5000
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_race_cancel_reason() -> String {
    "superseded by race winner".to_string()
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `TRAMITA_`.
    pub fn from_env() -> EngineResult<Self> {
        Ok(envy::prefixed("TRAMITA_").from_env::<EngineConfig>()?)
    }

    /// Load configuration from `TRAMITA_`-prefixed pairs.
    pub fn from_vars<I>(vars: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed("TRAMITA_").from_iter::<_, EngineConfig>(vars)?)
    }

    /// Group lock deadline as a `Duration`.
    pub fn group_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.group_lock_timeout_ms)
    }

    /// Sub-workflow wait deadline, if configured.
    pub fn sub_workflow_wait_timeout(&self) -> Option<Duration> {
        self.sub_workflow_wait_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_validation: false,
            notifications_enabled: true,
            workflows_enabled: true,
            group_lock_timeout_ms: default_group_lock_timeout_ms(),
            sub_workflow_wait_timeout_secs: None,
            event_channel_capacity: default_event_channel_capacity(),
            race_cancel_reason: default_race_cancel_reason(),
        }
    }
}
