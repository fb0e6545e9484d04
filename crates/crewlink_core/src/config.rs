//! Runtime policy configuration for the collaboration core.
//!
//! # Responsibility
//! - Hold the policy switches the services consult (promotion races,
//!   project chat visibility, fan-out bound).
//! - Parse configuration from JSON with defaults for every missing field.
//!
//! # Invariants
//! - `CoreConfig::default()` is the documented production default.
//! - Unknown enum values are rejected instead of silently mapped.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

const DEFAULT_MAX_FANOUT_RECIPIENTS: usize = 5_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// How racing admin/lead promotions are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionPolicy {
    /// The promotion that commits last overwrites earlier ones.
    #[default]
    LastCommittedWins,
    /// A promotion whose observed holder changed before commit fails with
    /// `Conflict`.
    RejectConcurrent,
}

/// Which cluster members may read project chats inside their cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectChatVisibility {
    /// Only project members.
    ProjectMembersOnly,
    /// Project members plus the cluster admin.
    #[default]
    ClusterAdmins,
    /// Project members plus every cluster member.
    AllClusterMembers,
}

/// Core policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub promotion_policy: PromotionPolicy,
    pub project_chat_visibility: ProjectChatVisibility,
    /// Sends whose audience exceeds this bound are rejected, keeping the
    /// fan-out transaction short.
    pub max_fanout_recipients: usize,
    /// SQLite busy timeout applied to every opened connection.
    pub busy_timeout_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            promotion_policy: PromotionPolicy::default(),
            project_chat_visibility: ProjectChatVisibility::default(),
            max_fanout_recipients: DEFAULT_MAX_FANOUT_RECIPIENTS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Configuration loading failure.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(details) => write!(f, "invalid config: {details}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl CoreConfig {
    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_fanout_recipients == 0 {
            return Err(ConfigError::Invalid("max_fanout_recipients must be > 0"));
        }
        Ok(())
    }
}
