//! Configuration for the resolver.
//!
//! Engine tunables plus, for standalone use, a set of projects whose mocks are
//! written in the same shape the dashboard persists them in.

use crate::model::StoredMock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Hard ceiling for any configured response delay.
pub const MAX_RESPONSE_DELAY_MS: u64 = 10_000;

/// Main configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    /// Engine settings
    #[serde(default)]
    pub settings: EngineSettings,

    /// Projects served by the in-memory store
    #[serde(default)]
    pub projects: Vec<ProjectFixture>,
}

impl ResolverConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.settings.validate()?;

        let mut slugs = HashSet::new();
        for (i, project) in self.projects.iter().enumerate() {
            project
                .validate()
                .map_err(|e| anyhow::anyhow!("Project {}: {}", i, e))?;
            if !slugs.insert(project.slug.as_str()) {
                anyhow::bail!("Duplicate project slug: {}", project.slug);
            }
        }
        Ok(())
    }

    /// Total number of mocks across all projects.
    pub fn mock_count(&self) -> usize {
        self.projects.iter().map(|p| p.mocks.len()).sum()
    }
}

/// A project and its mocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectFixture {
    /// Public slug used in mock URLs
    pub slug: String,

    #[serde(default)]
    pub mocks: Vec<StoredMock>,
}

impl ProjectFixture {
    /// Validate the project.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.slug.trim().is_empty() {
            anyhow::bail!("Project slug cannot be empty");
        }

        let mut routes = HashSet::new();
        for mock in &self.mocks {
            if mock.mock_id.is_empty() {
                anyhow::bail!("Mock id cannot be empty");
            }
            if !mock.path.starts_with('/') {
                anyhow::bail!("Mock {} path must start with '/': {}", mock.mock_id, mock.path);
            }
            let route = (mock.method.to_uppercase(), mock.path.as_str());
            if !routes.insert(route) {
                anyhow::bail!(
                    "Duplicate mock for {} {}",
                    mock.method.to_uppercase(),
                    mock.path
                );
            }
        }
        Ok(())
    }
}

/// Engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Time budget for compiling and running one regex condition
    #[serde(default = "default_regex_timeout_ms")]
    pub regex_timeout_ms: u64,

    /// Maximum number of compiled patterns kept
    #[serde(default = "default_regex_cache_capacity")]
    pub regex_cache_capacity: usize,

    /// Upper bound on a compiled regex program, in bytes
    #[serde(default = "default_regex_size_limit")]
    pub regex_size_limit: usize,

    /// How long a fetched endpoint snapshot is reused
    #[serde(default = "default_config_cache_ttl_ms")]
    pub config_cache_ttl_ms: u64,

    /// Configured delays are clamped to this value
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Wall-clock allowance for everything except the delay
    #[serde(default = "default_compute_budget_ms")]
    pub compute_budget_ms: u64,

    /// Buffered request-log records before new ones are dropped
    #[serde(default = "default_log_channel_capacity")]
    pub log_channel_capacity: usize,

    /// Content type for endpoints that do not declare one
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            regex_timeout_ms: default_regex_timeout_ms(),
            regex_cache_capacity: default_regex_cache_capacity(),
            regex_size_limit: default_regex_size_limit(),
            config_cache_ttl_ms: default_config_cache_ttl_ms(),
            max_delay_ms: default_max_delay_ms(),
            compute_budget_ms: default_compute_budget_ms(),
            log_channel_capacity: default_log_channel_capacity(),
            default_content_type: default_content_type(),
        }
    }
}

impl EngineSettings {
    /// Validate the settings.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.regex_timeout_ms == 0 {
            anyhow::bail!("regex_timeout_ms must be greater than 0");
        }
        if self.regex_cache_capacity == 0 {
            anyhow::bail!("regex_cache_capacity must be greater than 0");
        }
        if self.regex_size_limit == 0 {
            anyhow::bail!("regex_size_limit must be greater than 0");
        }
        if self.max_delay_ms > MAX_RESPONSE_DELAY_MS {
            anyhow::bail!(
                "max_delay_ms cannot exceed {} (got {})",
                MAX_RESPONSE_DELAY_MS,
                self.max_delay_ms
            );
        }
        if self.log_channel_capacity == 0 {
            anyhow::bail!("log_channel_capacity must be greater than 0");
        }
        if self.default_content_type.trim().is_empty() {
            anyhow::bail!("default_content_type cannot be empty");
        }
        Ok(())
    }

    pub fn regex_timeout(&self) -> Duration {
        Duration::from_millis(self.regex_timeout_ms)
    }

    pub fn config_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.config_cache_ttl_ms)
    }

    /// Upper bound for a whole resolution: delay ceiling plus compute budget.
    pub fn pipeline_budget(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms + self.compute_budget_ms)
    }
}

fn default_regex_timeout_ms() -> u64 {
    50
}

fn default_regex_cache_capacity() -> usize {
    1024
}

fn default_regex_size_limit() -> usize {
    1 << 20
}

fn default_config_cache_ttl_ms() -> u64 {
    3_000
}

fn default_max_delay_ms() -> u64 {
    MAX_RESPONSE_DELAY_MS
}

fn default_compute_budget_ms() -> u64 {
    250
}

fn default_log_channel_capacity() -> usize {
    1024
}

fn default_content_type() -> String {
    "application/json".to_string()
}
