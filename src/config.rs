//! Gateway configuration: file format, defaults and validation.
//!
//! The `providers:` section is the compatibility surface; `server:` and
//! `jobs:` are additive. All command strings may carry `{{name}}` template
//! placeholders, resolved per invocation.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GatewayError, Result};
use crate::types::{InputMode, OutputMode};

/// Default child-process timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 180_000;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    pub providers: Vec<ProviderConfig>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Single API key required on every request when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Background-job manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobsConfig {
    /// Ring-buffer cap for per-job log lines.
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,
    /// Per-kind retention cap; oldest finished jobs are evicted past this.
    #[serde(default = "default_max_jobs_per_kind")]
    pub max_jobs_per_kind: usize,
    /// Executable basenames operators may launch through the generic CLI
    /// endpoint. Empty means the endpoint is effectively disabled.
    #[serde(default)]
    pub allowed_executables: Vec<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_log_lines: default_max_log_lines(),
            max_jobs_per_kind: default_max_jobs_per_kind(),
            allowed_executables: Vec::new(),
        }
    }
}

fn default_max_log_lines() -> usize {
    300
}

fn default_max_jobs_per_kind() -> usize {
    50
}

/// One upstream CLI binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub models: Vec<ModelEntryConfig>,
    pub response_command: ResponseCommandConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

/// Provider implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Cli,
}

/// One model exposed by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntryConfig {
    pub id: String,
    /// Upstream model identifier; defaults to the public id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Models to try, in order, when this one fails.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_models: Vec<String>,
}

impl ModelEntryConfig {
    /// Upstream id, falling back to the public id.
    pub fn provider_model(&self) -> &str {
        self.provider_model.as_deref().unwrap_or(&self.id)
    }
}

/// Command template; every string field may carry `{{name}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandConfig {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// The response command plus its stdin/stdout contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCommandConfig {
    #[serde(flatten)]
    pub command: CommandConfig,
    #[serde(default)]
    pub input: InputMode,
    #[serde(default)]
    pub output: OutputMode,
}

/// Optional auth-related commands for a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_command: Option<CommandConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_command: Option<CommandConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_command: Option<CommandConfig>,
}

impl GatewayConfig {
    /// Load and validate a YAML configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation. Dangling fallback references only warn here;
    /// they surface as runtime failures because they depend on request
    /// routing.
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(GatewayError::Config("no providers configured".to_string()));
        }

        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(GatewayError::Config(
                    "provider id must not be empty".to_string(),
                ));
            }
            check_command(&provider.response_command.command, &provider.id)?;
            if let Some(auth) = &provider.auth {
                for command in [
                    auth.login_command.as_ref(),
                    auth.status_command.as_ref(),
                    auth.rate_limit_command.as_ref(),
                ]
                .into_iter()
                .flatten()
                {
                    check_command(command, &provider.id)?;
                }
            }
            for model in &provider.models {
                if model.id.trim().is_empty() {
                    return Err(GatewayError::Config(format!(
                        "provider '{}': model id must not be empty",
                        provider.id
                    )));
                }
            }
        }

        let known: HashSet<&str> = self
            .providers
            .iter()
            .flat_map(|p| p.models.iter().map(|m| m.id.as_str()))
            .collect();
        for provider in &self.providers {
            for model in &provider.models {
                for fallback in &model.fallback_models {
                    if !known.contains(fallback.as_str()) {
                        warn!(
                            model_id = %model.id,
                            fallback = %fallback,
                            "fallback references an unregistered model"
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

fn check_command(command: &CommandConfig, provider_id: &str) -> Result<()> {
    if command.executable.trim().is_empty() {
        return Err(GatewayError::Config(format!(
            "provider '{provider_id}': command executable must not be empty"
        )));
    }
    if command.timeout_ms == 0 {
        return Err(GatewayError::Config(format!(
            "provider '{provider_id}': timeoutMs must be positive"
        )));
    }
    Ok(())
}
