//! Provider bindings: one upstream CLI per provider.
//!
//! A provider owns a set of model ids, a templated response command, and
//! optional auth/status/rate-limit commands. `run` is the hot path: build
//! the prompt, lay down the scratch files, resolve the template, invoke the
//! child, normalize stdout.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{CommandConfig, ModelEntryConfig, ProviderConfig, ResponseCommandConfig};
use crate::error::{GatewayError, Result};
use crate::executor::{self, CommandOutcome};
use crate::jobs::{JobManager, JobSnapshot};
use crate::parser;
use crate::prompt::PromptBuilder;
use crate::template::{self, EscapeMode};
use crate::types::{InputMode, ProviderResult, UnifiedRequest};
use crate::util::truncate;

/// Per-stream cap on diagnostics embedded in provider-exit errors.
const EXIT_DETAIL_CAP: usize = 800;

/// Result of a synchronous auth or rate-limit probe.
#[derive(Debug, Clone, Serialize)]
pub struct CommandProbe {
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandProbe {
    fn not_configured() -> Self {
        Self {
            ok: false,
            exit_code: None,
            stdout: String::new(),
            stderr: "not configured".to_string(),
        }
    }
}

/// Async seam between the dispatcher and provider implementations.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> Option<&str>;

    /// Model entries this provider exposes.
    fn models(&self) -> &[ModelEntryConfig];

    /// Execute one fully-bound request against the upstream.
    async fn run(&self, request: &UnifiedRequest) -> Result<ProviderResult>;

    /// Hand the login command to the job manager.
    async fn start_login_job(&self, jobs: &JobManager) -> Result<JobSnapshot>;

    /// Synchronously probe the auth status command.
    async fn check_auth_status(&self) -> CommandProbe;

    /// Synchronously probe the rate-limit command.
    async fn check_rate_limits(&self) -> CommandProbe;
}

/// The CLI-backed provider.
pub struct CliProvider {
    id: String,
    description: Option<String>,
    models: Vec<ModelEntryConfig>,
    model_ids: HashSet<String>,
    response_command: ResponseCommandConfig,
    login_command: Option<CommandConfig>,
    status_command: Option<CommandConfig>,
    rate_limit_command: Option<CommandConfig>,
    prompts: PromptBuilder,
}

impl CliProvider {
    pub fn from_config(config: ProviderConfig) -> Result<Self> {
        if config.id.trim().is_empty() {
            return Err(GatewayError::Config(
                "provider id must not be empty".to_string(),
            ));
        }
        if config.models.is_empty() {
            warn!(provider_id = %config.id, "provider exposes no models");
        }

        let auth = config.auth.unwrap_or_default();
        Ok(Self {
            model_ids: config.models.iter().map(|model| model.id.clone()).collect(),
            id: config.id,
            description: config.description,
            models: config.models,
            response_command: config.response_command,
            login_command: auth.login_command,
            status_command: auth.status_command,
            rate_limit_command: auth.rate_limit_command,
            prompts: PromptBuilder::new()?,
        })
    }

    fn provider_vars(&self) -> HashMap<String, String> {
        HashMap::from([("provider_id".to_string(), self.id.clone())])
    }

    async fn probe(&self, command: Option<&CommandConfig>) -> CommandProbe {
        let Some(command) = command else {
            return CommandProbe::not_configured();
        };
        let resolved = template::resolve_command(command, &self.provider_vars(), EscapeMode::None);
        match executor::run(&resolved, None).await {
            Ok(outcome) => CommandProbe {
                ok: outcome.success(),
                exit_code: outcome.exit_code,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            },
            Err(e) => CommandProbe {
                ok: false,
                exit_code: None,
                stdout: String::new(),
                stderr: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl ModelProvider for CliProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn models(&self) -> &[ModelEntryConfig] {
        &self.models
    }

    async fn run(&self, request: &UnifiedRequest) -> Result<ProviderResult> {
        if !self.model_ids.contains(&request.model) {
            return Err(GatewayError::Config(format!(
                "provider '{}' does not expose model '{}'",
                self.id, request.model
            )));
        }

        let prompt = if self.response_command.input == InputMode::PromptStdin {
            self.prompts.build_prompt(&request.messages, &request.tools)?
        } else {
            self.prompts.flatten_messages(&request.messages)
        };
        let request_json = serde_json::to_string_pretty(request)
            .map_err(|e| GatewayError::Config(format!("request serialization: {e}")))?;

        // scratch directory is removed on every exit path, including `?`
        let scratch = tempfile::tempdir()
            .map_err(|e| GatewayError::Spawn(format!("scratch directory: {e}")))?;
        let prompt_file = scratch.path().join("prompt.txt");
        let request_file = scratch.path().join("request.json");
        tokio::fs::write(&prompt_file, &prompt)
            .await
            .map_err(|e| GatewayError::Spawn(format!("write {}: {e}", prompt_file.display())))?;
        tokio::fs::write(&request_file, &request_json)
            .await
            .map_err(|e| GatewayError::Spawn(format!("write {}: {e}", request_file.display())))?;

        let mut vars = self.provider_vars();
        vars.insert("request_id".to_string(), request.request_id.clone());
        vars.insert("model".to_string(), request.model.clone());
        vars.insert("provider_model".to_string(), request.provider_model.clone());
        vars.insert("prompt".to_string(), prompt.clone());
        vars.insert("prompt_file".to_string(), prompt_file.display().to_string());
        vars.insert(
            "request_file".to_string(),
            request_file.display().to_string(),
        );

        for warning in template::unsafe_variable_warnings(&vars) {
            warn!(provider_id = %self.id, request_id = %request.request_id, %warning, "template variable check");
        }

        let resolved =
            template::resolve_command(&self.response_command.command, &vars, EscapeMode::None);
        let payload = match self.response_command.input {
            InputMode::PromptStdin => &prompt,
            InputMode::RequestJsonStdin => &request_json,
        };

        debug!(
            provider_id = %self.id,
            model = %request.model,
            request_id = %request.request_id,
            program = %resolved.program,
            "invoking provider command"
        );
        let outcome = executor::run(&resolved, Some(payload)).await?;

        if outcome.timed_out {
            return Err(GatewayError::Timeout {
                timeout_ms: self.response_command.command.timeout_ms,
            });
        }
        if !outcome.success() {
            return Err(provider_exit_error(&outcome));
        }

        let mut result = parser::parse_output(self.response_command.output, &outcome.stdout)?;
        parser::apply_declared_tools(&mut result, &request.tools);
        result.raw = Some(outcome.stdout);
        Ok(result)
    }

    async fn start_login_job(&self, jobs: &JobManager) -> Result<JobSnapshot> {
        let Some(login) = &self.login_command else {
            return Err(GatewayError::Config(format!(
                "login command not configured for provider '{}'",
                self.id
            )));
        };
        let resolved = template::resolve_command(login, &self.provider_vars(), EscapeMode::None);
        Ok(jobs
            .start_command(&format!("login:{}", self.id), resolved)
            .await)
    }

    async fn check_auth_status(&self) -> CommandProbe {
        self.probe(self.status_command.as_ref()).await
    }

    async fn check_rate_limits(&self) -> CommandProbe {
        self.probe(self.rate_limit_command.as_ref()).await
    }
}

fn provider_exit_error(outcome: &CommandOutcome) -> GatewayError {
    let mut detail = String::new();
    let stderr = outcome.stderr.trim();
    let stdout = outcome.stdout.trim();
    if !stderr.is_empty() {
        detail.push_str("stderr: ");
        detail.push_str(&truncate(stderr, EXIT_DETAIL_CAP));
    }
    if !stdout.is_empty() {
        if !detail.is_empty() {
            detail.push_str("; ");
        }
        detail.push_str("stdout: ");
        detail.push_str(&truncate(stdout, EXIT_DETAIL_CAP));
    }
    if detail.is_empty() {
        detail.push_str("no output");
        if let Some(signal) = outcome.signal {
            detail.push_str(&format!(" (signal {signal})"));
        }
    }
    GatewayError::ProviderExit {
        exit_code: outcome.exit_code.unwrap_or(-1),
        detail,
    }
}
