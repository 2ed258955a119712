//! Provider registry and the model dispatcher.
//!
//! The registry is immutable after construction; `run_model` walks the
//! fallback chain serially, feeding the health tracker at every step. An
//! unknown *initial* model fails immediately without consuming the chain; a
//! dangling fallback mid-chain records a `config` failure against the
//! dangling id and terminates the walk.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ProviderConfig;
use crate::error::{GatewayError, Result};
use crate::health::HealthTracker;
use crate::provider::{CliProvider, ModelProvider};
use crate::types::{dedupe_tools, IncomingRequest, ProviderResult, UnifiedRequest};

/// Binding from a public model id to its provider.
#[derive(Clone)]
pub struct ModelBinding {
    pub model_id: String,
    pub provider_model: String,
    pub description: Option<String>,
    pub fallback_models: Vec<String>,
    pub provider: Arc<dyn ModelProvider>,
}

/// Serializable model listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider_id: String,
    pub provider_model: String,
    pub description: Option<String>,
    pub fallback_models: Vec<String>,
}

/// Serializable provider listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub description: Option<String>,
    pub models: Vec<String>,
}

/// Immutable map of providers and models plus the dispatch logic.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    models: HashMap<String, ModelBinding>,
    tracker: Arc<HealthTracker>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    /// Build the registry from parsed provider configs.
    pub fn from_config(configs: Vec<ProviderConfig>, tracker: Arc<HealthTracker>) -> Result<Self> {
        let mut providers: Vec<Arc<dyn ModelProvider>> = Vec::with_capacity(configs.len());
        for config in configs {
            providers.push(Arc::new(CliProvider::from_config(config)?));
        }
        Self::from_providers(providers, tracker)
    }

    /// Build from already-instantiated providers. Tests register doubles
    /// through this path.
    pub fn from_providers(
        list: Vec<Arc<dyn ModelProvider>>,
        tracker: Arc<HealthTracker>,
    ) -> Result<Self> {
        if list.is_empty() {
            return Err(GatewayError::Config("no providers configured".to_string()));
        }

        let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
        let mut models: HashMap<String, ModelBinding> = HashMap::new();
        for provider in list {
            let provider_id = provider.id().to_string();
            if providers.contains_key(&provider_id) {
                return Err(GatewayError::Config(format!(
                    "duplicate provider id '{provider_id}'"
                )));
            }
            for entry in provider.models() {
                if models.contains_key(&entry.id) {
                    return Err(GatewayError::Config(format!(
                        "duplicate model id '{}'",
                        entry.id
                    )));
                }
                models.insert(
                    entry.id.clone(),
                    ModelBinding {
                        model_id: entry.id.clone(),
                        provider_model: entry.provider_model().to_string(),
                        description: entry.description.clone(),
                        fallback_models: entry.fallback_models.clone(),
                        provider: Arc::clone(&provider),
                    },
                );
            }
            providers.insert(provider_id, provider);
        }

        Ok(Self {
            providers,
            models,
            tracker,
        })
    }

    pub fn list_models(&self) -> Vec<ModelInfo> {
        let mut models: Vec<ModelInfo> = self
            .models
            .values()
            .map(|binding| ModelInfo {
                id: binding.model_id.clone(),
                provider_id: binding.provider.id().to_string(),
                provider_model: binding.provider_model.clone(),
                description: binding.description.clone(),
                fallback_models: binding.fallback_models.clone(),
            })
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        let mut providers: Vec<ProviderInfo> = self
            .providers
            .values()
            .map(|provider| ProviderInfo {
                id: provider.id().to_string(),
                description: provider.description().map(str::to_string),
                models: provider.models().iter().map(|m| m.id.clone()).collect(),
            })
            .collect();
        providers.sort_by(|a, b| a.id.cmp(&b.id));
        providers
    }

    pub fn provider(&self, id: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn model(&self, id: &str) -> Option<&ModelBinding> {
        self.models.get(id)
    }

    pub fn tracker(&self) -> &Arc<HealthTracker> {
        &self.tracker
    }

    /// Execute a request against `model_id`, walking the fallback chain on
    /// failure.
    pub async fn run_model(
        &self,
        model_id: &str,
        incoming: IncomingRequest,
    ) -> Result<ProviderResult> {
        if !self.models.contains_key(model_id) {
            return Err(GatewayError::InvalidModel(model_id.to_string()));
        }

        let tools = dedupe_tools(incoming.tools);
        let mut attempted: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = model_id.to_string();
        let mut last_error: Option<GatewayError> = None;

        loop {
            if !visited.insert(current.clone()) {
                break;
            }
            attempted.push(current.clone());
            let attempt_index = attempted.len() - 1;

            let Some(binding) = self.models.get(&current) else {
                // dangling fallback reference; never the first hop
                self.tracker
                    .record_attempt(&current, model_id, "unknown", &current, attempt_index)
                    .await;
                let err = GatewayError::Config(format!("Fallback model not found: {current}"));
                self.tracker
                    .record_failure(&current, "unknown", Duration::ZERO, &err.to_string())
                    .await;
                last_error = Some(err);
                break;
            };

            let provider_id = binding.provider.id().to_string();
            self.tracker
                .record_attempt(
                    &current,
                    model_id,
                    &provider_id,
                    &binding.provider_model,
                    attempt_index,
                )
                .await;

            let request = UnifiedRequest {
                request_id: incoming.request_id.clone(),
                model: current.clone(),
                provider_model: binding.provider_model.clone(),
                messages: incoming.messages.clone(),
                tools: tools.clone(),
                metadata: incoming.metadata.clone(),
            };

            let started = Instant::now();
            match binding.provider.run(&request).await {
                Ok(result) => {
                    self.tracker.record_success(&current, started.elapsed()).await;
                    info!(
                        model = %current,
                        requested = %model_id,
                        attempt = attempt_index,
                        "model run succeeded"
                    );
                    return Ok(result);
                }
                Err(err) => {
                    let kind = self
                        .tracker
                        .record_failure(&current, &provider_id, started.elapsed(), &err.to_string())
                        .await;
                    warn!(
                        model = %current,
                        requested = %model_id,
                        kind = kind.as_str(),
                        error = %err,
                        "model run failed"
                    );
                    last_error = Some(err);

                    let next = binding
                        .fallback_models
                        .iter()
                        .find(|candidate| !visited.contains(*candidate))
                        .cloned();
                    match next {
                        Some(next) => {
                            self.tracker.record_fallback(&current, &next).await;
                            info!(from = %current, to = %next, reason = kind.as_str(), "falling back");
                            current = next;
                        }
                        None => break,
                    }
                }
            }
        }

        let Some(last) = last_error else {
            // the loop above always records an error before breaking
            return Err(GatewayError::Config(
                "fallback chain terminated without an attempt".to_string(),
            ));
        };
        if attempted.len() <= 1 {
            Err(last)
        } else {
            Err(GatewayError::ChainExhausted(format!(
                "Model execution failed after fallback chain: {}. Last error: {last}",
                attempted.join(" -> ")
            )))
        }
    }
}
