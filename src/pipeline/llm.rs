//! Chat-model seam and the edgequake-llm implementation.
//!
//! The analyzer only sees [`ChatBackend`]: one system prompt, one user
//! prompt, one text reply. [`EdgequakeBackend`] adapts any
//! `edgequake_llm::LLMProvider` to it, and [`resolve_backend`] picks the
//! provider from the config and environment.

use crate::config::ScanConfig;
use crate::error::EatSafeError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A single non-streaming chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// The model's reply and its token usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Anything that can answer a [`ChatRequest`].
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Provider name for logs and error messages.
    fn name(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply, EatSafeError>;
}

/// [`ChatBackend`] over an edgequake-llm provider.
pub struct EdgequakeBackend {
    name: String,
    provider: Arc<dyn LLMProvider>,
}

impl EdgequakeBackend {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }
}

impl std::fmt::Debug for EdgequakeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgequakeBackend")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl ChatBackend for EdgequakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply, EatSafeError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(&request.system),
            ChatMessage::user(&request.user),
        ];
        let options = build_options(request);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| EatSafeError::ApiError {
                provider: self.name.clone(),
                message: e.to_string(),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.name,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(ChatReply {
            content: response.content,
            prompt_tokens: response.prompt_tokens as u64,
            completion_tokens: response.completion_tokens as u64,
        })
    }
}

fn build_options(request: &ChatRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_tokens),
        ..Default::default()
    }
}

fn create_backend(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn ChatBackend>, EatSafeError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        EatSafeError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(EdgequakeBackend::new(provider_name, provider)))
}

/// Resolve the chat backend, from most-specific to least-specific.
///
/// 1. **Pre-built backend** (`config.provider`), used as-is. This is how
///    tests and embedding applications inject their own.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or
///    the default model.
/// 3. **Environment pair** `EATSAFE_PROVIDER` + `EATSAFE_MODEL`, when both
///    are set and non-empty.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set, even if other keys are too.
/// 5. **Auto-detection** via `ProviderFactory::from_env`.
///
/// # Errors
/// [`EatSafeError::ProviderNotConfigured`] when no step yields a provider.
pub fn resolve_backend(config: &ScanConfig) -> Result<Arc<dyn ChatBackend>, EatSafeError> {
    if let Some(ref backend) = config.provider {
        return Ok(Arc::clone(backend));
    }

    if let Some(ref name) = config.provider_name {
        return create_backend(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EATSAFE_PROVIDER"),
        std::env::var("EATSAFE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_backend(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_backend("openai", config.model_or_default());
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| EatSafeError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {e}"
            ),
        })?;
    Ok(Arc::new(EdgequakeBackend::new("auto", provider)))
}
