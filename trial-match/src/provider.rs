use async_trait::async_trait;
use rig::completion::Prompt;
use rig::prelude::*;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::ProviderError;

/// Successful completion: raw model text plus the provider identity and the
/// observed latency. Produced and consumed within a single router call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub provider: String,
    pub latency: Duration,
}

/// Uniform call contract over heterogeneous LLM backends. No business
/// logic and no retries live here; the call either returns model text
/// within the timeout or fails with a typed error.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        schema_hint: Option<&str>,
        timeout: Duration,
    ) -> Result<Completion, ProviderError>;
}

/// Gateway over one OpenRouter-hosted model. The two logical providers of
/// the pipeline (low-latency vs long-context) are two instances of this with
/// different model ids.
pub struct OpenRouterProvider {
    name: String,
    agent: rig::agent::Agent<rig::providers::openrouter::CompletionModel>,
}

impl OpenRouterProvider {
    pub fn new(name: &str, model: &str, api_key: &str, preamble: &str) -> Self {
        let client = rig::providers::openrouter::Client::new(api_key);
        let agent = client.agent(model).preamble(preamble).build();
        Self {
            name: name.to_string(),
            agent,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        prompt: &str,
        schema_hint: Option<&str>,
        timeout: Duration,
    ) -> Result<Completion, ProviderError> {
        let started = Instant::now();
        let full_prompt = match schema_hint {
            Some(hint) => format!("{prompt}\n\n{hint}"),
            None => prompt.to_string(),
        };

        debug!(provider = %self.name, prompt_len = full_prompt.len(), "dispatching completion");

        let text = tokio::time::timeout(timeout, self.agent.prompt(full_prompt))
            .await
            .map_err(|_| ProviderError::Timeout(timeout))?
            .map_err(|e| classify_prompt_error(&e.to_string()))?;

        Ok(Completion {
            text,
            provider: self.name.clone(),
            latency: started.elapsed(),
        })
    }
}

// rig surfaces HTTP-level failures as strings; sort them into the typed
// taxonomy so the router and callers can reason about them.
fn classify_prompt_error(message: &str) -> ProviderError {
    let lower = message.to_lowercase();
    if lower.contains("401") || lower.contains("unauthorized") || lower.contains("api key") {
        ProviderError::Auth(message.to_string())
    } else if lower.contains("429") || lower.contains("rate limit") {
        ProviderError::RateLimited(message.to_string())
    } else {
        ProviderError::Upstream(message.to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider for tests: pops one canned response per call and
    /// counts invocations.
    pub struct ScriptedProvider {
        name: String,
        responses: Mutex<VecDeque<Result<String, ProviderError>>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn new(
            name: &str,
            responses: impl IntoIterator<Item = Result<String, ProviderError>>,
        ) -> Self {
            Self {
                name: name.to_string(),
                responses: Mutex::new(responses.into_iter().collect()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn always(name: &str, response: &str) -> Self {
            Self::new(name, std::iter::repeat_n(Ok(response.to_string()), 64))
        }

        pub fn failing(name: &str) -> Self {
            Self::new(
                name,
                (0..64).map(|_| {
                    Err(ProviderError::Upstream(
                        "scripted upstream failure".to_string(),
                    ))
                }),
            )
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(
            &self,
            _prompt: &str,
            _schema_hint: Option<&str>,
            _timeout: Duration,
        ) -> Result<Completion, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Upstream("script exhausted".to_string())));
            response.map(|text| Completion {
                text,
                provider: self.name.clone(),
                latency: Duration::from_millis(1),
            })
        }
    }

    #[test]
    fn prompt_errors_classify_into_taxonomy() {
        assert!(matches!(
            classify_prompt_error("HTTP 401 Unauthorized"),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            classify_prompt_error("429 too many requests"),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_prompt_error("500 internal server error"),
            ProviderError::Upstream(_)
        ));
    }
}
