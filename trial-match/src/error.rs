use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MatchError>;

/// Failure kinds a completion provider can surface. The gateway never
/// retries; retry/fallback policy lives in the router.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider authentication failed: {0}")]
    Auth(String),
    #[error("provider rate limited: {0}")]
    RateLimited(String),
    #[error("upstream provider error: {0}")]
    Upstream(String),
}

/// One failed routing attempt: either the gateway call itself failed, or it
/// returned text the caller could not parse into its expected schema.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("unparsable response: {0}")]
    Parse(String),
}

/// Returned when the primary provider and the single fallback both failed.
/// Carries every underlying attempt so callers can log the full story while
/// they degrade gracefully.
#[derive(Error, Debug)]
#[error("all providers failed: {}", render_attempts(.attempts))]
pub struct RouterFailure {
    pub attempts: Vec<(String, AttemptError)>,
}

fn render_attempts(attempts: &[(String, AttemptError)]) -> String {
    attempts
        .iter()
        .map(|(provider, err)| format!("{provider}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("registry returned malformed payload: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("geocoding transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("no coordinates found for '{0}'")]
    NotFound(String),
}

/// Top-level pipeline error. Only `InvalidInput` and `NoProviders` are meant
/// to reach users as hard failures; everything else is absorbed by the
/// degradation policy of the stage that hit it.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no completion providers are configured or enabled")]
    NoProviders,
    #[error(transparent)]
    Router(#[from] RouterFailure),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_failure_lists_every_attempt() {
        let failure = RouterFailure {
            attempts: vec![
                (
                    "fast".to_string(),
                    AttemptError::Provider(ProviderError::Timeout(Duration::from_secs(30))),
                ),
                (
                    "deep".to_string(),
                    AttemptError::Parse("missing closing brace".to_string()),
                ),
            ],
        };

        let message = failure.to_string();
        assert!(message.contains("fast"));
        assert!(message.contains("deep"));
        assert!(message.contains("timed out"));
        assert!(message.contains("missing closing brace"));
    }
}
