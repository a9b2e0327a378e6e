use std::time::Duration;

/// Process-wide configuration for the matching pipeline. Loaded once from
/// the environment at startup and shared behind an `Arc`; nothing here is
/// per-request.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub openrouter_api_key: Option<String>,
    pub enable_fast_provider: bool,
    pub enable_deep_provider: bool,
    pub fast_model: String,
    pub deep_model: String,

    pub registry_api_url: String,

    pub provider_timeout: Duration,
    pub registry_timeout: Duration,
    pub geocode_timeout: Duration,
    pub request_deadline: Duration,

    pub eligibility_batch_size: usize,
    pub eligibility_concurrency: usize,
    pub acceptance_threshold: f64,
    pub eligibility_weight: f64,
    pub geo_weight: f64,
    pub max_registry_retries: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            openrouter_api_key: None,
            enable_fast_provider: true,
            enable_deep_provider: true,
            fast_model: "openai/gpt-4.1-mini".to_string(),
            deep_model: "anthropic/claude-sonnet-4".to_string(),
            registry_api_url: "https://clinicaltrials.gov/api/v2".to_string(),
            provider_timeout: Duration::from_secs(30),
            registry_timeout: Duration::from_secs(30),
            geocode_timeout: Duration::from_secs(5),
            request_deadline: Duration::from_secs(120),
            eligibility_batch_size: 5,
            eligibility_concurrency: 3,
            acceptance_threshold: 0.35,
            eligibility_weight: 0.7,
            geo_weight: 0.3,
            max_registry_retries: 3,
        }
    }
}

impl MatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openrouter_api_key: std::env::var("OPENROUTER_API_KEY").ok(),
            enable_fast_provider: env_bool("ENABLE_FAST_PROVIDER", defaults.enable_fast_provider),
            enable_deep_provider: env_bool("ENABLE_DEEP_PROVIDER", defaults.enable_deep_provider),
            fast_model: env_string("FAST_MODEL", &defaults.fast_model),
            deep_model: env_string("DEEP_MODEL", &defaults.deep_model),
            registry_api_url: env_string("REGISTRY_API_URL", &defaults.registry_api_url),
            provider_timeout: env_secs("PROVIDER_TIMEOUT_SECS", defaults.provider_timeout),
            registry_timeout: env_secs("REGISTRY_TIMEOUT_SECS", defaults.registry_timeout),
            geocode_timeout: env_secs("GEOCODE_TIMEOUT_SECS", defaults.geocode_timeout),
            request_deadline: env_secs("REQUEST_DEADLINE_SECS", defaults.request_deadline),
            eligibility_batch_size: env_parse(
                "ELIGIBILITY_BATCH_SIZE",
                defaults.eligibility_batch_size,
            )
            .max(1),
            eligibility_concurrency: env_parse(
                "ELIGIBILITY_CONCURRENCY",
                defaults.eligibility_concurrency,
            )
            .max(1),
            acceptance_threshold: env_parse("ACCEPTANCE_THRESHOLD", defaults.acceptance_threshold),
            eligibility_weight: env_parse("ELIGIBILITY_WEIGHT", defaults.eligibility_weight),
            geo_weight: env_parse("GEO_WEIGHT", defaults.geo_weight),
            max_registry_retries: env_parse("MAX_REGISTRY_RETRIES", defaults.max_registry_retries),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
