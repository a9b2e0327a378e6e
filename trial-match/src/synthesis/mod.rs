pub mod corpus;

use dashmap::DashMap;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{info, warn};

use crate::router::{RequestClass, SmartRouter};

/// Optional patient context attached to query generation. Serialized into
/// the prompt and into the memoization key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancer_stage: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub secondary_conditions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub previous_treatments: Vec<String>,
}

/// Turns a diagnosis into a registry-conformant boolean search expression:
/// retrieve grammar documentation, ask the router for an expression, validate
/// it, and fall back deterministically when anything goes wrong. Results are
/// memoized for the process lifetime.
pub struct QuerySynthesizer {
    router: Arc<SmartRouter>,
    cache: DashMap<u64, String>,
}

impl QuerySynthesizer {
    pub fn new(router: Arc<SmartRouter>) -> Self {
        Self {
            router,
            cache: DashMap::new(),
        }
    }

    /// Produce a search expression for the diagnosis. Never fails: any
    /// provider or validation problem degrades to a single concept-expansion
    /// term built from the diagnosis itself.
    pub async fn synthesize(&self, diagnosis: &str, context: &QueryContext) -> String {
        let key = cache_key(diagnosis, context);
        if let Some(hit) = self.cache.get(&key) {
            info!(diagnosis, "query synthesis cache hit");
            return hit.clone();
        }

        let expression = self.generate(diagnosis, context).await;
        self.cache.insert(key, expression.clone());
        expression
    }

    async fn generate(&self, diagnosis: &str, context: &QueryContext) -> String {
        let fragments = corpus::retrieve(diagnosis);
        let docs = fragments
            .iter()
            .map(|f| format!("# {}\n{}", f.title, f.body))
            .collect::<Vec<_>>()
            .join("\n\n");

        let context_json =
            serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string());

        let prompt = format!(
            r#"You are an expert in the clinical trial registry search grammar documented below.

{docs}

Generate one optimized registry search expression for the medical condition: {diagnosis}
Additional patient context:
{context_json}

Rules:
- Use EXPANSION[Concept] for the main condition
- Keep the expression focused on the condition; do not add status or location filters
- Return ONLY the search expression, nothing else"#
        );

        match self
            .router
            .route(RequestClass::QuerySynthesis, &prompt, None)
            .await
        {
            Ok(completion) => match extract_expression(&completion.text) {
                Some(expression) => {
                    info!(diagnosis, %expression, "synthesized search expression");
                    expression
                }
                None => {
                    warn!(
                        diagnosis,
                        response = %completion.text,
                        "model output failed grammar validation, using fallback"
                    );
                    fallback_expression(diagnosis)
                }
            },
            Err(failure) => {
                warn!(diagnosis, error = %failure, "query synthesis failed, using fallback");
                fallback_expression(diagnosis)
            }
        }
    }
}

/// Deterministic degradation: a single concept-expansion of the diagnosis.
pub fn fallback_expression(diagnosis: &str) -> String {
    format!("EXPANSION[Concept]{}", diagnosis.trim())
}

fn cache_key(diagnosis: &str, context: &QueryContext) -> u64 {
    let mut hasher = DefaultHasher::new();
    diagnosis.trim().to_lowercase().hash(&mut hasher);
    serde_json::to_string(context)
        .unwrap_or_default()
        .hash(&mut hasher);
    hasher.finish()
}

/// Pull the actual expression out of the model's prose: strip known
/// prefixes and code fences from each line, then keep the longest candidate
/// that validates against the grammar.
fn extract_expression(response: &str) -> Option<String> {
    const PREFIXES: &[&str] = &[
        "Search Query:",
        "Query:",
        "The search query is:",
        "Here is the search query:",
        "The optimized query is:",
    ];

    let mut best: Option<String> = None;
    for raw_line in response.lines() {
        let mut line = raw_line.trim();
        for prefix in PREFIXES {
            if let Some(stripped) = line.strip_prefix(prefix) {
                line = stripped.trim();
            }
        }
        let line = line.trim_matches('`').trim().trim_end_matches('.');
        if validate_expression(line) && best.as_ref().is_none_or(|b| line.len() > b.len()) {
            best = Some(line.to_string());
        }
    }
    best
}

const KNOWN_BRACKET_OPERATORS: &[&str] = &["EXPANSION", "AREA", "SEARCH", "RANGE"];

/// Grammar validation: an operator must be present, parentheses and brackets
/// balanced, and every `NAME[` token must be a known operator.
pub fn validate_expression(query: &str) -> bool {
    if query.len() < 10 {
        return false;
    }

    let has_operator = KNOWN_BRACKET_OPERATORS
        .iter()
        .any(|op| query.contains(&format!("{op}[")))
        || [" AND ", " OR ", " NOT "].iter().any(|op| query.contains(op));
    if !has_operator {
        return false;
    }

    if !balanced(query, '(', ')') || !balanced(query, '[', ']') {
        return false;
    }

    // Reject unknown NAME[...] operators.
    let bytes = query.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'[' {
            let start = query[..i]
                .rfind(|c: char| !c.is_ascii_alphabetic())
                .map(|p| p + 1)
                .unwrap_or(0);
            let name = &query[start..i];
            if !name.is_empty()
                && name.chars().all(|c| c.is_ascii_uppercase())
                && !KNOWN_BRACKET_OPERATORS.contains(&name)
            {
                return false;
            }
        }
    }

    true
}

fn balanced(query: &str, open: char, close: char) -> bool {
    let mut depth = 0i32;
    for c in query.chars() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth < 0 {
                return false;
            }
        }
    }
    depth == 0
}
