use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{AttemptError, MatchError, RouterFailure};
use crate::provider::{Completion, CompletionProvider};

/// What kind of work a routed request is doing. Extraction and eligibility
/// prompts carry clinical content and get complexity-based selection; the
/// other classes default to the low-latency provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Extraction,
    QuerySynthesis,
    EligibilityJudgment,
    QuestionAnswer,
}

/// Transcript-derived signals used for provider selection.
#[derive(Debug, Clone, Copy)]
pub struct ContentSignals {
    pub word_count: usize,
    pub complexity: f64,
}

const LONG_CONTENT_WORDS: usize = 2000;
const COMPLEXITY_THRESHOLD: f64 = 0.4;

/// Selects a primary provider per request and manages exactly one fallback
/// attempt. Worst-case latency is bounded at two provider calls.
pub struct SmartRouter {
    fast: Option<Arc<dyn CompletionProvider>>,
    deep: Option<Arc<dyn CompletionProvider>>,
    timeout: Duration,
}

impl SmartRouter {
    pub fn new(
        fast: Option<Arc<dyn CompletionProvider>>,
        deep: Option<Arc<dyn CompletionProvider>>,
        timeout: Duration,
    ) -> Result<Self, MatchError> {
        if fast.is_none() && deep.is_none() {
            return Err(MatchError::NoProviders);
        }
        Ok(Self {
            fast,
            deep,
            timeout,
        })
    }

    /// Primary/secondary ordering for one request. The secondary is `None`
    /// when only one provider is configured.
    fn select(
        &self,
        class: RequestClass,
        content: &str,
    ) -> (Arc<dyn CompletionProvider>, Option<Arc<dyn CompletionProvider>>) {
        let prefer_deep = match class {
            RequestClass::Extraction | RequestClass::EligibilityJudgment => {
                let signals = analyze_content(content);
                let deep = signals.word_count > LONG_CONTENT_WORDS
                    || signals.complexity > COMPLEXITY_THRESHOLD;
                info!(
                    words = signals.word_count,
                    complexity = format!("{:.2}", signals.complexity),
                    prefer_deep = deep,
                    "content signals"
                );
                deep
            }
            RequestClass::QuerySynthesis | RequestClass::QuestionAnswer => false,
        };

        let (first, second) = if prefer_deep {
            (&self.deep, &self.fast)
        } else {
            (&self.fast, &self.deep)
        };

        match (first, second) {
            (Some(p), s) => (p.clone(), s.clone()),
            (None, Some(s)) => (s.clone(), None),
            (None, None) => unreachable!("constructor guarantees at least one provider"),
        }
    }

    /// Route a request and parse the response with the caller's closure.
    /// `content` is the clinical text selection signals are computed from;
    /// it is the bare transcript or patient summary, not the full prompt,
    /// so boilerplate never biases provider choice. A gateway failure or an
    /// unparsable success both trigger the single fallback attempt; if that
    /// also fails, the typed `RouterFailure` carries every underlying error.
    pub async fn route_parsed<T, F>(
        &self,
        class: RequestClass,
        content: &str,
        prompt: &str,
        schema_hint: Option<&str>,
        parse: F,
    ) -> Result<(T, Completion), RouterFailure>
    where
        F: Fn(&str) -> Result<T, String>,
    {
        let (primary, secondary) = self.select(class, content);
        let mut attempts: Vec<(String, AttemptError)> = Vec::new();

        for provider in std::iter::once(primary).chain(secondary) {
            match provider.complete(prompt, schema_hint, self.timeout).await {
                Ok(completion) => match parse(&completion.text) {
                    Ok(parsed) => {
                        info!(
                            provider = %completion.provider,
                            latency_ms = completion.latency.as_millis() as u64,
                            "routed request succeeded"
                        );
                        return Ok((parsed, completion));
                    }
                    Err(reason) => {
                        warn!(provider = %provider.name(), %reason, "response failed caller parse");
                        attempts.push((provider.name().to_string(), AttemptError::Parse(reason)));
                    }
                },
                Err(err) => {
                    warn!(provider = %provider.name(), error = %err, "provider call failed");
                    attempts.push((provider.name().to_string(), AttemptError::Provider(err)));
                }
            }
        }

        Err(RouterFailure { attempts })
    }

    /// Route a request that only needs raw model text. The prompt doubles
    /// as selection content; the classes that use this path do not do
    /// complexity-based selection.
    pub async fn route(
        &self,
        class: RequestClass,
        prompt: &str,
        schema_hint: Option<&str>,
    ) -> Result<Completion, RouterFailure> {
        self.route_parsed(class, prompt, prompt, schema_hint, |text| {
            Ok::<_, String>(text.to_string())
        })
        .await
        .map(|(_, completion)| completion)
    }
}

/// Compute routing signals from prompt/transcript content: length plus a
/// medical-complexity score built from condition, terminology, multi-system
/// and procedure vocabulary, medication density and specialist involvement.
pub fn analyze_content(text: &str) -> ContentSignals {
    let word_count = text.split_whitespace().count();
    ContentSignals {
        word_count,
        complexity: medical_complexity(text),
    }
}

const RARE_CONDITIONS: &[&str] = &[
    "adenocarcinoma",
    "lymphoma",
    "sarcoma",
    "metastatic",
    "malignant",
    "syndrome",
    "dystrophy",
    "autoimmune",
    "congenital",
];

const COMPLEX_TERMS: &[&str] = &[
    "pathophysiology",
    "pharmacokinetics",
    "immunotherapy",
    "chemotherapy",
    "radiation",
    "biomarker",
    "genetic",
    "mutation",
    "prognosis",
];

const MULTI_SYSTEM: &[&str] = &[
    "cardiovascular",
    "pulmonary",
    "hepatic",
    "renal",
    "neurological",
    "gastrointestinal",
    "endocrine",
    "hematologic",
];

const PROCEDURES: &[&str] = &[
    "surgical",
    "resection",
    "biopsy",
    "catheterization",
    "transplant",
    "dialysis",
    "endoscopy",
    "angiography",
];

const SPECIALISTS: &[&str] = &[
    "cardiologist",
    "oncologist",
    "neurologist",
    "pulmonologist",
    "gastroenterologist",
    "endocrinologist",
    "rheumatologist",
    "hematologist",
    "urologist",
    "psychiatrist",
    "surgeon",
];

const KNOWN_MEDICATIONS: &[&str] = &[
    "aspirin",
    "ibuprofen",
    "acetaminophen",
    "prednisone",
    "metformin",
    "insulin",
    "lisinopril",
    "amlodipine",
    "atorvastatin",
    "omeprazole",
    "levothyroxine",
    "warfarin",
];

// Drug-class name endings: -cin, -pril, -statin, -zole, -lol, -pine.
const MEDICATION_SUFFIXES: &[&str] = &["cin", "pril", "statin", "zole", "lol", "pine"];

fn medical_complexity(text: &str) -> f64 {
    let lower = text.to_lowercase();

    let categories: [(&[&str], f64); 4] = [
        (RARE_CONDITIONS, 0.3),
        (COMPLEX_TERMS, 0.3),
        (MULTI_SYSTEM, 0.2),
        (PROCEDURES, 0.2),
    ];

    let mut score = 0.0;
    for (terms, weight) in categories {
        let hits = terms.iter().filter(|t| lower.contains(**t)).count();
        score += (hits as f64 / terms.len() as f64).min(1.0) * weight;
    }

    let medication_count = count_medications(&lower);
    score += (medication_count as f64 / 5.0).min(1.0) * 0.1;

    let specialist_count = SPECIALISTS.iter().filter(|s| lower.contains(**s)).count();
    score += (specialist_count as f64 / 3.0).min(1.0) * 0.1;

    score.min(1.0)
}

fn count_medications(lower: &str) -> usize {
    let known = KNOWN_MEDICATIONS
        .iter()
        .filter(|m| lower.contains(**m))
        .count();
    let by_suffix = lower
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| {
            word.len() > 4
                && MEDICATION_SUFFIXES
                    .iter()
                    .any(|suffix| word.ends_with(suffix))
        })
        .count();
    known + by_suffix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;

    fn router_with(
        fast: Option<ScriptedProvider>,
        deep: Option<ScriptedProvider>,
    ) -> (SmartRouter, Option<Arc<ScriptedProvider>>, Option<Arc<ScriptedProvider>>) {
        let fast = fast.map(Arc::new);
        let deep = deep.map(Arc::new);
        let router = SmartRouter::new(
            fast.clone().map(|p| p as Arc<dyn CompletionProvider>),
            deep.clone().map(|p| p as Arc<dyn CompletionProvider>),
            Duration::from_secs(5),
        )
        .unwrap();
        (router, fast, deep)
    }

    #[test]
    fn short_simple_transcript_selects_fast_provider() {
        // ~40 words, plain type 2 diabetes narrative.
        let transcript = "Patient is a 54 year old man with type 2 diabetes \
            managed with diet and exercise. He reports stable blood sugar \
            readings over the last six months and walks daily. No other \
            complaints today and vitals were within normal limits overall."
            .to_string();

        let signals = analyze_content(&transcript);
        assert!(signals.word_count < 100);
        assert!(signals.complexity <= COMPLEXITY_THRESHOLD);

        let (router, _, _) = router_with(
            Some(ScriptedProvider::always("fast", "ok")),
            Some(ScriptedProvider::always("deep", "ok")),
        );
        let (primary, _) = router.select(RequestClass::Extraction, &transcript);
        assert_eq!(primary.name(), "fast");
    }

    #[test]
    fn long_transcript_selects_deep_provider_regardless_of_complexity() {
        let transcript = "stable routine followup visit ".repeat(800); // 2400 words

        let (router, _, _) = router_with(
            Some(ScriptedProvider::always("fast", "ok")),
            Some(ScriptedProvider::always("deep", "ok")),
        );
        let (primary, _) = router.select(RequestClass::Extraction, &transcript);
        assert_eq!(primary.name(), "deep");
    }

    #[test]
    fn complex_transcript_selects_deep_provider() {
        let transcript = "Metastatic adenocarcinoma with malignant pleural involvement. \
            Oncologist recommends immunotherapy after chemotherapy and radiation; \
            biomarker and mutation panels pending. Cardiovascular and renal and \
            hepatic function reviewed before surgical resection and biopsy. \
            Current medications include atorvastatin, lisinopril, metformin, \
            omeprazole and warfarin.";

        let signals = analyze_content(transcript);
        assert!(signals.complexity > COMPLEXITY_THRESHOLD);

        let (router, _, _) = router_with(
            Some(ScriptedProvider::always("fast", "ok")),
            Some(ScriptedProvider::always("deep", "ok")),
        );
        let (primary, _) = router.select(RequestClass::Extraction, transcript);
        assert_eq!(primary.name(), "deep");
    }

    #[tokio::test]
    async fn selection_follows_content_not_prompt_boilerplate() {
        // A heavyweight prompt template around a plain transcript must not
        // push routing to the deep provider.
        let transcript = "Patient reports stable readings and no new complaints.";
        let prompt = format!(
            "Normalize medications like aspirin and Metoprolol. Consider \
             metastatic disease, chemotherapy, immunotherapy, radiation, \
             biomarker and mutation history, cardiovascular, renal, hepatic \
             and pulmonary findings, oncologist notes, surgical resection \
             and biopsy reports.\n\nTranscript:\n{transcript}"
        );
        assert!(analyze_content(&prompt).complexity > COMPLEXITY_THRESHOLD);

        let (router, _, _) = router_with(
            Some(ScriptedProvider::always("fast", "ok")),
            Some(ScriptedProvider::always("deep", "ok")),
        );
        let (_, completion) = router
            .route_parsed(RequestClass::Extraction, transcript, &prompt, None, |t| {
                Ok::<_, String>(t.to_string())
            })
            .await
            .unwrap();
        assert_eq!(completion.provider, "fast");
    }

    #[test]
    fn query_synthesis_defaults_to_fast_provider() {
        let (router, _, _) = router_with(
            Some(ScriptedProvider::always("fast", "ok")),
            Some(ScriptedProvider::always("deep", "ok")),
        );
        let (primary, _) = router.select(RequestClass::QuerySynthesis, "anything");
        assert_eq!(primary.name(), "fast");
    }

    #[tokio::test]
    async fn fallback_runs_once_and_reports_secondary_provider() {
        let (router, fast, deep) = router_with(
            Some(ScriptedProvider::failing("fast")),
            Some(ScriptedProvider::always("deep", "hello")),
        );

        let completion = router
            .route(RequestClass::QuestionAnswer, "hi", None)
            .await
            .unwrap();

        assert_eq!(completion.provider, "deep");
        assert_eq!(fast.unwrap().call_count(), 1);
        assert_eq!(deep.unwrap().call_count(), 1);
    }

    #[tokio::test]
    async fn unparsable_primary_response_triggers_fallback() {
        let (router, _, _) = router_with(
            Some(ScriptedProvider::always("fast", "not json at all")),
            Some(ScriptedProvider::always("deep", "{\"ok\":true}")),
        );

        let (value, completion) = router
            .route_parsed(RequestClass::QuestionAnswer, "hi", "hi", None, |text| {
                serde_json::from_str::<serde_json::Value>(text).map_err(|e| e.to_string())
            })
            .await
            .unwrap();

        assert_eq!(completion.provider, "deep");
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn both_failures_surface_as_router_failure_with_both_errors() {
        let (router, fast, deep) = router_with(
            Some(ScriptedProvider::failing("fast")),
            Some(ScriptedProvider::failing("deep")),
        );

        let err = router
            .route(RequestClass::QuestionAnswer, "hi", None)
            .await
            .unwrap_err();

        assert_eq!(err.attempts.len(), 2);
        assert_eq!(fast.unwrap().call_count(), 1);
        assert_eq!(deep.unwrap().call_count(), 1);
    }

    #[tokio::test]
    async fn single_provider_router_has_no_fallback() {
        let (router, fast, _) = router_with(Some(ScriptedProvider::failing("fast")), None);

        let err = router
            .route(RequestClass::QuestionAnswer, "hi", None)
            .await
            .unwrap_err();

        assert_eq!(err.attempts.len(), 1);
        assert_eq!(fast.unwrap().call_count(), 1);
    }

    #[test]
    fn router_requires_at_least_one_provider() {
        let result = SmartRouter::new(None, None, Duration::from_secs(5));
        assert!(matches!(result, Err(MatchError::NoProviders)));
    }
}
