use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::{MatchError, Result};
use crate::models::{ConfidenceScores, ExtractionOutcome, PatientLocation, PatientRecord, Sex};
use crate::router::{RequestClass, SmartRouter};

const SCHEMA_HINT: &str = "Return only a single valid JSON object, with no surrounding text.";

/// Turns a sanitized transcript into a structured patient record plus
/// per-field confidence scores, via the smart router.
pub struct ExtractionService {
    router: Arc<SmartRouter>,
}

/// Raw shape of the model's JSON payload. Everything is optional and
/// loosely typed; validation happens when converting to `PatientRecord`,
/// and invalid values are dropped rather than failing the extraction.
#[derive(Debug, Default, Deserialize)]
struct ExtractionPayload {
    age: Option<serde_json::Value>,
    gender: Option<String>,
    primary_diagnosis: Option<String>,
    cancer_stage: Option<String>,
    #[serde(default)]
    tumor_markers: Option<HashMap<String, Option<String>>>,
    tumor_size: Option<String>,
    #[serde(default)]
    conditions: Vec<String>,
    #[serde(default)]
    comorbidities: Vec<String>,
    #[serde(default)]
    medications: Vec<String>,
    #[serde(default)]
    allergies: Vec<String>,
    location: Option<PayloadLocation>,
    overall_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PayloadLocation {
    city: Option<String>,
    state: Option<String>,
    zip_code: Option<String>,
}

impl ExtractionService {
    pub fn new(router: Arc<SmartRouter>) -> Self {
        Self { router }
    }

    pub async fn extract(&self, transcript: &str) -> Result<ExtractionOutcome> {
        if transcript.trim().is_empty() {
            return Err(MatchError::InvalidInput(
                "empty transcript provided".to_string(),
            ));
        }

        let started = Instant::now();
        let prompt = build_extraction_prompt(transcript);

        let routed = self
            .router
            .route_parsed(
                RequestClass::Extraction,
                transcript,
                &prompt,
                Some(SCHEMA_HINT),
                parse_extraction_payload,
            )
            .await;

        match routed {
            Ok((payload, completion)) => {
                let (patient, confidence) = convert_payload(payload);
                info!(
                    provider = %completion.provider,
                    overall = format!("{:.2}", confidence.overall),
                    "extraction succeeded"
                );
                Ok(ExtractionOutcome {
                    success: true,
                    patient,
                    confidence,
                    provider_used: completion.provider,
                    extraction_time_ms: started.elapsed().as_millis() as u64,
                    error_message: None,
                })
            }
            Err(failure) => {
                warn!(error = %failure, "extraction failed on all providers, salvaging");
                let (patient, confidence) = salvage_partial(transcript);
                Ok(ExtractionOutcome {
                    success: false,
                    patient,
                    confidence,
                    provider_used: "none".to_string(),
                    extraction_time_ms: started.elapsed().as_millis() as u64,
                    error_message: Some(format!(
                        "Automatic extraction failed ({failure}). Please review and complete the information manually."
                    )),
                })
            }
        }
    }
}

fn build_extraction_prompt(transcript: &str) -> String {
    format!(
        r#"You are extracting patient information for CLINICAL TRIAL MATCHING. Focus on the primary condition the patient wants to find clinical trials for.

Extract the following from this medical transcript and return it as JSON:
- age (integer)
- gender ("MALE", "FEMALE", or "ALL")
- primary_diagnosis (string - THE MAIN CONDITION needing clinical trials, or null if unclear)
- cancer_stage (string, e.g., "Stage IIA")
- tumor_markers (object, e.g., {{"ER": "positive", "HER2": "negative"}})
- tumor_size (string, e.g., "2.5 cm")
- conditions (array of strings - secondary conditions relevant for trials)
- comorbidities (array of strings - only comorbidities affecting trial eligibility)
- medications (array of strings - normalize drug names, e.g., "baby aspirin" -> "aspirin", drop dosing)
- allergies (array of strings)
- location (object with city, state, zip_code - expand state abbreviations, e.g., "CO" -> "Colorado")
- overall_confidence (number 0-1 for the overall extraction quality)

CRITICAL RULES for primary_diagnosis:
1. CONFIRMED DIAGNOSIS ONLY: use it only if explicitly stated or clearly documented
2. SUSPICIOUS/PENDING ("rule out", "biopsy pending") -> null
3. SYMPTOMS ONLY (fatigue, pain) -> null
4. BE CONSERVATIVE: when in doubt, null

NORMALIZATION EXAMPLES:
- "T1DM" -> "Type 1 diabetes mellitus"
- "NSCLC" -> "non-small cell lung cancer"
- "Metoprolol XL 50mg BID" -> "Metoprolol"

CONFIDENCE CALIBRATION:
- 0.9-1.0 complete explicit information with confirmed diagnosis
- 0.7-0.8 clear diagnosis with some abbreviations or inference
- 0.5-0.6 moderate quality, missing data
- 0.3-0.4 mostly symptoms, no clear diagnosis
- 0.1-0.2 very little reliable information

Transcript:
{transcript}

Return only valid JSON:"#
    )
}

/// Parse the model output into the raw payload. One repair pass: if the
/// whole response is not valid JSON, strip surrounding prose and code fences
/// down to the outermost braces and retry before giving up.
fn parse_extraction_payload(text: &str) -> std::result::Result<ExtractionPayload, String> {
    if let Ok(payload) = serde_json::from_str::<ExtractionPayload>(text) {
        return Ok(payload);
    }

    let start = text.find('{').ok_or("no JSON object in response")?;
    let end = text.rfind('}').ok_or("no closing brace in response")?;
    if end <= start {
        return Err("malformed JSON object bounds".to_string());
    }

    serde_json::from_str::<ExtractionPayload>(&text[start..=end])
        .map_err(|e| format!("failed to parse extracted JSON: {e}"))
}

/// Validate the raw payload into the typed record. Unknown or out-of-range
/// values become "not extracted" (confidence absent) instead of errors.
fn convert_payload(payload: ExtractionPayload) -> (PatientRecord, ConfidenceScores) {
    let age = payload
        .age
        .as_ref()
        .and_then(|v| v.as_u64())
        .filter(|a| (1..120u64).contains(a))
        .map(|a| a as u32);

    let sex = payload.gender.as_deref().and_then(parse_sex);

    let location = payload.location.and_then(|loc| {
        let loc = PatientLocation {
            city: non_empty(loc.city),
            state: non_empty(loc.state),
            zip_code: non_empty(loc.zip_code),
            latitude: None,
            longitude: None,
        };
        (loc.city.is_some() || loc.state.is_some() || loc.zip_code.is_some()).then_some(loc)
    });

    let tumor_markers = payload
        .tumor_markers
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect();

    let patient = PatientRecord {
        age,
        sex,
        primary_diagnosis: non_empty(payload.primary_diagnosis),
        cancer_stage: non_empty(payload.cancer_stage),
        tumor_markers,
        tumor_size: non_empty(payload.tumor_size),
        conditions: dedup(payload.conditions),
        comorbidities: dedup(payload.comorbidities),
        medications: dedup(payload.medications),
        allergies: dedup(payload.allergies),
        previous_treatments: Vec::new(),
        location,
        willing_to_travel: None,
        preferred_distance_miles: None,
    };

    let overall = payload
        .overall_confidence
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    let mut confidence = ConfidenceScores {
        primary_diagnosis: patient.primary_diagnosis.is_some().then_some(overall),
        age: patient.age.is_some().then_some(overall),
        cancer_stage: patient.cancer_stage.is_some().then_some(overall),
        conditions: (!patient.conditions.is_empty()).then_some(overall),
        medications: (!patient.medications.is_empty()).then_some(overall),
        location: patient.location.is_some().then_some(overall),
        overall: 0.0,
    };
    confidence.recompute_overall();

    (patient, confidence)
}

fn parse_sex(value: &str) -> Option<Sex> {
    match value.trim().to_uppercase().as_str() {
        "MALE" | "M" => Some(Sex::Male),
        "FEMALE" | "F" => Some(Sex::Female),
        "ALL" | "UNKNOWN" => Some(Sex::All),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.to_lowercase()))
        .collect()
}

/// Deterministic salvage used when both provider attempts failed: simple
/// patterns pull whatever demographics the transcript states plainly, so
/// the manual-completion form starts pre-filled.
fn salvage_partial(transcript: &str) -> (PatientRecord, ConfidenceScores) {
    let lower = transcript.to_lowercase();

    let age = salvage_age(&lower);
    let sex = salvage_sex(&lower);
    let location = salvage_location(transcript);

    let patient = PatientRecord {
        age,
        sex,
        location,
        ..Default::default()
    };

    let mut confidence = ConfidenceScores {
        age: patient.age.is_some().then_some(0.3),
        location: patient.location.is_some().then_some(0.3),
        ..Default::default()
    };
    confidence.recompute_overall();
    // Salvaged records never claim better than low overall confidence.
    confidence.overall = confidence.overall.min(0.2);

    (patient, confidence)
}

fn salvage_age(lower: &str) -> Option<u32> {
    let patterns = [
        r"\b(\d{1,2})\s*(?:year|yr)s?[\s-]*old\b",
        r"\bage\s*(?:is\s*)?(\d{1,2})\b",
        r"\b(\d{1,2})\s*(?:year|yr)s?\s*of\s*age\b",
    ];
    for pattern in patterns {
        let re = Regex::new(pattern).expect("static salvage pattern");
        if let Some(caps) = re.captures(lower) {
            if let Ok(age) = caps[1].parse::<u32>() {
                if (1..120).contains(&age) {
                    return Some(age);
                }
            }
        }
    }
    None
}

// Word-bounded so "this" never counts as "his" and "mother" never counts
// as "her". Female markers win when a transcript mentions both.
fn salvage_sex(lower: &str) -> Option<Sex> {
    let female =
        Regex::new(r"\b(she|her|hers)\b|\bmrs\.|\bms\.").expect("static salvage pattern");
    let male = Regex::new(r"\b(he|him|his)\b|\bmr\.").expect("static salvage pattern");
    if female.is_match(lower) {
        Some(Sex::Female)
    } else if male.is_match(lower) {
        Some(Sex::Male)
    } else {
        None
    }
}

fn salvage_location(transcript: &str) -> Option<PatientLocation> {
    // "City, ST" with a two-letter state code.
    let re = Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*),\s*([A-Z]{2})\b")
        .expect("static salvage pattern");
    re.captures(transcript).map(|caps| PatientLocation {
        city: Some(caps[1].to_string()),
        state: Some(caps[2].to_string()),
        zip_code: None,
        latitude: None,
        longitude: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;
    use std::time::Duration;

    const GOOD_PAYLOAD: &str = r#"{
        "age": 58,
        "gender": "FEMALE",
        "primary_diagnosis": "breast cancer",
        "cancer_stage": "Stage IIA",
        "tumor_markers": {"ER": "positive", "PR": null},
        "conditions": ["hypertension", "Hypertension"],
        "medications": ["aspirin"],
        "location": {"city": "Denver", "state": "Colorado"},
        "overall_confidence": 0.9
    }"#;

    fn service_with(fast: ScriptedProvider) -> ExtractionService {
        let router = SmartRouter::new(
            Some(Arc::new(fast)),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        ExtractionService::new(Arc::new(router))
    }

    #[tokio::test]
    async fn extracts_structured_record_from_json_payload() {
        let service = service_with(ScriptedProvider::always("fast", GOOD_PAYLOAD));
        let outcome = service
            .extract("58 year old woman with invasive ductal carcinoma")
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.provider_used, "fast");
        assert_eq!(outcome.patient.age, Some(58));
        assert_eq!(outcome.patient.sex, Some(Sex::Female));
        assert_eq!(
            outcome.patient.primary_diagnosis.as_deref(),
            Some("breast cancer")
        );
        // Null marker values are dropped, duplicates deduplicated.
        assert_eq!(outcome.patient.tumor_markers.len(), 1);
        assert_eq!(outcome.patient.conditions, vec!["hypertension"]);
        assert!((outcome.confidence.overall - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn repair_pass_strips_surrounding_prose() {
        let wrapped = format!("Here is the extraction you asked for:\n```json\n{GOOD_PAYLOAD}\n```\nLet me know if you need more.");
        let service = service_with(ScriptedProvider::always("fast", &wrapped));
        let outcome = service.extract("some transcript").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.patient.age, Some(58));
    }

    #[tokio::test]
    async fn invalid_field_values_are_dropped_not_fatal() {
        let payload = r#"{"age": 347, "gender": "ROBOT", "primary_diagnosis": "gout", "overall_confidence": 0.7}"#;
        let service = service_with(ScriptedProvider::always("fast", payload));
        let outcome = service.extract("some transcript").await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.patient.age, None);
        assert_eq!(outcome.patient.sex, None);
        assert_eq!(outcome.patient.primary_diagnosis.as_deref(), Some("gout"));
        assert!(outcome.confidence.age.is_none());
        // Only diagnosis present -> overall equals its confidence.
        assert!((outcome.confidence.overall - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn total_failure_salvages_partial_record() {
        let service = service_with(ScriptedProvider::failing("fast"));
        let outcome = service
            .extract("Patient is a 67 years old man from Boulder, CO with fatigue. He walks daily.")
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.provider_used, "none");
        assert!(outcome.error_message.is_some());
        assert_eq!(outcome.patient.age, Some(67));
        assert_eq!(outcome.patient.sex, Some(Sex::Male));
        let location = outcome.patient.location.unwrap();
        assert_eq!(location.city.as_deref(), Some("Boulder"));
        assert_eq!(location.state.as_deref(), Some("CO"));
        assert!(outcome.confidence.overall <= 0.2);
    }

    #[tokio::test]
    async fn pronoun_salvage_ignores_embedded_word_fragments() {
        // "This" and "another" must not read as "his" / "her".
        let service = service_with(ScriptedProvider::failing("fast"));
        let outcome = service
            .extract("This patient lives with another relative and reports fatigue.")
            .await
            .unwrap();
        assert_eq!(outcome.patient.sex, None);

        let outcome = service_with(ScriptedProvider::failing("fast"))
            .extract("Her mother had the same condition.")
            .await
            .unwrap();
        assert_eq!(outcome.patient.sex, Some(Sex::Female));
    }

    #[tokio::test]
    async fn provider_selection_follows_transcript_not_prompt() {
        // The extraction prompt template mentions medications and oncology
        // terms; a short simple transcript must still route fast-first.
        let fast = Arc::new(ScriptedProvider::always("fast", GOOD_PAYLOAD));
        let deep = Arc::new(ScriptedProvider::always("deep", GOOD_PAYLOAD));
        let router = SmartRouter::new(
            Some(fast.clone() as Arc<dyn crate::provider::CompletionProvider>),
            Some(deep.clone() as Arc<dyn crate::provider::CompletionProvider>),
            Duration::from_secs(5),
        )
        .unwrap();
        let service = ExtractionService::new(Arc::new(router));

        let outcome = service
            .extract("Patient doing well, stable readings, no complaints.")
            .await
            .unwrap();
        assert_eq!(outcome.provider_used, "fast");
        assert_eq!(deep.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_transcript_is_a_hard_input_error() {
        let service = service_with(ScriptedProvider::always("fast", GOOD_PAYLOAD));
        let err = service.extract("   \n ").await.unwrap_err();
        assert!(matches!(err, MatchError::InvalidInput(_)));
    }

    #[test]
    fn parse_rejects_text_with_no_object() {
        assert!(parse_extraction_payload("I could not comply.").is_err());
    }
}
