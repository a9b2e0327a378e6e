use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sex {
    Male,
    Female,
    /// Unknown or not restricted.
    All,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "MALE",
            Sex::Female => "FEMALE",
            Sex::All => "ALL",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientLocation {
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Structured patient record produced by the extraction service. Downstream
/// stages consume it read-only; it lives for a single pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientRecord {
    pub age: Option<u32>,
    pub sex: Option<Sex>,
    pub primary_diagnosis: Option<String>,
    pub cancer_stage: Option<String>,
    #[serde(default)]
    pub tumor_markers: HashMap<String, String>,
    pub tumor_size: Option<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub comorbidities: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub previous_treatments: Vec<String>,
    pub location: Option<PatientLocation>,
    pub willing_to_travel: Option<bool>,
    pub preferred_distance_miles: Option<u32>,
}

impl PatientRecord {
    /// The condition the registry search is built around: the primary
    /// diagnosis when present, otherwise the first listed condition.
    pub fn search_condition(&self) -> Option<&str> {
        self.primary_diagnosis
            .as_deref()
            .or_else(|| self.conditions.first().map(String::as_str))
    }
}

/// Per-field confidence in [0,1] for LLM-derived fields. A missing entry
/// means the field was not extracted (or was supplied by the user after
/// review and is exempt from scoring).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfidenceScores {
    pub primary_diagnosis: Option<f64>,
    pub age: Option<f64>,
    pub cancer_stage: Option<f64>,
    pub conditions: Option<f64>,
    pub medications: Option<f64>,
    pub location: Option<f64>,
    pub overall: f64,
}

// Fixed aggregation weights; renormalized over the fields actually present.
const CONFIDENCE_WEIGHTS: [f64; 6] = [0.30, 0.15, 0.15, 0.15, 0.15, 0.10];

impl ConfidenceScores {
    /// Recompute `overall` as the weighted mean of the present per-field
    /// scores, with weights renormalized so absent fields do not drag the
    /// aggregate toward zero.
    pub fn recompute_overall(&mut self) {
        let fields = [
            self.primary_diagnosis,
            self.age,
            self.cancer_stage,
            self.conditions,
            self.medications,
            self.location,
        ];

        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        for (score, weight) in fields.iter().zip(CONFIDENCE_WEIGHTS) {
            if let Some(score) = score {
                weighted += score.clamp(0.0, 1.0) * weight;
                weight_sum += weight;
            }
        }

        self.overall = if weight_sum > 0.0 {
            weighted / weight_sum
        } else {
            0.0
        };
    }

    pub fn uniform(score: f64) -> Self {
        let mut scores = Self {
            primary_diagnosis: Some(score),
            age: Some(score),
            cancer_stage: Some(score),
            conditions: Some(score),
            medications: Some(score),
            location: Some(score),
            overall: 0.0,
        };
        scores.recompute_overall();
        scores
    }
}

/// Result of one extraction run. `success = false` means both provider
/// attempts failed and the record only holds whatever could be salvaged; the
/// caller is expected to present a manual-completion form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub success: bool,
    pub patient: PatientRecord,
    pub confidence: ConfidenceScores,
    pub provider_used: String,
    pub extraction_time_ms: u64,
    pub error_message: Option<String>,
}
