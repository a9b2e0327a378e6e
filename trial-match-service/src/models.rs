use serde::{Deserialize, Serialize};
use trial_match::models::{ConfidenceScores, PatientRecord, RankedTrial};

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub transcript: String,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub success: bool,
    pub patient_data: Option<PatientRecord>,
    pub confidence_scores: Option<ConfidenceScores>,
    pub provider_used: Option<String>,
    pub extraction_time_ms: u64,
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub patient_data: PatientRecord,
    pub max_results: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub trials: Vec<RankedTrial>,
    pub total_found: usize,
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QaRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct QaResponse {
    pub nct_id: String,
    pub answer: String,
}
