use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialStatus {
    Recruiting,
    NotYetRecruiting,
    EnrollingByInvitation,
    ActiveNotRecruiting,
    Completed,
    Suspended,
    Terminated,
    Withdrawn,
    #[serde(other)]
    Unknown,
}

impl TrialStatus {
    /// Fixed mapping from enrollment status to a match-factor scalar.
    pub fn enrollment_score(&self) -> f64 {
        match self {
            TrialStatus::Recruiting => 1.0,
            TrialStatus::ActiveNotRecruiting => 0.7,
            TrialStatus::NotYetRecruiting => 0.5,
            _ => 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialPhase {
    EarlyPhase1,
    Phase1,
    Phase2,
    Phase3,
    Phase4,
    #[serde(other)]
    NotApplicable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrialLocation {
    pub facility: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EligibilityCriteria {
    pub age_min: Option<u32>,
    pub age_max: Option<u32>,
    pub sex: Option<String>,
    pub healthy_volunteers: Option<bool>,
    #[serde(default)]
    pub inclusion_criteria: Vec<String>,
    #[serde(default)]
    pub exclusion_criteria: Vec<String>,
}

/// One registry study, immutable once normalized from the registry response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub nct_id: String,
    pub title: String,
    pub status: TrialStatus,
    pub phase: Option<TrialPhase>,
    pub brief_summary: Option<String>,
    #[serde(default)]
    pub locations: Vec<TrialLocation>,
    pub contact_info: Option<ContactInfo>,
    pub eligibility_criteria: Option<EligibilityCriteria>,
    pub enrollment_target: Option<u32>,
    pub sponsor: Option<String>,
    pub study_type: Option<String>,
}

/// LLM verdict on one trial for one patient. Produced once per ranking run
/// and never cached across patients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityJudgment {
    pub nct_id: String,
    pub eligibility_score: f64,
    pub hard_exclude: bool,
    pub reasoning: String,
}

impl EligibilityJudgment {
    /// Stand-in used when a batch could not be judged: neutral score, no
    /// exclusion, so the trial still ranks rather than vanishing.
    pub fn neutral(nct_id: &str) -> Self {
        Self {
            nct_id: nct_id.to_string(),
            eligibility_score: 0.5,
            hard_exclude: false,
            reasoning: "Eligibility could not be analyzed".to_string(),
        }
    }
}

/// Deterministic per-factor breakdown backing the combined score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchFactors {
    pub condition_match: f64,
    pub eligibility_fit: f64,
    pub enrollment_status: f64,
    pub geographic_proximity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedTrial {
    pub trial: Trial,
    pub match_score: f64,
    pub match_factors: MatchFactors,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialSearchResult {
    pub success: bool,
    pub trials: Vec<RankedTrial>,
    pub total_found: usize,
    pub error_message: Option<String>,
}

impl TrialSearchResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            trials: Vec::new(),
            total_found: 0,
            error_message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_deserializes_from_registry_strings() {
        let status: TrialStatus = serde_json::from_str("\"RECRUITING\"").unwrap();
        assert_eq!(status, TrialStatus::Recruiting);

        let status: TrialStatus = serde_json::from_str("\"ACTIVE_NOT_RECRUITING\"").unwrap();
        assert_eq!(status, TrialStatus::ActiveNotRecruiting);

        // Unrecognized statuses fold into Unknown instead of failing the
        // whole response.
        let status: TrialStatus = serde_json::from_str("\"AVAILABLE\"").unwrap();
        assert_eq!(status, TrialStatus::Unknown);
    }

    #[test]
    fn enrollment_scores_follow_fixed_mapping() {
        assert_eq!(TrialStatus::Recruiting.enrollment_score(), 1.0);
        assert_eq!(TrialStatus::ActiveNotRecruiting.enrollment_score(), 0.7);
        assert_eq!(TrialStatus::NotYetRecruiting.enrollment_score(), 0.5);
        assert_eq!(TrialStatus::Completed.enrollment_score(), 0.3);
    }
}
