use dashmap::DashMap;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::MatchConfig;
use crate::geo::{NEUTRAL_GEO_SCORE, haversine_miles, proximity_score};
use crate::models::{
    EligibilityJudgment, MatchFactors, PatientRecord, RankedTrial, Sex, Trial,
};
use crate::router::{RequestClass, SmartRouter};

const JUDGMENT_SCHEMA_HINT: &str =
    "Return only a JSON array with exactly one object per trial, nothing else.";

/// Combines LLM-judged clinical fit with deterministic geographic scoring
/// into a reproducible, explainable ranking. Per request the trial list
/// moves through Collected -> Batched -> Judged -> Scored -> Filtered ->
/// Ranked; only the Judged step talks to providers.
pub struct RankingEngine {
    router: Arc<SmartRouter>,
    config: Arc<MatchConfig>,
}

/// Per-trial object the batch judgment prompt asks for.
#[derive(Debug, Deserialize)]
struct JudgmentPayload {
    nct_id: Option<String>,
    eligibility_score: Option<f64>,
    hard_exclude: Option<bool>,
    reasoning: Option<String>,
}

impl RankingEngine {
    pub fn new(router: Arc<SmartRouter>, config: Arc<MatchConfig>) -> Self {
        Self { router, config }
    }

    /// Rank collected trials for one patient. Never fails: judgment
    /// problems degrade to neutral scores per batch, and geography degrades
    /// to neutral when coordinates are missing.
    pub async fn rank(
        &self,
        patient: &PatientRecord,
        trials: Vec<Trial>,
        patient_coords: Option<(f64, f64)>,
    ) -> Vec<RankedTrial> {
        if trials.is_empty() {
            return Vec::new();
        }

        // Judged: batches dispatched concurrently up to the configured cap,
        // under the overall request deadline. Completed batches land in the
        // map as they finish so a deadline hit keeps partial progress;
        // missing entries become neutral judgments below.
        let judgments: DashMap<String, EligibilityJudgment> = DashMap::new();
        let patient_summary = build_patient_summary(patient);

        let batch_futures: Vec<_> = trials
            .chunks(self.config.eligibility_batch_size)
            .map(|batch| self.judge_batch(&patient_summary, batch, &judgments))
            .collect();
        let judging = futures::stream::iter(batch_futures)
            .buffer_unordered(self.config.eligibility_concurrency)
            .collect::<Vec<_>>();

        if tokio::time::timeout(self.config.request_deadline, judging)
            .await
            .is_err()
        {
            warn!(
                judged = judgments.len(),
                total = trials.len(),
                "request deadline hit during eligibility judging; remaining trials get neutral judgments"
            );
        }

        // Scored / Filtered / Ranked. Two filter rules only: hard exclusion,
        // then the combined-score threshold.
        let threshold = self.config.acceptance_threshold;
        let mut ranked: Vec<RankedTrial> = trials
            .into_iter()
            .map(|trial| {
                let judgment = judgments
                    .get(&trial.nct_id)
                    .map(|j| j.value().clone())
                    .unwrap_or_else(|| EligibilityJudgment::neutral(&trial.nct_id));
                self.score_trial(patient, trial, judgment, patient_coords)
            })
            .filter(|(_, hard_exclude)| !hard_exclude)
            .map(|(scored, _)| scored)
            .filter(|scored| scored.match_score >= threshold)
            .collect();

        ranked.sort_by(|a, b| {
            b.match_score
                .total_cmp(&a.match_score)
                .then_with(|| a.trial.nct_id.cmp(&b.trial.nct_id))
        });

        info!(count = ranked.len(), "ranking complete");
        ranked
    }

    async fn judge_batch(
        &self,
        patient_summary: &str,
        batch: &[Trial],
        judgments: &DashMap<String, EligibilityJudgment>,
    ) {
        let prompt = build_batch_prompt(patient_summary, batch);
        let expected: Vec<&str> = batch.iter().map(|t| t.nct_id.as_str()).collect();

        let routed = self
            .router
            .route_parsed(
                RequestClass::EligibilityJudgment,
                patient_summary,
                &prompt,
                Some(JUDGMENT_SCHEMA_HINT),
                parse_batch_response,
            )
            .await;

        let batch_judgments = match routed {
            Ok((payloads, completion)) => {
                info!(
                    provider = %completion.provider,
                    trials = batch.len(),
                    "eligibility batch judged"
                );
                align_judgments(payloads, &expected)
            }
            Err(failure) => {
                warn!(error = %failure, trials = batch.len(), "eligibility batch failed, using neutral judgments");
                expected
                    .iter()
                    .map(|id| EligibilityJudgment::neutral(id))
                    .collect()
            }
        };

        for judgment in batch_judgments {
            judgments.insert(judgment.nct_id.clone(), judgment);
        }
    }

    /// Score one trial; the flag reports whether it is hard-excluded (by
    /// the judgment or the deterministic overlay) and must not be ranked.
    fn score_trial(
        &self,
        patient: &PatientRecord,
        trial: Trial,
        mut judgment: EligibilityJudgment,
        patient_coords: Option<(f64, f64)>,
    ) -> (RankedTrial, bool) {
        // Deterministic hard-exclusion overlay: unambiguous bounds are not
        // left to the model's judgment.
        if let Some(reason) = deterministic_exclusion(patient, &trial) {
            judgment.hard_exclude = true;
            judgment.reasoning = reason;
        }

        let (geo_score, distance) = geographic_score(&trial, patient_coords);

        let condition_match = judgment.eligibility_score.clamp(0.0, 1.0);
        let eligibility_fit = if judgment.hard_exclude {
            0.0
        } else {
            condition_match
        };

        let factors = MatchFactors {
            condition_match,
            eligibility_fit,
            enrollment_status: trial.status.enrollment_score(),
            geographic_proximity: geo_score,
        };

        let match_score = factors.eligibility_fit * self.config.eligibility_weight
            + factors.geographic_proximity * self.config.geo_weight;

        let reasoning = match distance {
            Some(miles) => format!(
                "{} Nearest site is about {} miles away.",
                judgment.reasoning,
                miles.round() as u64
            ),
            None => judgment.reasoning,
        };

        (
            RankedTrial {
                trial,
                match_score,
                match_factors: factors,
                reasoning,
            },
            judgment.hard_exclude,
        )
    }
}

/// Geographic score plus the distance it was derived from. Missing
/// coordinates on either side yield the neutral score with no distance.
fn geographic_score(trial: &Trial, patient_coords: Option<(f64, f64)>) -> (f64, Option<f64>) {
    let Some((plat, plon)) = patient_coords else {
        return (NEUTRAL_GEO_SCORE, None);
    };

    let nearest = trial
        .locations
        .iter()
        .filter_map(|loc| Some((loc.latitude?, loc.longitude?)))
        .map(|(lat, lon)| haversine_miles(plat, plon, lat, lon))
        .min_by(f64::total_cmp);

    match nearest {
        Some(distance) => (proximity_score(distance), Some(distance)),
        None => (NEUTRAL_GEO_SCORE, None),
    }
}

/// Unambiguous exclusions the engine applies itself: age outside hard
/// bounds, or a single-sex trial for the other sex.
fn deterministic_exclusion(patient: &PatientRecord, trial: &Trial) -> Option<String> {
    let criteria = trial.eligibility_criteria.as_ref()?;

    if let Some(age) = patient.age {
        if let Some(min) = criteria.age_min {
            if age < min {
                return Some(format!(
                    "Patient age {age} is below the trial minimum of {min}."
                ));
            }
        }
        if let Some(max) = criteria.age_max {
            if age > max {
                return Some(format!(
                    "Patient age {age} is above the trial maximum of {max}."
                ));
            }
        }
    }

    if let (Some(patient_sex), Some(trial_sex)) = (patient.sex, criteria.sex.as_deref()) {
        let trial_sex = trial_sex.to_uppercase();
        if trial_sex != "ALL" && matches!(patient_sex, Sex::Male | Sex::Female) {
            if trial_sex != patient_sex.as_str() {
                return Some(format!(
                    "Trial is restricted to {trial_sex} participants."
                ));
            }
        }
    }

    None
}

fn build_patient_summary(patient: &PatientRecord) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(age) = patient.age {
        parts.push(format!("Age: {age} years old"));
    }
    if let Some(sex) = patient.sex {
        parts.push(format!("Sex: {}", sex.as_str()));
    }
    if let Some(diagnosis) = &patient.primary_diagnosis {
        parts.push(format!("Primary Diagnosis: {diagnosis}"));
    }
    if let Some(stage) = &patient.cancer_stage {
        parts.push(format!("Cancer Stage: {stage}"));
    }
    if !patient.tumor_markers.is_empty() {
        let mut markers: Vec<String> = patient
            .tumor_markers
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        markers.sort();
        parts.push(format!("Tumor Markers: {}", markers.join(", ")));
    }
    if !patient.comorbidities.is_empty() {
        parts.push(format!("Comorbidities: {}", patient.comorbidities.join(", ")));
    }
    if !patient.medications.is_empty() {
        parts.push(format!(
            "Current Medications: {}",
            patient.medications.join(", ")
        ));
    }
    if !patient.allergies.is_empty() {
        parts.push(format!("Allergies: {}", patient.allergies.join(", ")));
    }

    if parts.is_empty() {
        "No structured patient details available".to_string()
    } else {
        parts.join("; ")
    }
}

fn build_batch_prompt(patient_summary: &str, batch: &[Trial]) -> String {
    let trials_text = batch
        .iter()
        .enumerate()
        .map(|(i, trial)| {
            format!(
                "TRIAL {}:\nNCT ID: {}\nTitle: {}\nEligibility Criteria:\n{}\n",
                i + 1,
                trial.nct_id,
                trial.title,
                eligibility_text(trial)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a clinical trial eligibility expert. Analyze whether this patient is eligible for each of the following clinical trials.

PATIENT PROFILE:
{patient_summary}

{trials_text}

Provide your analysis as a JSON array with one object per trial, in the same order:
[
  {{
    "nct_id": "NCT...",
    "eligibility_score": 0.0-1.0,
    "hard_exclude": true/false,
    "reasoning": "one sentence explaining the decision"
  }}
]

GUIDELINES:
1. hard_exclude: true only for clear, definitive exclusions (age out of range, wrong sex, wrong disease subtype, contraindicated medications)
2. eligibility_score: 1.0 perfect match; 0.8-0.9 likely eligible; 0.6-0.7 possibly eligible; 0.4-0.5 questionable; below 0.3 poor match
3. A patient inside the stated age range is NOT excluded by age
4. Focus on definitive criteria rather than minor concerns"#
    )
}

fn eligibility_text(trial: &Trial) -> String {
    let Some(criteria) = &trial.eligibility_criteria else {
        return "No detailed eligibility criteria available".to_string();
    };

    let mut parts: Vec<String> = Vec::new();
    if criteria.age_min.is_some() || criteria.age_max.is_some() {
        parts.push(format!(
            "Age: {} to {}",
            criteria
                .age_min
                .map_or("no minimum".to_string(), |a| a.to_string()),
            criteria
                .age_max
                .map_or("no maximum".to_string(), |a| a.to_string())
        ));
    }
    if let Some(sex) = &criteria.sex {
        parts.push(format!("Sex: {sex}"));
    }
    if !criteria.inclusion_criteria.is_empty() {
        parts.push(format!(
            "Inclusion:\n{}",
            criteria.inclusion_criteria.join("\n")
        ));
    }
    if !criteria.exclusion_criteria.is_empty() {
        parts.push(format!(
            "Exclusion:\n{}",
            criteria.exclusion_criteria.join("\n")
        ));
    }

    if parts.is_empty() {
        "No detailed eligibility criteria available".to_string()
    } else {
        parts.join("\n")
    }
}

fn parse_batch_response(text: &str) -> Result<Vec<JudgmentPayload>, String> {
    let start = text.find('[').ok_or("no JSON array in response")?;
    let end = text.rfind(']').ok_or("no closing bracket in response")?;
    if end <= start {
        return Err("malformed JSON array bounds".to_string());
    }
    serde_json::from_str::<Vec<JudgmentPayload>>(&text[start..=end])
        .map_err(|e| format!("failed to parse judgment array: {e}"))
}

/// Align model payloads to the batch's trials: match by NCT id when the
/// model echoed one, fall back to positional order, pad the rest neutral.
fn align_judgments(payloads: Vec<JudgmentPayload>, expected: &[&str]) -> Vec<EligibilityJudgment> {
    let mut by_id: HashMap<String, JudgmentPayload> = HashMap::new();
    let mut positional: Vec<JudgmentPayload> = Vec::new();
    for payload in payloads {
        match &payload.nct_id {
            Some(id) if expected.contains(&id.as_str()) => {
                by_id.insert(id.clone(), payload);
            }
            _ => positional.push(payload),
        }
    }

    let mut leftovers = positional.into_iter();
    expected
        .iter()
        .map(|id| {
            let payload = by_id.remove(*id).or_else(|| leftovers.next());
            match payload {
                Some(p) => EligibilityJudgment {
                    nct_id: id.to_string(),
                    eligibility_score: p.eligibility_score.unwrap_or(0.5).clamp(0.0, 1.0),
                    hard_exclude: p.hard_exclude.unwrap_or(false),
                    reasoning: p
                        .reasoning
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or_else(|| "No reasoning provided".to_string()),
                },
                None => EligibilityJudgment::neutral(id),
            }
        })
        .collect()
}
