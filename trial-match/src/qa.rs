use std::sync::Arc;
use tracing::warn;

use crate::models::Trial;
use crate::router::{RequestClass, SmartRouter};

/// Answers free-text questions about a single trial. Router failures
/// degrade to an apologetic message rather than an error; Q&A is a
/// convenience surface, never a pipeline fault.
pub struct TrialQaService {
    router: Arc<SmartRouter>,
}

impl TrialQaService {
    pub fn new(router: Arc<SmartRouter>) -> Self {
        Self { router }
    }

    pub async fn answer(&self, question: &str, trial: &Trial) -> String {
        let context = trial_context(trial);
        let prompt = format!(
            "You are a medical AI assistant helping clinicians understand clinical trials. \
             Answer accurately based only on the trial information provided.\n\n\
             TRIAL INFORMATION:\n{context}\n\nQuestion: {question}"
        );

        match self
            .router
            .route(RequestClass::QuestionAnswer, &prompt, None)
            .await
        {
            Ok(completion) => completion.text,
            Err(failure) => {
                warn!(nct_id = %trial.nct_id, error = %failure, "trial Q&A failed");
                format!(
                    "I apologize, but I could not process your question right now ({failure})."
                )
            }
        }
    }
}

fn trial_context(trial: &Trial) -> String {
    let mut parts = vec![
        format!("NCT ID: {}", trial.nct_id),
        format!("Title: {}", trial.title),
        format!("Status: {:?}", trial.status),
    ];

    if let Some(phase) = trial.phase {
        parts.push(format!("Phase: {phase:?}"));
    }
    if let Some(summary) = &trial.brief_summary {
        parts.push(format!("Summary: {summary}"));
    }
    if let Some(sponsor) = &trial.sponsor {
        parts.push(format!("Sponsor: {sponsor}"));
    }
    if let Some(criteria) = &trial.eligibility_criteria {
        if !criteria.inclusion_criteria.is_empty() {
            parts.push(format!(
                "Inclusion Criteria:\n{}",
                criteria.inclusion_criteria.join("\n")
            ));
        }
        if !criteria.exclusion_criteria.is_empty() {
            parts.push(format!(
                "Exclusion Criteria:\n{}",
                criteria.exclusion_criteria.join("\n")
            ));
        }
    }
    if !trial.locations.is_empty() {
        let sites: Vec<String> = trial
            .locations
            .iter()
            .take(10)
            .map(|loc| {
                [
                    loc.facility.as_deref(),
                    loc.city.as_deref(),
                    loc.state.as_deref(),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(", ")
            })
            .collect();
        parts.push(format!("Locations:\n{}", sites.join("\n")));
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrialStatus;
    use crate::provider::testing::ScriptedProvider;
    use std::time::Duration;

    fn sample_trial() -> Trial {
        Trial {
            nct_id: "NCT00000001".to_string(),
            title: "A Trial".to_string(),
            status: TrialStatus::Recruiting,
            phase: None,
            brief_summary: Some("Summary text".to_string()),
            locations: Vec::new(),
            contact_info: None,
            eligibility_criteria: None,
            enrollment_target: None,
            sponsor: None,
            study_type: None,
        }
    }

    #[tokio::test]
    async fn answers_pass_through_from_provider() {
        let router = SmartRouter::new(
            Some(Arc::new(ScriptedProvider::always(
                "fast",
                "The trial is recruiting.",
            ))),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let qa = TrialQaService::new(Arc::new(router));

        let answer = qa.answer("Is it recruiting?", &sample_trial()).await;
        assert_eq!(answer, "The trial is recruiting.");
    }

    #[tokio::test]
    async fn router_failure_degrades_to_apology() {
        let router = SmartRouter::new(
            Some(Arc::new(ScriptedProvider::failing("fast"))),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let qa = TrialQaService::new(Arc::new(router));

        let answer = qa.answer("Is it recruiting?", &sample_trial()).await;
        assert!(answer.starts_with("I apologize"));
    }
}
