pub mod geocode;

use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::MatchConfig;
use crate::error::RegistryError;
use crate::models::{
    ContactInfo, EligibilityCriteria, PatientRecord, Sex, Trial, TrialLocation, TrialPhase,
    TrialStatus,
};

/// Age window widening applied to registry-side age filtering, so boundary
/// encoding differences never drop a trial the patient actually fits.
const AGE_FILTER_BUFFER: u32 = 2;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Registry search outcome. `degraded` carries an annotation when the result
/// came from the process cache or is empty because every attempt failed.
#[derive(Debug)]
pub struct RegistrySearch {
    pub trials: Vec<Trial>,
    pub degraded: Option<String>,
}

/// Client for the trial registry search API. Translates a patient record
/// plus synthesized condition expression into query parameters, retries
/// transport failures with capped exponential backoff, and normalizes the
/// response into `Trial` entities.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    config: Arc<MatchConfig>,
    cache: DashMap<String, Vec<Trial>>,
}

impl RegistryClient {
    pub fn new(config: Arc<MatchConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.registry_api_url.trim_end_matches('/').to_string(),
            config,
            cache: DashMap::new(),
        }
    }

    /// Search the registry. Never raises an unhandled fault: on retry
    /// exhaustion this serves the cached result set for an equivalent query
    /// if one exists, otherwise an empty list with an error annotation.
    pub async fn search(
        &self,
        patient: &PatientRecord,
        condition_expression: &str,
        max_results: usize,
    ) -> RegistrySearch {
        let params = build_search_params(patient, condition_expression, max_results);
        let cache_key = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        match self.fetch_studies(&params).await {
            Ok(trials) => {
                info!(count = trials.len(), "registry search returned trials");
                self.cache.insert(cache_key, trials.clone());
                RegistrySearch {
                    trials,
                    degraded: None,
                }
            }
            Err(err) => {
                warn!(error = %err, "registry search failed after retries");
                if let Some(cached) = self.cache.get(&cache_key) {
                    RegistrySearch {
                        trials: cached.clone(),
                        degraded: Some(format!(
                            "registry unavailable ({err}); serving cached results"
                        )),
                    }
                } else {
                    RegistrySearch {
                        trials: Vec::new(),
                        degraded: Some(format!("registry unavailable ({err})")),
                    }
                }
            }
        }
    }

    async fn fetch_studies(&self, params: &[(String, String)]) -> Result<Vec<Trial>, RegistryError> {
        let url = format!("{}/studies", self.base_url);
        let mut last_err: Option<RegistryError> = None;

        for attempt in 0..self.config.max_registry_retries {
            if attempt > 0 {
                let delay = BACKOFF_BASE
                    .saturating_mul(2u32.saturating_pow(attempt - 1))
                    .min(BACKOFF_CAP);
                tokio::time::sleep(delay).await;
            }

            let sent = self
                .http
                .get(&url)
                .query(params)
                .timeout(self.config.registry_timeout)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match sent {
                Ok(response) => {
                    let payload: StudiesResponse = response
                        .json()
                        .await
                        .map_err(|e| RegistryError::Malformed(e.to_string()))?;
                    let trials = payload
                        .studies
                        .into_iter()
                        .filter_map(convert_study)
                        .collect();
                    return Ok(trials);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "registry request failed");
                    last_err = Some(RegistryError::Transport(err));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| RegistryError::Malformed("no attempts made".to_string())))
    }

    /// Fetch one study by NCT id for the detail and Q&A surfaces.
    pub async fn trial_details(&self, nct_id: &str) -> Result<Option<Trial>, RegistryError> {
        let url = format!("{}/studies/{}", self.base_url, nct_id);
        let response = self
            .http
            .get(&url)
            .query(&[("format", "json")])
            .timeout(self.config.registry_timeout)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let study: StudyRecord = response
            .error_for_status()?
            .json()
            .await
            .map_err(|e| RegistryError::Malformed(e.to_string()))?;

        Ok(convert_study(study))
    }
}

/// Registry query parameters for one patient search. Status filtering keeps
/// only joinable trials; sex and healthy-volunteer constraints ride the
/// advanced filter; the age window is widened by a small buffer. Geography
/// is deliberately not filtered here, it only affects ranking.
fn build_search_params(
    patient: &PatientRecord,
    condition_expression: &str,
    max_results: usize,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("format".to_string(), "json".to_string()),
        ("pageSize".to_string(), max_results.to_string()),
        (
            "query.cond".to_string(),
            condition_expression.to_string(),
        ),
        (
            "filter.overallStatus".to_string(),
            "RECRUITING,NOT_YET_RECRUITING,ACTIVE_NOT_RECRUITING".to_string(),
        ),
        ("sort".to_string(), "@relevance".to_string()),
    ];

    let mut advanced: Vec<String> = Vec::new();

    if let Some(sex) = patient.sex {
        if matches!(sex, Sex::Male | Sex::Female) {
            advanced.push(format!(
                "(AREA[Gender]{} OR AREA[Gender]ALL)",
                sex.as_str()
            ));
        }
    }

    if patient.primary_diagnosis.is_some() || !patient.conditions.is_empty() {
        advanced.push("AREA[HealthyVolunteers]No".to_string());
    }

    if let Some(age) = patient.age {
        let widened_min = age + AGE_FILTER_BUFFER;
        let widened_max = age.saturating_sub(AGE_FILTER_BUFFER);
        advanced.push(format!(
            "AREA[MinimumAge]RANGE[MIN, {widened_min} years]"
        ));
        advanced.push(format!(
            "AREA[MaximumAge]RANGE[{widened_max} years, MAX]"
        ));
    }

    if !advanced.is_empty() {
        params.push(("filter.advanced".to_string(), advanced.join(" AND ")));
    }

    params
}

// ---- registry v2 response shape (only the fields we consume) ----

#[derive(Debug, Deserialize)]
struct StudiesResponse {
    #[serde(default)]
    studies: Vec<StudyRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudyRecord {
    protocol_section: Option<ProtocolSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolSection {
    identification_module: Option<IdentificationModule>,
    status_module: Option<StatusModule>,
    design_module: Option<DesignModule>,
    description_module: Option<DescriptionModule>,
    eligibility_module: Option<EligibilityModule>,
    contacts_locations_module: Option<ContactsLocationsModule>,
    sponsor_collaborators_module: Option<SponsorModule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentificationModule {
    nct_id: Option<String>,
    brief_title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusModule {
    overall_status: Option<TrialStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DesignModule {
    #[serde(default)]
    phases: Vec<TrialPhase>,
    study_type: Option<String>,
    enrollment_info: Option<EnrollmentInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrollmentInfo {
    count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptionModule {
    brief_summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EligibilityModule {
    minimum_age: Option<String>,
    maximum_age: Option<String>,
    #[serde(alias = "sex")]
    gender: Option<String>,
    healthy_volunteers: Option<serde_json::Value>,
    eligibility_criteria: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactsLocationsModule {
    #[serde(default)]
    central_contacts: Vec<CentralContact>,
    #[serde(default)]
    locations: Vec<LocationRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CentralContact {
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationRecord {
    facility: Option<String>,
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
    geo_point: Option<GeoPoint>,
}

#[derive(Debug, Deserialize)]
struct GeoPoint {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SponsorModule {
    lead_sponsor: Option<LeadSponsor>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeadSponsor {
    name: Option<String>,
}

/// Normalize one study record. Studies without an NCT id are dropped;
/// everything else degrades field-by-field rather than rejecting the study.
fn convert_study(study: StudyRecord) -> Option<Trial> {
    let protocol = study.protocol_section?;
    let identification = protocol.identification_module.unwrap_or_default();
    let nct_id = identification.nct_id.filter(|id| !id.is_empty())?;

    let status = protocol
        .status_module
        .and_then(|m| m.overall_status)
        .unwrap_or(TrialStatus::Unknown);

    let design = protocol.design_module.unwrap_or_default();
    let phase = design.phases.first().copied();

    let eligibility_criteria = protocol.eligibility_module.map(convert_eligibility);

    let contacts = protocol.contacts_locations_module.unwrap_or_default();
    let locations = contacts
        .locations
        .into_iter()
        .map(|loc| TrialLocation {
            facility: loc.facility,
            city: loc.city,
            state: loc.state,
            country: loc.country,
            latitude: loc.geo_point.as_ref().map(|p| p.lat),
            longitude: loc.geo_point.as_ref().map(|p| p.lon),
        })
        .collect();

    let contact_info = contacts.central_contacts.into_iter().next().map(|c| ContactInfo {
        name: c.name,
        phone: c.phone,
        email: c.email,
    });

    Some(Trial {
        nct_id,
        title: identification.brief_title.unwrap_or_default(),
        status,
        phase,
        brief_summary: protocol.description_module.and_then(|m| m.brief_summary),
        locations,
        contact_info,
        eligibility_criteria,
        enrollment_target: design.enrollment_info.and_then(|e| e.count),
        sponsor: protocol
            .sponsor_collaborators_module
            .and_then(|m| m.lead_sponsor)
            .and_then(|s| s.name),
        study_type: design.study_type,
    })
}

fn convert_eligibility(module: EligibilityModule) -> EligibilityCriteria {
    let (inclusion, exclusion) = module
        .eligibility_criteria
        .as_deref()
        .map(split_criteria_text)
        .unwrap_or_default();

    EligibilityCriteria {
        age_min: module.minimum_age.as_deref().and_then(parse_age),
        age_max: module.maximum_age.as_deref().and_then(parse_age),
        sex: module.gender,
        healthy_volunteers: module.healthy_volunteers.and_then(|v| match v {
            serde_json::Value::Bool(b) => Some(b),
            serde_json::Value::String(s) => Some(s.eq_ignore_ascii_case("yes")),
            _ => None,
        }),
        inclusion_criteria: inclusion,
        exclusion_criteria: exclusion,
    }
}

/// Parse registry age strings like "18 Years" or "6 Months". Month-valued
/// bounds round down to whole years.
fn parse_age(value: &str) -> Option<u32> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("n/a") {
        return None;
    }
    let mut parts = value.split_whitespace();
    let number = parts.next()?.parse::<u32>().ok()?;
    let unit = parts.next().unwrap_or("years").to_lowercase();
    if unit.starts_with("month") {
        Some(number / 12)
    } else {
        Some(number)
    }
}

/// Split free-text criteria into inclusion/exclusion lists on the standard
/// section headers.
fn split_criteria_text(text: &str) -> (Vec<String>, Vec<String>) {
    let (inclusion_text, exclusion_text) = match text.split_once("Exclusion Criteria:") {
        Some((head, tail)) => (head.replace("Inclusion Criteria:", ""), tail.to_string()),
        None => (text.replace("Inclusion Criteria:", ""), String::new()),
    };

    let to_items = |block: &str| {
        block
            .lines()
            .map(|line| line.trim().trim_start_matches(['*', '-']).trim().to_string())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
    };

    (to_items(&inclusion_text), to_items(&exclusion_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUDY_JSON: &str = r#"{
        "protocolSection": {
            "identificationModule": {"nctId": "NCT01234567", "briefTitle": "A Study of Things"},
            "statusModule": {"overallStatus": "RECRUITING"},
            "designModule": {
                "phases": ["PHASE2"],
                "studyType": "INTERVENTIONAL",
                "enrollmentInfo": {"count": 120}
            },
            "descriptionModule": {"briefSummary": "Tests a thing."},
            "eligibilityModule": {
                "minimumAge": "18 Years",
                "maximumAge": "75 Years",
                "sex": "ALL",
                "healthyVolunteers": false,
                "eligibilityCriteria": "Inclusion Criteria:\n* Confirmed diagnosis\n\nExclusion Criteria:\n* Pregnancy\n* Prior transplant"
            },
            "contactsLocationsModule": {
                "centralContacts": [{"name": "Study Desk", "phone": "555-0100"}],
                "locations": [
                    {"facility": "General Hospital", "city": "Denver", "state": "Colorado",
                     "country": "United States", "geoPoint": {"lat": 39.7392, "lon": -104.9903}}
                ]
            },
            "sponsorCollaboratorsModule": {"leadSponsor": {"name": "Acme Research"}}
        }
    }"#;

    #[test]
    fn study_record_normalizes_into_trial() {
        let study: StudyRecord = serde_json::from_str(STUDY_JSON).unwrap();
        let trial = convert_study(study).unwrap();

        assert_eq!(trial.nct_id, "NCT01234567");
        assert_eq!(trial.status, TrialStatus::Recruiting);
        assert_eq!(trial.phase, Some(TrialPhase::Phase2));
        assert_eq!(trial.enrollment_target, Some(120));
        assert_eq!(trial.sponsor.as_deref(), Some("Acme Research"));

        let criteria = trial.eligibility_criteria.unwrap();
        assert_eq!(criteria.age_min, Some(18));
        assert_eq!(criteria.age_max, Some(75));
        assert_eq!(criteria.healthy_volunteers, Some(false));
        assert_eq!(criteria.inclusion_criteria, vec!["Confirmed diagnosis"]);
        assert_eq!(
            criteria.exclusion_criteria,
            vec!["Pregnancy", "Prior transplant"]
        );

        let site = &trial.locations[0];
        assert_eq!(site.latitude, Some(39.7392));
    }

    #[test]
    fn studies_without_nct_id_are_dropped() {
        let study: StudyRecord =
            serde_json::from_str(r#"{"protocolSection": {"statusModule": {}}}"#).unwrap();
        assert!(convert_study(study).is_none());
    }

    #[test]
    fn age_strings_parse_leniently() {
        assert_eq!(parse_age("18 Years"), Some(18));
        assert_eq!(parse_age("6 Months"), Some(0));
        assert_eq!(parse_age("N/A"), None);
        assert_eq!(parse_age(""), None);
        assert_eq!(parse_age("75"), Some(75));
    }

    #[test]
    fn search_params_carry_status_sex_and_widened_age_filters() {
        let patient = PatientRecord {
            age: Some(60),
            sex: Some(Sex::Female),
            primary_diagnosis: Some("breast cancer".to_string()),
            ..Default::default()
        };
        let params = build_search_params(&patient, "EXPANSION[Concept]breast cancer", 25);

        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .unwrap_or_default()
        };

        assert_eq!(get("query.cond"), "EXPANSION[Concept]breast cancer");
        assert_eq!(
            get("filter.overallStatus"),
            "RECRUITING,NOT_YET_RECRUITING,ACTIVE_NOT_RECRUITING"
        );
        let advanced = get("filter.advanced");
        assert!(advanced.contains("(AREA[Gender]FEMALE OR AREA[Gender]ALL)"));
        assert!(advanced.contains("AREA[HealthyVolunteers]No"));
        // 60 +/- 2 year widening.
        assert!(advanced.contains("AREA[MinimumAge]RANGE[MIN, 62 years]"));
        assert!(advanced.contains("AREA[MaximumAge]RANGE[58 years, MAX]"));
    }

    #[test]
    fn search_params_omit_advanced_filter_when_nothing_applies() {
        let patient = PatientRecord::default();
        let params = build_search_params(&patient, "EXPANSION[Concept]gout", 10);
        assert!(!params.iter().any(|(k, _)| k == "filter.advanced"));
    }
}
