pub mod config;
pub mod error;
pub mod extraction;
pub mod geo;
pub mod models;
pub mod provider;
pub mod qa;
pub mod ranking;
pub mod registry;
pub mod router;
pub mod synthesis;

pub use config::MatchConfig;
pub use error::{MatchError, ProviderError, RegistryError, Result, RouterFailure};
pub use models::{
    ConfidenceScores, ExtractionOutcome, PatientRecord, RankedTrial, Trial, TrialSearchResult,
};

use std::sync::Arc;
use tracing::info;

use extraction::ExtractionService;
use provider::{CompletionProvider, OpenRouterProvider};
use qa::TrialQaService;
use ranking::RankingEngine;
use registry::{RegistryClient, geocode::Geocoder};
use router::SmartRouter;
use synthesis::{QueryContext, QuerySynthesizer};

const DEFAULT_MAX_RESULTS: usize = 25;

const EXTRACTION_PREAMBLE: &str =
    "You are a medical AI assistant that extracts structured patient data from clinical transcripts. Always return valid JSON.";

/// Facade wiring the whole pipeline together: extraction, query synthesis,
/// registry search, eligibility ranking and trial Q&A behind the two
/// inbound operations (`extract`, `search`) plus the detail surfaces.
pub struct TrialMatcher {
    config: Arc<MatchConfig>,
    extractor: ExtractionService,
    synthesizer: QuerySynthesizer,
    registry: RegistryClient,
    geocoder: Geocoder,
    ranking: RankingEngine,
    qa: TrialQaService,
}

impl TrialMatcher {
    /// Build the pipeline from configuration. Fails only on the
    /// misconfiguration case: no usable provider.
    pub fn new(config: MatchConfig) -> Result<Self> {
        let config = Arc::new(config);

        let make_provider = |enabled: bool, name: &str, model: &str| {
            let key = config.openrouter_api_key.as_deref()?;
            enabled.then(|| {
                Arc::new(OpenRouterProvider::new(name, model, key, EXTRACTION_PREAMBLE))
                    as Arc<dyn CompletionProvider>
            })
        };

        let fast = make_provider(config.enable_fast_provider, "fast", &config.fast_model);
        let deep = make_provider(config.enable_deep_provider, "deep", &config.deep_model);
        let router = Arc::new(SmartRouter::new(fast, deep, config.provider_timeout)?);

        info!("trial matcher initialized");

        Ok(Self {
            extractor: ExtractionService::new(router.clone()),
            synthesizer: QuerySynthesizer::new(router.clone()),
            registry: RegistryClient::new(config.clone()),
            geocoder: Geocoder::new(config.geocode_timeout),
            ranking: RankingEngine::new(router.clone(), config.clone()),
            qa: TrialQaService::new(router),
            config,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(MatchConfig::from_env())
    }

    /// Inbound operation: transcript -> structured patient record with
    /// confidences. `success = false` outcomes carry a salvaged partial
    /// record for manual completion.
    pub async fn extract(&self, transcript: &str) -> Result<ExtractionOutcome> {
        self.extractor.extract(transcript).await
    }

    /// Inbound operation: patient record -> ranked, explainable trial
    /// list. Degrades (cached/empty registry results, neutral judgments,
    /// neutral geography) instead of failing wherever possible.
    pub async fn search(
        &self,
        patient: &PatientRecord,
        max_results: Option<usize>,
    ) -> TrialSearchResult {
        let Some(condition) = patient.search_condition() else {
            return TrialSearchResult::failed(
                "no primary diagnosis or condition available to search on",
            );
        };

        let context = QueryContext {
            age: patient.age,
            age_group: patient.age.map(age_group).map(str::to_string),
            cancer_stage: patient.cancer_stage.clone(),
            secondary_conditions: patient.conditions.iter().take(3).cloned().collect(),
            previous_treatments: patient.previous_treatments.iter().take(3).cloned().collect(),
        };
        let expression = self.synthesizer.synthesize(condition, &context).await;

        let patient_coords = self.resolve_patient_coords(patient).await;

        let max_results = max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        let search = self.registry.search(patient, &expression, max_results).await;
        let total_found = search.trials.len();

        let ranked = self
            .ranking
            .rank(patient, search.trials, patient_coords)
            .await;

        TrialSearchResult {
            success: true,
            trials: ranked,
            total_found,
            error_message: search.degraded,
        }
    }

    pub async fn trial_details(&self, nct_id: &str) -> Result<Option<Trial>> {
        Ok(self.registry.trial_details(nct_id).await?)
    }

    pub async fn answer_question(&self, question: &str, trial: &Trial) -> String {
        self.qa.answer(question, trial).await
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Coordinates for geographic scoring: pre-resolved ones on the record
    /// win; otherwise geocode city/state, degrading to `None` (neutral
    /// scoring) on any failure.
    async fn resolve_patient_coords(&self, patient: &PatientRecord) -> Option<(f64, f64)> {
        let location = patient.location.as_ref()?;
        if let (Some(lat), Some(lon)) = (location.latitude, location.longitude) {
            return Some((lat, lon));
        }
        let city = location.city.as_deref()?;
        let state = location.state.as_deref()?;
        self.geocoder.try_geocode(city, state).await
    }
}

fn age_group(age: u32) -> &'static str {
    match age {
        0..18 => "pediatric",
        18..25 => "young_adult",
        25..65 => "adult",
        _ => "elderly",
    }
}
