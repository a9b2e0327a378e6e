use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use trial_match::{MatchError, TrialMatcher};
use uuid::Uuid;

use crate::models::{
    ExtractRequest, ExtractResponse, QaRequest, QaResponse, SearchRequest, SearchResponse,
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "nct_id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub matcher: Arc<TrialMatcher>,
}

pub fn create_app(matcher: Arc<TrialMatcher>) -> Router {
    build_router(AppState { matcher })
}

fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/extract", post(extract_patient))
        .route("/search", post(search_trials))
        .route("/trials/{nct_id}", get(get_trial_details))
        .route("/trials/{nct_id}/qa", post(trial_qa))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Clinical Trial Matching Service",
        "version": "1.0.0",
        "description": "Matches patients from medical transcripts to eligible clinical trials",
        "endpoints": {
            "POST /extract": "Extract structured patient data from a transcript",
            "POST /search": "Search and rank clinical trials for a patient",
            "GET /trials/{nct_id}": "Get trial details",
            "POST /trials/{nct_id}/qa": "Ask a question about a trial",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn extract_patient(
    State(state): State<AppState>,
    Json(request): Json<ExtractRequest>,
) -> ApiResult<ExtractResponse> {
    let request_id = Uuid::new_v4();
    info!(%request_id, "starting patient extraction");

    match state.matcher.extract(&request.transcript).await {
        Ok(outcome) => {
            info!(
                %request_id,
                success = outcome.success,
                provider = %outcome.provider_used,
                "extraction finished"
            );
            Ok(Json(ExtractResponse {
                success: outcome.success,
                patient_data: Some(outcome.patient),
                confidence_scores: Some(outcome.confidence),
                provider_used: Some(outcome.provider_used),
                extraction_time_ms: outcome.extraction_time_ms,
                error_message: outcome.error_message,
            }))
        }
        Err(MatchError::InvalidInput(message)) => Err(bad_request_error(&message)),
        Err(err) => {
            error!(%request_id, error = %err, "extraction failed");
            Err(internal_error("Extraction failed", &err.to_string()))
        }
    }
}

async fn search_trials(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    let request_id = Uuid::new_v4();
    info!(
        %request_id,
        diagnosis = request.patient_data.primary_diagnosis.as_deref().unwrap_or("none"),
        "starting trial search"
    );

    let result = state
        .matcher
        .search(&request.patient_data, request.max_results)
        .await;

    info!(
        %request_id,
        found = result.total_found,
        ranked = result.trials.len(),
        "trial search finished"
    );

    Ok(Json(SearchResponse {
        success: result.success,
        trials: result.trials,
        total_found: result.total_found,
        error_message: result.error_message,
    }))
}

async fn get_trial_details(
    State(state): State<AppState>,
    Path(nct_id): Path<String>,
) -> ApiResult<Value> {
    match state.matcher.trial_details(&nct_id).await {
        Ok(Some(trial)) => Ok(Json(json!({ "trial": trial }))),
        Ok(None) => Err(not_found_error("Trial not found", &nct_id)),
        Err(err) => {
            error!(%nct_id, error = %err, "trial details lookup failed");
            Err(internal_error("Failed to fetch trial details", &err.to_string()))
        }
    }
}

async fn trial_qa(
    State(state): State<AppState>,
    Path(nct_id): Path<String>,
    Json(request): Json<QaRequest>,
) -> ApiResult<QaResponse> {
    if request.question.trim().is_empty() {
        return Err(bad_request_error("Question is required"));
    }

    let trial = match state.matcher.trial_details(&nct_id).await {
        Ok(Some(trial)) => trial,
        Ok(None) => return Err(not_found_error("Trial not found", &nct_id)),
        Err(err) => {
            error!(%nct_id, error = %err, "trial lookup for Q&A failed");
            return Err(internal_error("Failed to fetch trial", &err.to_string()));
        }
    };

    let answer = state.matcher.answer_question(&request.question, &trial).await;
    Ok(Json(QaResponse { nct_id, answer }))
}
