//! HTTP surface: verification, spam feedback, list administration and
//! score-weight administration.

use crate::lists::{ConflictPolicy, ListError, ListKind};
use crate::reputation::{DomainPenalty, ReputationError, ReputationRecord};
use crate::scoring::{ScoreWeights, WeightOverrides, WeightsError, ACCEPT_THRESHOLD};
use crate::verifier::{VerificationResult, Verifier, VerifyError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub struct AppState {
    pub verifier: Verifier,
    /// Where `POST /scores` writes the override table.
    pub overrides_path: PathBuf,
}

pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/verify", post(verify_handler))
        .route("/filter-email", post(verify_handler))
        .route("/feedback/spam", post(report_spam_handler))
        .route("/lists", get(all_lists_handler))
        .route(
            "/lists/:name",
            get(list_handler).post(add_handler).delete(clear_handler),
        )
        .route("/lists/:name/:domain", delete(remove_handler))
        .route("/scores", get(scores_handler).post(update_scores_handler))
        .route("/domains/checked", get(checked_domains_handler))
        .route("/domains/penalties", get(penalties_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Internal(msg) => {
                log::error!("Request failed: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ListError> for ApiError {
    fn from(err: ListError) -> Self {
        match err {
            ListError::UnknownList(_) | ListError::NotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            ListError::InvalidDomain(_)
            | ListError::AlreadyPresent { .. }
            | ListError::Conflict { .. } => ApiError::BadRequest(err.to_string()),
            ListError::Io { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ReputationError> for ApiError {
    fn from(err: ReputationError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Email(e) => ApiError::BadRequest(e.to_string()),
            VerifyError::Lists(e) => e.into(),
            VerifyError::Reputation(e) => e.into(),
        }
    }
}

impl From<WeightsError> for ApiError {
    fn from(err: WeightsError) -> Self {
        match err {
            WeightsError::UnknownKeys(_) => ApiError::BadRequest(err.to_string()),
            WeightsError::Io { .. } | WeightsError::Json(_) => ApiError::Internal(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EmailRequest>,
) -> ApiResult<VerificationResult> {
    let result = state.verifier.verify(&request.email).await?;
    Ok(Json(result))
}

async fn report_spam_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EmailRequest>,
) -> ApiResult<MessageResponse> {
    let domain = state.verifier.report_spam(&request.email)?;
    Ok(Json(MessageResponse {
        message: format!("Domain {domain} marked as spam. Thank you!"),
    }))
}

async fn all_lists_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<BTreeMap<String, Vec<String>>> {
    Ok(Json(state.verifier.lists().all()?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub list: String,
    pub domains: Vec<String>,
}

async fn list_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<ListResponse> {
    let kind: ListKind = name.parse()?;
    Ok(Json(ListResponse {
        list: kind.to_string(),
        domains: state.verifier.lists().list(kind)?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddDomainRequest {
    pub domain: String,
    /// Move the domain out of the opposite list instead of failing.
    #[serde(default, rename = "move")]
    pub move_from_opposite: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddDomainResponse {
    pub message: String,
    pub domain: String,
    pub list: String,
    pub moved_from: Option<String>,
}

async fn add_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<AddDomainRequest>,
) -> ApiResult<AddDomainResponse> {
    let kind: ListKind = name.parse()?;
    if kind.opposite().is_none() {
        return Err(ApiError::BadRequest(format!(
            "The {kind} list cannot be modified through this endpoint"
        )));
    }

    let policy = if request.move_from_opposite {
        ConflictPolicy::Move
    } else {
        ConflictPolicy::Reject
    };
    let outcome = state.verifier.lists().add(kind, &request.domain, policy)?;

    let message = match outcome.moved_from {
        Some(from) => format!("Moved {} from {from} to {kind}", outcome.domain),
        None => format!("Added {} to {kind}", outcome.domain),
    };
    Ok(Json(AddDomainResponse {
        message,
        domain: outcome.domain,
        list: kind.to_string(),
        moved_from: outcome.moved_from.map(|k| k.to_string()),
    }))
}

async fn remove_handler(
    State(state): State<Arc<AppState>>,
    Path((name, domain)): Path<(String, String)>,
) -> ApiResult<MessageResponse> {
    let kind: ListKind = name.parse()?;
    if kind.opposite().is_none() {
        return Err(ApiError::BadRequest(format!(
            "The {kind} list cannot be modified through this endpoint"
        )));
    }

    let domain = state.verifier.lists().remove(kind, &domain)?;
    Ok(Json(MessageResponse {
        message: format!("Removed {domain} from {kind}"),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub message: String,
    pub removed: usize,
}

async fn clear_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<ClearResponse> {
    let kind: ListKind = name.parse()?;
    let removed = state.verifier.lists().clear(kind)?;
    Ok(Json(ClearResponse {
        message: format!("Cleared {kind}"),
        removed,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoresResponse {
    /// Weights the running process scores with.
    pub active: ScoreWeights,
    /// Overrides on disk; they replace `active` at the next restart.
    pub overrides: WeightOverrides,
    pub accept_threshold: u8,
}

async fn scores_handler(State(state): State<Arc<AppState>>) -> ApiResult<ScoresResponse> {
    Ok(Json(ScoresResponse {
        active: *state.verifier.weights(),
        overrides: WeightOverrides::read(&state.overrides_path)?,
        accept_threshold: ACCEPT_THRESHOLD,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateScoresResponse {
    pub message: String,
    pub overrides: WeightOverrides,
}

async fn update_scores_handler(
    State(state): State<Arc<AppState>>,
    Json(values): Json<BTreeMap<String, i32>>,
) -> ApiResult<UpdateScoresResponse> {
    let overrides = WeightOverrides::new(values)?;
    overrides.write(&state.overrides_path)?;
    Ok(Json(UpdateScoresResponse {
        message: "Score weights saved. Restart the service to apply them.".to_string(),
        overrides,
    }))
}

async fn checked_domains_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<ReputationRecord>> {
    Ok(Json(state.verifier.reputation().records()?))
}

async fn penalties_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<DomainPenalty>> {
    Ok(Json(state.verifier.reputation().penalties()?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
