//! API route handlers.
//!
//! All endpoints speak JSON. State is the shared `Sportsbook`; every
//! handler is a thin translation between HTTP and one book operation.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Request, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::engine::book::Sportsbook;
use crate::engine::settlement::MatchupSettlement;
use crate::engine::wager::PlaceWagerRequest;
use crate::types::{
    BettingLine, BookError, ErrorKind, FinalScore, LedgerDiscrepancy, LedgerTransaction, MatchupInput,
    Outcome, Participant, Settlement, Wager,
};

pub type AppState = Arc<Sportsbook>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A `BookError` rendered as `{ "error": kind, "message": text }`.
#[derive(Debug)]
pub struct ApiError(pub BookError);

impl From<BookError> for ApiError {
    fn from(e: BookError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation if self.0.is_not_found() => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::BusinessRule => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::StateConflict => StatusCode::CONFLICT,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error: self.0.kind().as_str().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// `Json` whose rejection is a validation `ApiError` instead of axum's
/// plain-text response.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError(BookError::MalformedRequest(rejection.body_text()))),
        }
    }
}

/// `Path` with the same rejection treatment as `ApiJson`.
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError(BookError::MalformedRequest(rejection.body_text()))),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncParticipantRequest {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateLinesRequest {
    pub matchups: Vec<MatchupInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleWagerRequest {
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub participant_id: String,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditResponse {
    pub consistent: bool,
    pub discrepancies: Vec<LedgerDiscrepancy>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /api/participants
pub async fn sync_participant(
    State(book): State<AppState>,
    ApiJson(req): ApiJson<SyncParticipantRequest>,
) -> ApiResult<Json<Participant>> {
    Ok(Json(book.sync_participant(&req.id, &req.display_name).await?))
}

/// DELETE /api/participants/:id
pub async fn deactivate_participant(
    State(book): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Participant>> {
    Ok(Json(book.deactivate_participant(&id).await?))
}

/// GET /api/participants/:id/balance
pub async fn get_balance(
    State(book): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = book.balance(&id).await?;
    Ok(Json(BalanceResponse { participant_id: id, balance }))
}

/// GET /api/participants/:id/ledger
pub async fn get_ledger(
    State(book): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Vec<LedgerTransaction>>> {
    Ok(Json(book.ledger(&id).await?))
}

/// GET /api/participants/:id/wagers
pub async fn get_wagers(
    State(book): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Vec<Wager>>> {
    Ok(Json(book.wagers(&id).await?))
}

/// POST /api/weeks/:week/lines
pub async fn generate_lines(
    State(book): State<AppState>,
    ApiPath(week): ApiPath<u32>,
    ApiJson(req): ApiJson<GenerateLinesRequest>,
) -> ApiResult<(StatusCode, Json<Vec<BettingLine>>)> {
    let lines = book.generate_lines(week, &req.matchups).await?;
    Ok((StatusCode::CREATED, Json(lines)))
}

/// GET /api/weeks/:week/lines
pub async fn get_lines(
    State(book): State<AppState>,
    ApiPath(week): ApiPath<u32>,
) -> ApiResult<Json<Vec<BettingLine>>> {
    Ok(Json(book.lines(week).await?))
}

/// POST /api/wagers
pub async fn place_wager(
    State(book): State<AppState>,
    ApiJson(req): ApiJson<PlaceWagerRequest>,
) -> ApiResult<(StatusCode, Json<Wager>)> {
    let wager = book.place_wager(&req).await?;
    Ok((StatusCode::CREATED, Json(wager)))
}

/// POST /api/wagers/:id/settle
pub async fn settle_wager(
    State(book): State<AppState>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<SettleWagerRequest>,
) -> ApiResult<Json<Settlement>> {
    Ok(Json(book.settle_wager(&id, req.outcome).await?))
}

/// POST /api/matchups/:id/settle
pub async fn settle_matchup(
    State(book): State<AppState>,
    ApiPath(id): ApiPath<String>,
    ApiJson(score): ApiJson<FinalScore>,
) -> ApiResult<Json<MatchupSettlement>> {
    Ok(Json(book.settle_matchup(&id, score).await?))
}

/// GET /api/audit
pub async fn audit(State(book): State<AppState>) -> ApiResult<Json<AuditResponse>> {
    let discrepancies = book.audit().await?;
    Ok(Json(AuditResponse {
        consistent: discrepancies.is_empty(),
        discrepancies,
    }))
}
