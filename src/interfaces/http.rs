//! # HTTP API
//!
//! Routes:
//! - GET    /health
//! - POST   /invoices
//! - POST   /escrow, GET /escrow
//! - GET    /escrow/{entry_id}, GET /escrow/{entry_id}/events
//! - POST   /escrow/{entry_id}/release
//! - POST   /disputes, GET /disputes, GET /disputes/{dispute_id}
//! - POST   /disputes/{dispute_id}/votes
//! - POST   /disputes/{dispute_id}/close
//! - POST   /disputes/{dispute_id}/withdraw
//! - POST   /admin/sweep
//! - PUT    /reputation/{user_id}
//!
//! Handlers only translate JSON to engine calls; every rule lives in the
//! application layer. Errors render as `{"error": {"code", "message"}}`.

use crate::application::disputes::{DisputeDetails, DisputeEngine};
use crate::application::scheduler::{Scheduler, TickReport};
use crate::domain::dispute::{Dispute, OpenDispute, Vote, VoteChoice};
use crate::domain::escrow::{Actor, EscrowEntry, LedgerEvent};
use crate::domain::ids::{DisputeId, EscrowId, InvoiceId, UserId};
use crate::domain::invoice::Invoice;
use crate::domain::money::{Amount, Currency};
use crate::error::EscrowError;
use crate::infrastructure::reputation::ReputationBook;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub reputation: ReputationBook,
}

impl AppState {
    pub fn new(scheduler: Scheduler, reputation: ReputationBook) -> Self {
        Self {
            scheduler,
            reputation,
        }
    }

    fn engine(&self) -> &Arc<DisputeEngine> {
        self.scheduler.engine()
    }
}

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/invoices", post(register_invoice))
        .route("/escrow", post(hold).get(list_entries))
        .route("/escrow/{entry_id}", get(get_entry))
        .route("/escrow/{entry_id}/events", get(entry_events))
        .route("/escrow/{entry_id}/release", post(release))
        .route("/disputes", post(open_dispute).get(list_disputes))
        .route("/disputes/{dispute_id}", get(get_dispute))
        .route("/disputes/{dispute_id}/votes", post(cast_vote))
        .route("/disputes/{dispute_id}/close", post(close_voting))
        .route("/disputes/{dispute_id}/withdraw", post(withdraw))
        .route("/admin/sweep", post(sweep))
        .route("/reputation/{user_id}", put(set_reputation))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `ALREADY_VOTED`.
    pub code: String,
    pub message: String,
}

/// An [`EscrowError`] on its way to an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub EscrowError);

impl From<EscrowError> for ApiError {
    fn from(e: EscrowError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(EscrowError::ValidationError(rejection.body_text()))
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            EscrowError::AlreadyHeld(_) => (StatusCode::CONFLICT, "ALREADY_HELD"),
            EscrowError::NotHeld(_) => (StatusCode::CONFLICT, "NOT_HELD"),
            EscrowError::Unauthorized(_) => (StatusCode::FORBIDDEN, "UNAUTHORIZED"),
            EscrowError::NotEligible(_) => (StatusCode::FORBIDDEN, "NOT_ELIGIBLE"),
            EscrowError::WindowClosed(_) => (StatusCode::CONFLICT, "WINDOW_CLOSED"),
            EscrowError::AlreadyVoted { .. } => (StatusCode::CONFLICT, "ALREADY_VOTED"),
            EscrowError::VotingClosed(_) => (StatusCode::CONFLICT, "VOTING_CLOSED"),
            EscrowError::AlreadyDisputed(_) => (StatusCode::CONFLICT, "ALREADY_DISPUTED"),
            EscrowError::VotingStillOpen(_) => (StatusCode::CONFLICT, "VOTING_STILL_OPEN"),
            EscrowError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            EscrowError::ValidationError(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR")
            }
            EscrowError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            EscrowError::CsvError(_) => (StatusCode::UNPROCESSABLE_ENTITY, "CSV_ERROR"),
            EscrowError::IoError(_)
            | EscrowError::ConfigError(_)
            | EscrowError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internal details stay in the logs.
        let message = if status.is_server_error() {
            tracing::error!(error = %self.0, "internal server error");
            "An internal error occurred".to_string()
        } else {
            tracing::debug!(error = %self.0, code, "request rejected");
            self.0.to_string()
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInvoiceRequest {
    pub id: InvoiceId,
    pub client_id: UserId,
    pub freelancer_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
}

/// Sent by the payment service once a payment completes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldRequest {
    pub invoice_id: InvoiceId,
    pub amount: Amount,
    pub currency: Currency,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorRequest {
    pub actor_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub user_id: UserId,
    pub vote: VoteChoice,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationRequest {
    pub score: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationResponse {
    pub user_id: UserId,
    pub score: i64,
}

#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub entries: Vec<EscrowEntry>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<LedgerEvent>,
}

#[derive(Debug, Serialize)]
pub struct DisputesResponse {
    pub disputes: Vec<DisputeDetails>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    Ok(payload?.0)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> &'static str {
    "ok"
}

async fn register_invoice(
    State(state): State<AppState>,
    payload: Result<Json<RegisterInvoiceRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Invoice>)> {
    let req = body(payload)?;
    let invoice = Invoice::new(
        req.id,
        req.client_id,
        req.freelancer_id,
        req.amount,
        req.currency,
    )?;
    let invoice = state.engine().ledger().register_invoice(invoice).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

async fn hold(
    State(state): State<AppState>,
    payload: Result<Json<HoldRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<EscrowEntry>)> {
    let req = body(payload)?;
    let entry = state
        .engine()
        .ledger()
        .hold(&req.invoice_id, req.amount, req.currency)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn list_entries(State(state): State<AppState>) -> ApiResult<Json<EntriesResponse>> {
    let entries = state.engine().ledger().entries().await?;
    Ok(Json(EntriesResponse { entries }))
}

async fn get_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> ApiResult<Json<EscrowEntry>> {
    let id: EscrowId = entry_id.parse()?;
    Ok(Json(state.engine().ledger().get(id).await?))
}

async fn entry_events(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> ApiResult<Json<EventsResponse>> {
    let id: EscrowId = entry_id.parse()?;
    let events = state.engine().ledger().events(id).await?;
    Ok(Json(EventsResponse { events }))
}

async fn release(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
    payload: Result<Json<ActorRequest>, JsonRejection>,
) -> ApiResult<Json<EscrowEntry>> {
    let id: EscrowId = entry_id.parse()?;
    let req = body(payload)?;
    let entry = state
        .engine()
        .ledger()
        .release(
            id,
            Actor::Client {
                user_id: req.actor_id,
            },
        )
        .await?;
    Ok(Json(entry))
}

async fn open_dispute(
    State(state): State<AppState>,
    payload: Result<Json<OpenDispute>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DisputeDetails>)> {
    let dispute = state.engine().open(body(payload)?).await?;
    let details = state.engine().details(dispute.id).await?;
    Ok((StatusCode::CREATED, Json(details)))
}

async fn list_disputes(State(state): State<AppState>) -> ApiResult<Json<DisputesResponse>> {
    let disputes = state.engine().list().await?;
    Ok(Json(DisputesResponse { disputes }))
}

async fn get_dispute(
    State(state): State<AppState>,
    Path(dispute_id): Path<String>,
) -> ApiResult<Json<DisputeDetails>> {
    let id: DisputeId = dispute_id.parse()?;
    Ok(Json(state.engine().details(id).await?))
}

async fn cast_vote(
    State(state): State<AppState>,
    Path(dispute_id): Path<String>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Vote>)> {
    let id: DisputeId = dispute_id.parse()?;
    let req = body(payload)?;
    let vote = state.engine().cast_vote(id, req.user_id, req.vote).await?;
    Ok((StatusCode::CREATED, Json(vote)))
}

async fn close_voting(
    State(state): State<AppState>,
    Path(dispute_id): Path<String>,
) -> ApiResult<Json<Dispute>> {
    let id: DisputeId = dispute_id.parse()?;
    Ok(Json(state.engine().close_voting(id).await?))
}

async fn withdraw(
    State(state): State<AppState>,
    Path(dispute_id): Path<String>,
    payload: Result<Json<ActorRequest>, JsonRejection>,
) -> ApiResult<Json<Dispute>> {
    let id: DisputeId = dispute_id.parse()?;
    let req = body(payload)?;
    Ok(Json(state.engine().withdraw(id, &req.actor_id).await?))
}

async fn sweep(State(state): State<AppState>) -> ApiResult<Json<TickReport>> {
    Ok(Json(state.scheduler.tick().await?))
}

async fn set_reputation(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    payload: Result<Json<ReputationRequest>, JsonRejection>,
) -> ApiResult<Json<ReputationResponse>> {
    let user_id = UserId::new(user_id)?;
    let req = body(payload)?;
    state.reputation.set_score(user_id.clone(), req.score).await;
    Ok(Json(ReputationResponse {
        user_id,
        score: req.score,
    }))
}
