//! Ticket API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use helpdesk_core::ticket::{FieldError, StatusChange};
use helpdesk_core::{
    Comment, CommentInput, NextView, Outcome, Priority, Status, Ticket, TicketError, TicketFilter,
    TicketInput, TicketUpdate,
};

use super::middleware::AuthUser;
use crate::metrics::{
    COMMENTS_ADDED_TOTAL, CONCURRENCY_CONFLICTS_TOTAL, TICKETS_CREATED_TOTAL,
    TICKET_STATUS_TRANSITIONS,
};
use crate::state::AppState;

const TICKETS_PATH: &str = "/api/v1/tickets";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query string for the ticket list. Empty values are ignored.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ListTicketsParams {
    pub search: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
}

impl ListTicketsParams {
    fn to_filter(&self) -> TicketFilter {
        TicketFilter {
            search: self.search.clone(),
            status: self.status.clone(),
            priority: self.priority.clone(),
        }
    }
}

/// Body of `POST /tickets/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: String,
    /// When present, the change is rejected if the ticket has moved on.
    pub version: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub priority_class: &'static str,
    pub status: Status,
    pub status_class: &'static str,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub comments: Vec<Comment>,
}

impl From<Ticket> for TicketResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            title: ticket.title,
            description: ticket.description,
            priority: ticket.priority,
            priority_class: ticket.priority.badge_class(),
            status: ticket.status,
            status_class: ticket.status.badge_class(),
            email: ticket.email,
            created_at: ticket.created_at,
            updated_at: ticket.updated_at,
            version: ticket.version,
            comments: ticket.comments,
        }
    }
}

/// Allowed values for the priority and status pickers.
#[derive(Debug, Serialize)]
pub struct Choices {
    pub priorities: Vec<&'static str>,
    pub statuses: Vec<&'static str>,
}

impl Choices {
    fn all() -> Self {
        Self {
            priorities: Priority::ALL.iter().map(Priority::as_str).collect(),
            statuses: Status::ALL.iter().map(Status::as_str).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListTicketsResponse {
    pub tickets: Vec<TicketResponse>,
    pub total: usize,
    pub filters: ListTicketsParams,
    pub choices: Choices,
}

/// Data for a create or edit form.
#[derive(Debug, Serialize)]
pub struct TicketFormResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    pub form: TicketInput,
    pub choices: Choices,
}

/// A successful mutation: what happened, where to go next, and the result.
#[derive(Debug, Serialize)]
pub struct OutcomeResponse<T> {
    pub message: String,
    pub redirect_to: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T> OutcomeResponse<T> {
    fn new<U>(outcome: Outcome<U>, data: impl FnOnce(U) -> T) -> Self {
        Self {
            message: outcome.message,
            redirect_to: redirect_path(outcome.next),
            data: data(outcome.value),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TicketBody {
    pub ticket: TicketResponse,
}

#[derive(Debug, Serialize)]
pub struct StatusChangeBody {
    pub ticket: TicketResponse,
    pub previous_status: Status,
}

#[derive(Debug, Serialize)]
pub struct DeleteBody {
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketResponse>,
}

#[derive(Debug, Serialize)]
pub struct CommentBody {
    pub comment: Comment,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Per-field messages for validation failures.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    /// The rejected input, so a form can be shown again as entered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted: Option<Value>,
    /// Version currently stored, on a conflict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<i64>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            errors: Vec::new(),
            submitted: None,
            current_version: None,
        }
    }
}

pub(super) type ApiError = (StatusCode, Json<ErrorResponse>);

fn redirect_path(next: NextView) -> String {
    match next {
        NextView::List => TICKETS_PATH.to_string(),
        NextView::Detail(id) => format!("{}/{}", TICKETS_PATH, id),
    }
}

/// Ids that are not integers cannot name a ticket.
pub(super) fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("Ticket not found: {}", raw))),
        )
    })
}

fn ticket_error(err: TicketError, submitted: Option<&impl Serialize>) -> ApiError {
    let message = err.to_string();
    match err {
        TicketError::Validation(errors) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                errors,
                submitted: submitted.and_then(|input| serde_json::to_value(input).ok()),
                ..ErrorResponse::new(message)
            }),
        ),
        TicketError::NotFound(_) | TicketError::IdMismatch { .. } => {
            (StatusCode::NOT_FOUND, Json(ErrorResponse::new(message)))
        }
        TicketError::Conflict { actual, .. } => {
            CONCURRENCY_CONFLICTS_TOTAL.inc();
            (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    current_version: Some(actual),
                    ..ErrorResponse::new(message)
                }),
            )
        }
        TicketError::Database(_) => {
            tracing::error!("Ticket store failure: {}", message);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(message)),
            )
        }
    }
}

/// For handlers with no input worth echoing back.
const NO_INPUT: Option<&()> = None;

// ============================================================================
// Reads
// ============================================================================

/// List tickets matching every supplied filter, newest first
pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTicketsParams>,
) -> Result<Json<ListTicketsResponse>, ApiError> {
    let tickets = state
        .tickets()
        .list(&params.to_filter())
        .map_err(|e| ticket_error(e, NO_INPUT))?;

    Ok(Json(ListTicketsResponse {
        total: tickets.len(),
        tickets: tickets.into_iter().map(TicketResponse::from).collect(),
        filters: params,
        choices: Choices::all(),
    }))
}

/// Get a ticket with its comments
pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TicketResponse>, ApiError> {
    let id = parse_id(&id)?;
    let ticket = state
        .tickets()
        .get(id)
        .map_err(|e| ticket_error(e, NO_INPUT))?;
    Ok(Json(ticket.into()))
}

/// Blank create form with defaults preselected
pub async fn new_ticket_form() -> Json<TicketFormResponse> {
    Json(TicketFormResponse {
        id: None,
        version: None,
        form: TicketInput::form_defaults(),
        choices: Choices::all(),
    })
}

/// Edit form prefilled from the stored ticket, with the version to send back
pub async fn edit_ticket_form(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TicketFormResponse>, ApiError> {
    let id = parse_id(&id)?;
    let ticket = state
        .tickets()
        .get(id)
        .map_err(|e| ticket_error(e, NO_INPUT))?;

    Ok(Json(TicketFormResponse {
        id: Some(ticket.id),
        version: Some(ticket.version),
        form: TicketInput::from(&ticket),
        choices: Choices::all(),
    }))
}

/// The ticket about to be deleted
pub async fn delete_confirmation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TicketResponse>, ApiError> {
    get_ticket(State(state), Path(id)).await
}

// ============================================================================
// Mutations
// ============================================================================

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<TicketInput>,
) -> Result<(StatusCode, Json<OutcomeResponse<TicketBody>>), ApiError> {
    let outcome = state
        .tickets()
        .create(&user_id, &body)
        .map_err(|e| ticket_error(e, Some(&body)))?;

    TICKETS_CREATED_TOTAL.inc();
    Ok((
        StatusCode::CREATED,
        Json(OutcomeResponse::new(outcome, |ticket| TicketBody {
            ticket: ticket.into(),
        })),
    ))
}

/// Replace a ticket's fields. The body carries the id and version that were read.
pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<TicketUpdate>,
) -> Result<Json<OutcomeResponse<TicketBody>>, ApiError> {
    let id = parse_id(&id)?;
    let outcome = state
        .tickets()
        .update(&user_id, id, &body)
        .map_err(|e| ticket_error(e, Some(&body)))?;

    Ok(Json(OutcomeResponse::new(outcome, |ticket| TicketBody {
        ticket: ticket.into(),
    })))
}

/// Delete a ticket and its comments. Succeeds when the ticket is already gone.
pub async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OutcomeResponse<DeleteBody>>, ApiError> {
    let id = parse_id(&id)?;
    let outcome = state
        .tickets()
        .delete(&user_id, id)
        .map_err(|e| ticket_error(e, NO_INPUT))?;

    Ok(Json(OutcomeResponse::new(outcome, |ticket| DeleteBody {
        deleted: ticket.is_some(),
        ticket: ticket.map(TicketResponse::from),
    })))
}

pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<CommentInput>,
) -> Result<(StatusCode, Json<OutcomeResponse<CommentBody>>), ApiError> {
    let id = parse_id(&id)?;
    let outcome = state
        .tickets()
        .add_comment(&user_id, id, &body)
        .map_err(|e| ticket_error(e, Some(&body)))?;

    COMMENTS_ADDED_TOTAL.inc();
    Ok((
        StatusCode::CREATED,
        Json(OutcomeResponse::new(outcome, |comment| CommentBody {
            comment,
        })),
    ))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<OutcomeResponse<StatusChangeBody>>, ApiError> {
    let id = parse_id(&id)?;
    let outcome = state
        .tickets()
        .update_status(&user_id, id, &body.status, body.version)
        .map_err(|e| ticket_error(e, NO_INPUT))?;

    let StatusChange { ref ticket, previous } = outcome.value;
    TICKET_STATUS_TRANSITIONS
        .with_label_values(&[previous.as_str(), ticket.status.as_str()])
        .inc();

    Ok(Json(OutcomeResponse::new(
        outcome,
        |StatusChange { ticket, previous }| StatusChangeBody {
            ticket: ticket.into(),
            previous_status: previous,
        },
    )))
}
