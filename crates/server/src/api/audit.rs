use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use helpdesk_core::{AuditError, AuditEventKind, AuditFilter, AuditRecord, DEFAULT_AUDIT_LIMIT};

use super::tickets::{parse_id, ApiError, ErrorResponse};
use crate::state::AppState;

const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    pub ticket_id: Option<i64>,
    /// Comma-separated, e.g. `ticket_status_changed,comment_added`.
    pub event_type: Option<String>,
    pub actor: Option<String>,
    /// RFC 3339, inclusive.
    pub since: Option<DateTime<Utc>>,
    /// RFC 3339, inclusive.
    pub until: Option<DateTime<Utc>>,
    /// Default 100, capped at 1000.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQueryParams {
    fn to_filter(&self) -> Result<AuditFilter, ApiError> {
        Ok(AuditFilter {
            ticket_id: self.ticket_id,
            kinds: parse_kinds(self.event_type.as_deref())?,
            actor: self.actor.clone().filter(|a| !a.is_empty()),
            since: self.since,
            until: self.until,
            limit: self.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).clamp(1, MAX_LIMIT),
            offset: self.offset.unwrap_or(0).max(0),
            ..AuditFilter::default()
        })
    }
}

fn parse_kinds(raw: Option<&str>) -> Result<Vec<AuditEventKind>, ApiError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<AuditEventKind>().map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse::new(e.to_string())),
                )
            })
        })
        .collect()
}

fn store_error(e: AuditError) -> ApiError {
    tracing::error!("Failed to read audit log: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(format!("Failed to read audit log: {}", e))),
    )
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Matching events, ignoring limit and offset.
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Search the audit log, newest first.
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, ApiError> {
    let filter = params.to_filter()?;
    let store = state.audit_store();

    let events = store.query(&filter).map_err(store_error)?;
    let total = store.count(&filter).map_err(store_error)?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    /// Narrow to these kinds; comma-separated.
    pub event_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TicketHistoryResponse {
    pub ticket_id: i64,
    pub events: Vec<AuditRecord>,
}

/// What happened to a ticket, oldest first. Still answers after the ticket
/// is deleted.
pub async fn ticket_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<TicketHistoryResponse>, ApiError> {
    let ticket_id = parse_id(&id)?;

    let mut filter = AuditFilter {
        limit: MAX_LIMIT,
        ..AuditFilter::ticket_history(ticket_id)
    };
    let kinds = parse_kinds(params.event_type.as_deref())?;
    if !kinds.is_empty() {
        filter.kinds = kinds;
    }

    let events = state.audit_store().query(&filter).map_err(store_error)?;
    Ok(Json(TicketHistoryResponse { ticket_id, events }))
}
