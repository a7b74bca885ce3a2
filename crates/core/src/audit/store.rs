use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{AuditEventKind, AuditRecord};

/// Page size when the caller does not ask for one.
pub const DEFAULT_AUDIT_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown audit event type: {0}")]
    UnknownKind(String),
}

impl From<rusqlite::Error> for AuditError {
    fn from(e: rusqlite::Error) -> Self {
        AuditError::Database(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Which part of the log to read. Unset fields match everything.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditFilter {
    pub ticket_id: Option<i64>,
    /// Match any of these kinds. Empty matches all.
    pub kinds: Vec<AuditEventKind>,
    pub actor: Option<String>,
    /// Inclusive.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive.
    pub until: Option<DateTime<Utc>>,
    pub order: AuditOrder,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            ticket_id: None,
            kinds: Vec::new(),
            actor: None,
            since: None,
            until: None,
            order: AuditOrder::default(),
            limit: DEFAULT_AUDIT_LIMIT,
            offset: 0,
        }
    }
}

impl AuditFilter {
    /// Everything that happened to one ticket, in the order it happened.
    pub fn ticket_history(ticket_id: i64) -> Self {
        Self {
            ticket_id: Some(ticket_id),
            kinds: AuditEventKind::TICKET_HISTORY.to_vec(),
            order: AuditOrder::OldestFirst,
            ..Self::default()
        }
    }
}

pub trait AuditStore: Send + Sync {
    /// Append records in one transaction; either all are stored or none.
    fn append(&self, records: &[AuditRecord]) -> Result<(), AuditError>;

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Matching records, ignoring `limit` and `offset`.
    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;
}
