//! Ticket storage trait and types.

use thiserror::Error;

use super::validate::FieldError;
use super::{Comment, CommentDraft, Status, Ticket, TicketDraft};

/// Error type for ticket operations.
#[derive(Debug, Error)]
pub enum TicketError {
    /// One or more field constraints were violated.
    #[error("Validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    /// Ticket not found.
    #[error("Ticket not found: {0}")]
    NotFound(i64),

    /// The id in the payload does not match the id being addressed.
    #[error("Ticket id mismatch: path {path_id}, payload {payload_id}")]
    IdMismatch { path_id: i64, payload_id: i64 },

    /// The ticket changed since the caller read it.
    #[error("Ticket {ticket_id} was modified concurrently: expected version {expected}, found {actual}")]
    Conflict {
        ticket_id: i64,
        expected: i64,
        actual: i64,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<rusqlite::Error> for TicketError {
    fn from(e: rusqlite::Error) -> Self {
        TicketError::Database(e.to_string())
    }
}

/// Filter for listing tickets.
///
/// Empty strings are treated as "no filter". Matching is case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketFilter {
    /// Substring of title, description or email.
    pub search: Option<String>,
    /// Exact status name.
    pub status: Option<String>,
    /// Exact priority name.
    pub priority: Option<String>,
}

impl TicketFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn search_term(&self) -> Option<&str> {
        non_empty(&self.search)
    }

    pub fn status_term(&self) -> Option<&str> {
        non_empty(&self.status)
    }

    pub fn priority_term(&self) -> Option<&str> {
        non_empty(&self.priority)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// A status change along with the status it replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub ticket: Ticket,
    pub previous: Status,
}

/// Trait for ticket storage backends.
///
/// Implementations receive already-validated drafts.
pub trait TicketStore: Send + Sync {
    /// Insert a ticket. Sets `created_at`, version 1, no `updated_at`.
    fn create(&self, draft: TicketDraft) -> Result<Ticket, TicketError>;

    /// Get a ticket with its comments.
    fn get(&self, id: i64) -> Result<Option<Ticket>, TicketError>;

    /// List tickets matching the filter, newest first, comments included.
    fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, TicketError>;

    /// Count tickets matching the filter.
    fn count(&self, filter: &TicketFilter) -> Result<i64, TicketError>;

    /// Replace the mutable fields if the stored version equals `expected_version`.
    ///
    /// Fails with `NotFound` if the ticket is gone and `Conflict` if it
    /// exists with another version.
    fn update(
        &self,
        id: i64,
        expected_version: i64,
        draft: TicketDraft,
    ) -> Result<Ticket, TicketError>;

    /// Set the status and report the one it replaced. Both are observed in
    /// the same write. When `expected_version` is given it is checked like [`update`].
    ///
    /// [`update`]: TicketStore::update
    fn update_status(
        &self,
        id: i64,
        expected_version: Option<i64>,
        status: Status,
    ) -> Result<StatusChange, TicketError>;

    /// Delete a ticket and its comments. Returns the deleted ticket, or
    /// `None` if there was nothing to delete.
    fn delete(&self, id: i64) -> Result<Option<Ticket>, TicketError>;

    /// Attach a comment. Fails with `NotFound` if the ticket does not exist.
    fn add_comment(&self, ticket_id: i64, draft: CommentDraft) -> Result<Comment, TicketError>;
}
