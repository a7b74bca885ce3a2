//! Ticket operations as seen by the API layer.
//!
//! The service validates raw input, talks to the [`TicketStore`], emits audit
//! events and hands back an [`Outcome`] carrying the user-facing message and
//! the view the presentation layer should show next.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::validate::{
    parse_status, validate_comment, validate_ticket, CommentInput, FieldError, TicketInput,
};
use super::{Comment, StatusChange, Ticket, TicketError, TicketFilter, TicketStore};
use crate::audit::{AuditEvent, AuditHandle};

/// Where the presentation layer should go after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "view", content = "ticket_id", rename_all = "snake_case")]
pub enum NextView {
    List,
    Detail(i64),
}

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub message: String,
    pub next: NextView,
}

impl<T> Outcome<T> {
    fn new(value: T, message: impl Into<String>, next: NextView) -> Self {
        Self {
            value,
            message: message.into(),
            next,
        }
    }
}

/// Edit payload: the id and version the caller read, plus the new fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketUpdate {
    pub id: i64,
    pub version: i64,
    #[serde(flatten)]
    pub fields: TicketInput,
}

pub struct TicketService {
    store: Arc<dyn TicketStore>,
    audit: Option<AuditHandle>,
}

impl TicketService {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store, audit: None }
    }

    /// Record every mutation in the audit log.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn store(&self) -> &dyn TicketStore {
        self.store.as_ref()
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.try_emit(event);
        }
    }

    /// Bad input addressed to a missing ticket reports the ticket as missing.
    fn rejected_input(&self, id: i64, errors: Vec<FieldError>) -> TicketError {
        match self.store.get(id) {
            Ok(Some(_)) => TicketError::Validation(errors),
            Ok(None) => TicketError::NotFound(id),
            Err(e) => e,
        }
    }

    /// Tickets matching every supplied filter, newest first, with comments.
    pub fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, TicketError> {
        let tickets = self.store.list(filter)?;
        debug!(
            search = filter.search_term(),
            status = filter.status_term(),
            priority = filter.priority_term(),
            matched = tickets.len(),
            "Listed tickets"
        );
        Ok(tickets)
    }

    /// A single ticket with its comments.
    pub fn get(&self, id: i64) -> Result<Ticket, TicketError> {
        self.store.get(id)?.ok_or(TicketError::NotFound(id))
    }

    pub fn create(&self, actor: &str, input: &TicketInput) -> Result<Outcome<Ticket>, TicketError> {
        let draft = validate_ticket(input).map_err(TicketError::Validation)?;
        let ticket = self.store.create(draft)?;

        info!(ticket_id = ticket.id, actor, "Ticket created");
        self.emit(AuditEvent::TicketCreated {
            ticket_id: ticket.id,
            created_by: actor.to_string(),
            title: ticket.title.clone(),
            priority: ticket.priority.to_string(),
            status: ticket.status.to_string(),
            email: ticket.email.clone(),
        });

        let next = NextView::Detail(ticket.id);
        Ok(Outcome::new(ticket, "Ticket created successfully!", next))
    }

    /// Replace a ticket's fields, provided nobody changed it since `update.version`.
    pub fn update(
        &self,
        actor: &str,
        id: i64,
        update: &TicketUpdate,
    ) -> Result<Outcome<Ticket>, TicketError> {
        if update.id != id {
            return Err(TicketError::IdMismatch {
                path_id: id,
                payload_id: update.id,
            });
        }

        let draft = validate_ticket(&update.fields).map_err(TicketError::Validation)?;
        let ticket = match self.store.update(id, update.version, draft) {
            Ok(ticket) => ticket,
            Err(e @ TicketError::Conflict { .. }) => {
                warn!(ticket_id = id, actor, "Edit rejected: {}", e);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        info!(ticket_id = id, version = ticket.version, actor, "Ticket updated");
        self.emit(AuditEvent::TicketUpdated {
            ticket_id: id,
            updated_by: actor.to_string(),
            from_version: update.version,
            to_version: ticket.version,
        });

        Ok(Outcome::new(
            ticket,
            "Ticket updated successfully!",
            NextView::List,
        ))
    }

    /// Delete a ticket and its comments. Deleting an absent ticket succeeds.
    pub fn delete(&self, actor: &str, id: i64) -> Result<Outcome<Option<Ticket>>, TicketError> {
        let deleted = self.store.delete(id)?;

        let message = match deleted {
            Some(ref ticket) => {
                info!(ticket_id = id, actor, "Ticket deleted");
                self.emit(AuditEvent::TicketDeleted {
                    ticket_id: id,
                    deleted_by: actor.to_string(),
                    title: ticket.title.clone(),
                    comments_removed: ticket.comments.len(),
                });
                "Ticket deleted successfully!"
            }
            None => {
                debug!(ticket_id = id, "Delete of absent ticket ignored");
                "Ticket was already deleted."
            }
        };

        Ok(Outcome::new(deleted, message, NextView::List))
    }

    pub fn add_comment(
        &self,
        actor: &str,
        ticket_id: i64,
        input: &CommentInput,
    ) -> Result<Outcome<Comment>, TicketError> {
        let draft = validate_comment(input).map_err(|e| self.rejected_input(ticket_id, e))?;
        let comment = self.store.add_comment(ticket_id, draft)?;

        info!(ticket_id, comment_id = comment.id, actor, "Comment added");
        self.emit(AuditEvent::CommentAdded {
            ticket_id,
            comment_id: comment.id,
            added_by: actor.to_string(),
            author: comment.author.clone(),
        });

        Ok(Outcome::new(
            comment,
            "Comment added successfully!",
            NextView::List,
        ))
    }

    /// Move a ticket to `status`. Any status may follow any other.
    pub fn update_status(
        &self,
        actor: &str,
        id: i64,
        status: &str,
        expected_version: Option<i64>,
    ) -> Result<Outcome<StatusChange>, TicketError> {
        let status = parse_status(status).map_err(|e| self.rejected_input(id, vec![e]))?;
        let change = self.store.update_status(id, expected_version, status)?;
        let previous = change.previous;

        info!(ticket_id = id, from = %previous, to = %status, actor, "Ticket status changed");
        self.emit(AuditEvent::TicketStatusChanged {
            ticket_id: id,
            changed_by: actor.to_string(),
            from_status: previous.to_string(),
            to_status: status.to_string(),
        });

        Ok(Outcome::new(
            change,
            format!("Status updated to {}!", status),
            NextView::Detail(id),
        ))
    }
}
