use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AuditError;

/// Kind of an audit entry, stored in its own column so it can be filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    ServiceStarted,
    ServiceStopped,
    TicketCreated,
    TicketUpdated,
    TicketStatusChanged,
    TicketDeleted,
    CommentAdded,
}

impl AuditEventKind {
    /// Kinds that make up a ticket's history.
    pub const TICKET_HISTORY: [AuditEventKind; 5] = [
        AuditEventKind::TicketCreated,
        AuditEventKind::TicketUpdated,
        AuditEventKind::TicketStatusChanged,
        AuditEventKind::CommentAdded,
        AuditEventKind::TicketDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceStarted => "service_started",
            Self::ServiceStopped => "service_stopped",
            Self::TicketCreated => "ticket_created",
            Self::TicketUpdated => "ticket_updated",
            Self::TicketStatusChanged => "ticket_status_changed",
            Self::TicketDeleted => "ticket_deleted",
            Self::CommentAdded => "comment_added",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::ServiceStarted,
            Self::ServiceStopped,
            Self::TicketCreated,
            Self::TicketUpdated,
            Self::TicketStatusChanged,
            Self::TicketDeleted,
            Self::CommentAdded,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == s)
        .ok_or_else(|| AuditError::UnknownKind(s.to_string()))
    }
}

/// Something worth recording: a ticket mutation or a service lifecycle step.
///
/// Ticket events carry the acting user (`*_by`) as resolved by the
/// authenticator, which is not the same as a comment's free-text `author`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },
    TicketCreated {
        ticket_id: i64,
        created_by: String,
        title: String,
        priority: String,
        status: String,
        email: String,
    },
    TicketUpdated {
        ticket_id: i64,
        updated_by: String,
        /// Version the edit was applied on top of.
        from_version: i64,
        to_version: i64,
    },
    TicketStatusChanged {
        ticket_id: i64,
        changed_by: String,
        from_status: String,
        to_status: String,
    },
    TicketDeleted {
        ticket_id: i64,
        deleted_by: String,
        title: String,
        comments_removed: usize,
    },
    CommentAdded {
        ticket_id: i64,
        comment_id: i64,
        added_by: String,
        author: String,
    },
}

impl AuditEvent {
    pub fn kind(&self) -> AuditEventKind {
        match self {
            Self::ServiceStarted { .. } => AuditEventKind::ServiceStarted,
            Self::ServiceStopped { .. } => AuditEventKind::ServiceStopped,
            Self::TicketCreated { .. } => AuditEventKind::TicketCreated,
            Self::TicketUpdated { .. } => AuditEventKind::TicketUpdated,
            Self::TicketStatusChanged { .. } => AuditEventKind::TicketStatusChanged,
            Self::TicketDeleted { .. } => AuditEventKind::TicketDeleted,
            Self::CommentAdded { .. } => AuditEventKind::CommentAdded,
        }
    }

    pub fn ticket_id(&self) -> Option<i64> {
        match self {
            Self::TicketCreated { ticket_id, .. }
            | Self::TicketUpdated { ticket_id, .. }
            | Self::TicketStatusChanged { ticket_id, .. }
            | Self::TicketDeleted { ticket_id, .. }
            | Self::CommentAdded { ticket_id, .. } => Some(*ticket_id),
            Self::ServiceStarted { .. } | Self::ServiceStopped { .. } => None,
        }
    }

    /// Who caused the event. `None` for service lifecycle events.
    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::TicketCreated { created_by: who, .. }
            | Self::TicketUpdated { updated_by: who, .. }
            | Self::TicketStatusChanged { changed_by: who, .. }
            | Self::TicketDeleted { deleted_by: who, .. }
            | Self::CommentAdded { added_by: who, .. } => Some(who),
            Self::ServiceStarted { .. } | Self::ServiceStopped { .. } => None,
        }
    }
}

/// One line of the audit log.
///
/// `event_type`, `ticket_id` and `actor` duplicate parts of `data` so the
/// store can index them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Zero until stored.
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventKind,
    pub ticket_id: Option<i64>,
    pub actor: Option<String>,
    pub data: AuditEvent,
}

impl AuditRecord {
    pub fn new(timestamp: DateTime<Utc>, event: AuditEvent) -> Self {
        Self {
            id: 0,
            timestamp,
            event_type: event.kind(),
            ticket_id: event.ticket_id(),
            actor: event.actor().map(String::from),
            data: event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_changed() -> AuditEvent {
        AuditEvent::TicketStatusChanged {
            ticket_id: 3,
            changed_by: "agent".to_string(),
            from_status: "Open".to_string(),
            to_status: "In Progress".to_string(),
        }
    }

    #[test]
    fn test_record_indexes_event_fields() {
        let record = AuditRecord::new(Utc::now(), status_changed());
        assert_eq!(record.id, 0);
        assert_eq!(record.event_type, AuditEventKind::TicketStatusChanged);
        assert_eq!(record.ticket_id, Some(3));
        assert_eq!(record.actor.as_deref(), Some("agent"));
    }

    #[test]
    fn test_service_events_have_no_ticket_or_actor() {
        let record = AuditRecord::new(
            Utc::now(),
            AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            },
        );
        assert_eq!(record.event_type, AuditEventKind::ServiceStopped);
        assert!(record.ticket_id.is_none());
        assert!(record.actor.is_none());
    }

    #[test]
    fn test_comment_actor_is_not_author() {
        let event = AuditEvent::CommentAdded {
            ticket_id: 3,
            comment_id: 9,
            added_by: "api_key_user".to_string(),
            author: "Dana".to_string(),
        };
        assert_eq!(event.actor(), Some("api_key_user"));
    }

    #[test]
    fn test_kind_names_parse_back() {
        for kind in AuditEventKind::TICKET_HISTORY {
            assert_eq!(kind.as_str().parse::<AuditEventKind>().unwrap(), kind);
        }
        assert_eq!(
            "service_started".parse::<AuditEventKind>().unwrap(),
            AuditEventKind::ServiceStarted
        );
        assert!(matches!(
            "ticket_renamed".parse::<AuditEventKind>(),
            Err(AuditError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_record_json_shape() {
        let record = AuditRecord::new(Utc::now(), status_changed());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event_type"], "ticket_status_changed");
        assert_eq!(json["actor"], "agent");
        assert_eq!(json["data"]["type"], "ticket_status_changed");
        assert_eq!(json["data"]["to_status"], "In Progress");
    }
}
