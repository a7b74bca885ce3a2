use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, warn};

use super::{AuditEvent, AuditRecord};

/// Sending side of the audit log, held by the ticket service and the binary.
///
/// Events are timestamped here, when they happen, not when the writer gets
/// to them. A lost event never fails the operation that produced it.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditRecord>) -> Self {
        Self { tx }
    }

    /// Queue an event, waiting for room. For service lifecycle events, where
    /// losing the entry matters more than latency.
    pub async fn emit(&self, event: AuditEvent) {
        let kind = event.kind();
        if self.tx.send(AuditRecord::new(Utc::now(), event)).await.is_err() {
            error!(event = %kind, "Audit writer is gone; event lost");
        }
    }

    /// Queue an event from a request path without waiting. Returns false if
    /// the event was dropped.
    pub fn try_emit(&self, event: AuditEvent) -> bool {
        let kind = event.kind();
        match self.tx.try_send(AuditRecord::new(Utc::now(), event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(event = %kind, "Audit queue full; event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                error!(event = %kind, "Audit writer is gone; event lost");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEventKind;

    fn deleted(ticket_id: i64) -> AuditEvent {
        AuditEvent::TicketDeleted {
            ticket_id,
            deleted_by: "anonymous".to_string(),
            title: "Old".to_string(),
            comments_removed: 0,
        }
    }

    #[tokio::test]
    async fn test_emit_stamps_and_indexes() {
        let (tx, mut rx) = mpsc::channel(4);
        let before = Utc::now();
        AuditHandle::new(tx).emit(deleted(8)).await;

        let record = rx.recv().await.unwrap();
        assert!(record.timestamp >= before);
        assert_eq!(record.event_type, AuditEventKind::TicketDeleted);
        assert_eq!(record.ticket_id, Some(8));
    }

    #[test]
    fn test_try_emit_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = AuditHandle::new(tx);

        assert!(handle.try_emit(deleted(1)));
        assert!(!handle.try_emit(deleted(2)));
        assert_eq!(rx.try_recv().unwrap().ticket_id, Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_writer_does_not_fail_caller() {
        let (tx, rx) = mpsc::channel(4);
        let handle = AuditHandle::new(tx);
        drop(rx);

        handle.emit(deleted(1)).await;
        assert!(!handle.try_emit(deleted(2)));
    }
}
