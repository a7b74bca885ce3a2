use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use super::{AuditHandle, AuditRecord, AuditStore};

/// Most records written in one transaction.
const BATCH_SIZE: usize = 64;

/// Drains the audit queue into an [`AuditStore`].
///
/// Whatever has queued up since the last write goes out as one batch, so a
/// burst of ticket activity costs one transaction rather than one per event.
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditRecord>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditRecord>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Write until every [`AuditHandle`] is dropped and the queue is empty.
    /// Returns how many records were stored.
    pub async fn run(mut self) -> usize {
        info!("Audit writer started");

        let mut batch = Vec::with_capacity(BATCH_SIZE);
        let mut written = 0;
        while self.rx.recv_many(&mut batch, BATCH_SIZE).await > 0 {
            match self.store.append(&batch) {
                Ok(()) => written += batch.len(),
                Err(e) => error!(lost = batch.len(), "Failed to write audit batch: {}", e),
            }
            batch.clear();
        }

        info!(written, "Audit writer drained");
        written
    }
}

/// A connected handle and writer. Spawn the writer with `tokio::spawn(writer.run())`.
///
/// `capacity` bounds the queue; [`AuditHandle::try_emit`] drops events beyond it.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    capacity: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(capacity);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}
