use std::sync::Arc;

use helpdesk_core::{
    AuditHandle, AuditStore, Authenticator, Config, SanitizedConfig, TicketService, TicketStore,
};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    audit_store: Arc<dyn AuditStore>,
    tickets: TicketService,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
        ticket_store: Arc<dyn TicketStore>,
    ) -> Self {
        let tickets = TicketService::new(ticket_store).with_audit(audit);
        Self {
            config,
            authenticator,
            audit_store,
            tickets,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn tickets(&self) -> &TicketService {
        &self.tickets
    }
}
