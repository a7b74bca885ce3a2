pub mod audit;
pub mod auth;
pub mod config;
pub mod ticket;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditEventKind, AuditFilter, AuditHandle,
    AuditOrder, AuditRecord, AuditStore, AuditWriter, SqliteAuditStore, DEFAULT_AUDIT_LIMIT,
};
pub use auth::{create_authenticator, AuthError, AuthRequest, Authenticator, Identity};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use ticket::{
    Comment, CommentInput, NextView, Outcome, Priority, SqliteTicketStore, Status, StatusChange,
    Ticket, TicketError, TicketFilter, TicketInput, TicketService, TicketStore, TicketUpdate,
};
