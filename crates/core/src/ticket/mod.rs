//! Support tickets and their comments.

mod service;
mod sqlite_store;
mod store;
mod types;
mod validate;

pub use service::{NextView, Outcome, TicketService, TicketUpdate};
pub use sqlite_store::SqliteTicketStore;
pub use store::{StatusChange, TicketError, TicketFilter, TicketStore};
pub use types::{Comment, CommentDraft, Priority, Status, Ticket, TicketDraft, UnknownVariant};
pub use validate::{
    is_valid_email, parse_status, validate_comment, validate_ticket, CommentInput, FieldError,
    TicketInput, DESCRIPTION_MAX_CHARS, TITLE_MAX_CHARS,
};
