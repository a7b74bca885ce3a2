//! Field validation for ticket and comment payloads.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::{CommentDraft, Priority, Status, Ticket, TicketDraft};

/// Maximum title length in characters.
pub const TITLE_MAX_CHARS: usize = 100;

/// Maximum description length in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

/// One `@`, something on each side, no whitespace.
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap());

/// A single violated constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Ticket fields as submitted, before validation.
///
/// Priority and status arrive as strings; missing values take the form
/// defaults (Medium / Open).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub email: String,
}

/// Edit form prefilled from a stored ticket.
impl From<&Ticket> for TicketInput {
    fn from(ticket: &Ticket) -> Self {
        Self {
            title: ticket.title.clone(),
            description: ticket.description.clone(),
            priority: Some(ticket.priority.to_string()),
            status: Some(ticket.status.to_string()),
            email: ticket.email.clone(),
        }
    }
}

impl TicketInput {
    /// Blank form with the default priority and status preselected.
    pub fn form_defaults() -> Self {
        Self {
            priority: Some(Priority::default().to_string()),
            status: Some(Status::default().to_string()),
            ..Self::default()
        }
    }
}

/// Comment fields as submitted, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentInput {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: String,
}

/// Syntactic email check.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

fn require(errors: &mut Vec<FieldError>, field: &str, value: &str, message: &str) -> bool {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, message));
        false
    } else {
        true
    }
}

fn max_chars(errors: &mut Vec<FieldError>, field: &str, value: &str, max: usize, message: &str) {
    if value.chars().count() > max {
        errors.push(FieldError::new(field, message));
    }
}

/// Parse a status string, rejecting anything outside the enumeration.
pub fn parse_status(value: &str) -> Result<Status, FieldError> {
    value.parse::<Status>().map_err(|_| {
        FieldError::new(
            "status",
            format!(
                "Status must be one of: {}",
                Status::ALL.map(|s| s.as_str()).join(", ")
            ),
        )
    })
}

fn parse_priority(value: &str) -> Result<Priority, FieldError> {
    value.parse::<Priority>().map_err(|_| {
        FieldError::new(
            "priority",
            format!(
                "Priority must be one of: {}",
                Priority::ALL.map(|p| p.as_str()).join(", ")
            ),
        )
    })
}

/// Validate a ticket payload, collecting every violated constraint.
pub fn validate_ticket(input: &TicketInput) -> Result<TicketDraft, Vec<FieldError>> {
    let mut errors = Vec::new();

    if require(&mut errors, "title", &input.title, "Title is required") {
        max_chars(
            &mut errors,
            "title",
            &input.title,
            TITLE_MAX_CHARS,
            "Title cannot exceed 100 characters",
        );
    }

    if require(
        &mut errors,
        "description",
        &input.description,
        "Description is required",
    ) {
        max_chars(
            &mut errors,
            "description",
            &input.description,
            DESCRIPTION_MAX_CHARS,
            "Description cannot exceed 1000 characters",
        );
    }

    let priority = match input.priority.as_deref() {
        None => Some(Priority::default()),
        Some(p) if p.trim().is_empty() => {
            errors.push(FieldError::new("priority", "Please select a priority"));
            None
        }
        Some(p) => parse_priority(p).map_err(|e| errors.push(e)).ok(),
    };

    let status = match input.status.as_deref() {
        None => Some(Status::default()),
        Some(s) if s.trim().is_empty() => {
            errors.push(FieldError::new("status", "Please select a status"));
            None
        }
        Some(s) => parse_status(s).map_err(|e| errors.push(e)).ok(),
    };

    if require(&mut errors, "email", &input.email, "Please enter your email")
        && !is_valid_email(&input.email)
    {
        errors.push(FieldError::new("email", "Invalid email address"));
    }

    match (priority, status) {
        (Some(priority), Some(status)) if errors.is_empty() => Ok(TicketDraft {
            title: input.title.clone(),
            description: input.description.clone(),
            priority,
            status,
            email: input.email.clone(),
        }),
        _ => Err(errors),
    }
}

/// Validate a comment payload.
pub fn validate_comment(input: &CommentInput) -> Result<CommentDraft, Vec<FieldError>> {
    let mut errors = Vec::new();
    require(&mut errors, "content", &input.content, "Content is required");
    require(&mut errors, "author", &input.author, "Author is required");

    if errors.is_empty() {
        Ok(CommentDraft {
            content: input.content.clone(),
            author: input.author.clone(),
        })
    } else {
        Err(errors)
    }
}
