//! SQLite-backed ticket store implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    Comment, CommentDraft, Priority, Status, StatusChange, Ticket, TicketDraft, TicketError,
    TicketFilter, TicketStore,
};

const TICKET_COLUMNS: &str =
    "t.id, t.title, t.description, t.priority, t.status, t.email, t.created_at, t.updated_at, t.version";

const COMMENT_COLUMNS: &str = "c.id, c.ticket_id, c.content, c.author, c.created_at";

/// SQLite-backed ticket store.
pub struct SqliteTicketStore {
    conn: Mutex<Connection>,
}

impl SqliteTicketStore {
    /// Create a new SQLite ticket store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, TicketError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite ticket store (useful for testing).
    pub fn in_memory() -> Result<Self, TicketError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TicketError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'Medium',
                status TEXT NOT NULL DEFAULT 'Open',
                email TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT,
                version INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_id INTEGER NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                author TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_created_at ON tickets(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
            CREATE INDEX IF NOT EXISTS idx_tickets_priority ON tickets(priority);
            CREATE INDEX IF NOT EXISTS idx_comments_ticket_id ON comments(ticket_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TicketError> {
        self.conn
            .lock()
            .map_err(|_| TicketError::Database("ticket store lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &TicketFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        // instr() is case-sensitive, unlike LIKE
        if let Some(search) = filter.search_term() {
            conditions.push(
                "(instr(t.title, ?) > 0 OR instr(t.description, ?) > 0 OR instr(t.email, ?) > 0)",
            );
            for _ in 0..3 {
                params.push(Box::new(search.to_string()));
            }
        }

        if let Some(status) = filter.status_term() {
            conditions.push("t.status = ?");
            params.push(Box::new(status.to_string()));
        }

        if let Some(priority) = filter.priority_term() {
            conditions.push("t.priority = ?");
            params.push(Box::new(priority.to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<Ticket> {
        let priority: String = row.get(3)?;
        let status: String = row.get(4)?;
        let created_at: String = row.get(6)?;
        let updated_at: Option<String> = row.get(7)?;

        Ok(Ticket {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            priority: priority
                .parse::<Priority>()
                .map_err(|e| conversion_error(3, e))?,
            status: status.parse::<Status>().map_err(|e| conversion_error(4, e))?,
            email: row.get(5)?,
            created_at: parse_timestamp(6, &created_at)?,
            updated_at: updated_at
                .map(|ts| parse_timestamp(7, &ts))
                .transpose()?,
            version: row.get(8)?,
            comments: Vec::new(),
        })
    }

    fn row_to_comment(row: &rusqlite::Row) -> rusqlite::Result<Comment> {
        let created_at: String = row.get(4)?;
        Ok(Comment {
            id: row.get(0)?,
            ticket_id: row.get(1)?,
            content: row.get(2)?,
            author: row.get(3)?,
            created_at: parse_timestamp(4, &created_at)?,
        })
    }

    fn load(conn: &Connection, id: i64) -> Result<Option<Ticket>, TicketError> {
        let ticket = conn
            .query_row(
                &format!("SELECT {} FROM tickets t WHERE t.id = ?", TICKET_COLUMNS),
                params![id],
                Self::row_to_ticket,
            )
            .optional()?;

        let Some(mut ticket) = ticket else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM comments c WHERE c.ticket_id = ? ORDER BY c.created_at ASC, c.id ASC",
            COMMENT_COLUMNS
        ))?;
        ticket.comments = stmt
            .query_map(params![id], Self::row_to_comment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(ticket))
    }

    fn load_existing(conn: &Connection, id: i64) -> Result<Ticket, TicketError> {
        Self::load(conn, id)?.ok_or(TicketError::NotFound(id))
    }

    /// Explain why a version-guarded write touched no rows.
    fn rejected_write(conn: &Connection, id: i64, expected: i64) -> TicketError {
        let current: Result<Option<i64>, _> = conn
            .query_row(
                "SELECT version FROM tickets WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional();

        match current {
            Ok(None) => TicketError::NotFound(id),
            Ok(Some(actual)) => TicketError::Conflict {
                ticket_id: id,
                expected,
                actual,
            },
            Err(e) => TicketError::from(e),
        }
    }
}

fn now() -> DateTime<Utc> {
    // Stored with microsecond precision; truncate so returned values match reloads.
    Utc::now().trunc_subsecs(6)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

impl TicketStore for SqliteTicketStore {
    fn create(&self, draft: TicketDraft) -> Result<Ticket, TicketError> {
        let conn = self.lock()?;
        let created_at = now();

        conn.execute(
            "INSERT INTO tickets (title, description, priority, status, email, created_at, version) VALUES (?, ?, ?, ?, ?, ?, 1)",
            params![
                draft.title,
                draft.description,
                draft.priority.as_str(),
                draft.status.as_str(),
                draft.email,
                format_timestamp(&created_at),
            ],
        )?;

        Ok(Ticket {
            id: conn.last_insert_rowid(),
            title: draft.title,
            description: draft.description,
            priority: draft.priority,
            status: draft.status,
            email: draft.email,
            created_at,
            updated_at: None,
            version: 1,
            comments: Vec::new(),
        })
    }

    fn get(&self, id: i64) -> Result<Option<Ticket>, TicketError> {
        let conn = self.lock()?;
        Self::load(&conn, id)
    }

    fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, TicketError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let sql = format!(
            "SELECT {} FROM tickets t {} ORDER BY t.created_at DESC, t.id DESC",
            TICKET_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut tickets = stmt
            .query_map(param_refs.as_slice(), Self::row_to_ticket)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // Comments for every matching ticket in one pass
        let sql = format!(
            "SELECT {} FROM comments c JOIN tickets t ON t.id = c.ticket_id {} ORDER BY c.created_at ASC, c.id ASC",
            COMMENT_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut by_ticket: HashMap<i64, Vec<Comment>> = HashMap::new();
        for comment in stmt.query_map(param_refs.as_slice(), Self::row_to_comment)? {
            let comment = comment?;
            by_ticket.entry(comment.ticket_id).or_default().push(comment);
        }

        for ticket in &mut tickets {
            ticket.comments = by_ticket.remove(&ticket.id).unwrap_or_default();
        }

        Ok(tickets)
    }

    fn count(&self, filter: &TicketFilter) -> Result<i64, TicketError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let sql = format!("SELECT COUNT(*) FROM tickets t {}", where_clause);
        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;

        Ok(count)
    }

    fn update(
        &self,
        id: i64,
        expected_version: i64,
        draft: TicketDraft,
    ) -> Result<Ticket, TicketError> {
        let conn = self.lock()?;
        let updated_at = now();

        let changed = conn.execute(
            "UPDATE tickets SET title = ?, description = ?, priority = ?, status = ?, email = ?, updated_at = ?, version = version + 1 WHERE id = ? AND version = ?",
            params![
                draft.title,
                draft.description,
                draft.priority.as_str(),
                draft.status.as_str(),
                draft.email,
                format_timestamp(&updated_at),
                id,
                expected_version,
            ],
        )?;

        if changed == 0 {
            return Err(Self::rejected_write(&conn, id, expected_version));
        }

        Self::load_existing(&conn, id)
    }

    fn update_status(
        &self,
        id: i64,
        expected_version: Option<i64>,
        status: Status,
    ) -> Result<StatusChange, TicketError> {
        let conn = self.lock()?;

        let current = conn
            .query_row(
                "SELECT status, version FROM tickets WHERE id = ?",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        let Some((previous, version)) = current else {
            return Err(TicketError::NotFound(id));
        };
        if let Some(expected) = expected_version.filter(|&v| v != version) {
            return Err(TicketError::Conflict {
                ticket_id: id,
                expected,
                actual: version,
            });
        }
        let previous = previous
            .parse::<Status>()
            .map_err(|e| TicketError::from(conversion_error(0, e)))?;

        let changed = conn.execute(
            "UPDATE tickets SET status = ?, updated_at = ?, version = version + 1 WHERE id = ? AND version = ?",
            params![status.as_str(), format_timestamp(&now()), id, version],
        )?;
        if changed == 0 {
            return Err(Self::rejected_write(&conn, id, version));
        }

        Ok(StatusChange {
            ticket: Self::load_existing(&conn, id)?,
            previous,
        })
    }

    fn delete(&self, id: i64) -> Result<Option<Ticket>, TicketError> {
        let conn = self.lock()?;

        let Some(ticket) = Self::load(&conn, id)? else {
            return Ok(None);
        };

        // Comments go with it via ON DELETE CASCADE
        conn.execute("DELETE FROM tickets WHERE id = ?", params![id])?;

        Ok(Some(ticket))
    }

    fn add_comment(&self, ticket_id: i64, draft: CommentDraft) -> Result<Comment, TicketError> {
        let conn = self.lock()?;

        let exists = conn
            .query_row(
                "SELECT 1 FROM tickets WHERE id = ?",
                params![ticket_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(TicketError::NotFound(ticket_id));
        }

        let created_at = now();
        conn.execute(
            "INSERT INTO comments (ticket_id, content, author, created_at) VALUES (?, ?, ?, ?)",
            params![
                ticket_id,
                draft.content,
                draft.author,
                format_timestamp(&created_at)
            ],
        )?;

        Ok(Comment {
            id: conn.last_insert_rowid(),
            ticket_id,
            content: draft.content,
            author: draft.author,
            created_at,
        })
    }
}
