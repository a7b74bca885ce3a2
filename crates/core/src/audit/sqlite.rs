use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ToSql};

use super::{AuditError, AuditEventKind, AuditFilter, AuditOrder, AuditRecord, AuditStore};

/// Audit log kept in the same SQLite database as the tickets.
///
/// The log outlives the tickets it describes: deleting a ticket leaves its
/// history in place.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, AuditError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                kind TEXT NOT NULL,
                ticket_id INTEGER,
                actor TEXT,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_log_ticket ON audit_log(ticket_id, recorded_at);
            CREATE INDEX IF NOT EXISTS idx_audit_log_kind ON audit_log(kind);
            CREATE INDEX IF NOT EXISTS idx_audit_log_actor ON audit_log(actor);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn
            .lock()
            .map_err(|_| AuditError::Database("audit log lock poisoned".to_string()))
    }

    fn where_clause(filter: &AuditFilter) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ticket_id) = filter.ticket_id {
            conditions.push("ticket_id = ?".to_string());
            params.push(Box::new(ticket_id));
        }

        if !filter.kinds.is_empty() {
            let slots = vec!["?"; filter.kinds.len()].join(", ");
            conditions.push(format!("kind IN ({})", slots));
            params.extend(
                filter
                    .kinds
                    .iter()
                    .map(|kind| Box::new(kind.as_str()) as Box<dyn ToSql>),
            );
        }

        if let Some(ref actor) = filter.actor {
            conditions.push("actor = ?".to_string());
            params.push(Box::new(actor.clone()));
        }

        if let Some(since) = filter.since {
            conditions.push("recorded_at >= ?".to_string());
            params.push(Box::new(format_timestamp(&since)));
        }

        if let Some(until) = filter.until {
            conditions.push("recorded_at <= ?".to_string());
            params.push(Box::new(format_timestamp(&until)));
        }

        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), params)
        }
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AuditRecord> {
        let recorded_at: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let payload: String = row.get(5)?;

        Ok(AuditRecord {
            id: row.get(0)?,
            timestamp: DateTime::parse_from_rfc3339(&recorded_at)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| conversion_error(1, e))?,
            event_type: kind
                .parse::<AuditEventKind>()
                .map_err(|e| conversion_error(2, e))?,
            ticket_id: row.get(3)?,
            actor: row.get(4)?,
            data: serde_json::from_str(&payload).map_err(|e| conversion_error(5, e))?,
        })
    }
}

/// Fixed width, so text order is chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

impl AuditStore for SqliteAuditStore {
    fn append(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO audit_log (recorded_at, kind, ticket_id, actor, payload) VALUES (?, ?, ?, ?, ?)",
            )?;
            for record in records {
                let payload = serde_json::to_string(&record.data)
                    .map_err(|e| AuditError::Serialization(e.to_string()))?;
                insert.execute(params![
                    format_timestamp(&record.timestamp),
                    record.event_type.as_str(),
                    record.ticket_id,
                    record.actor,
                    payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.lock()?;

        let (where_clause, mut params) = Self::where_clause(filter);
        let direction = match filter.order {
            AuditOrder::NewestFirst => "DESC",
            AuditOrder::OldestFirst => "ASC",
        };
        let sql = format!(
            "SELECT id, recorded_at, kind, ticket_id, actor, payload FROM audit_log {} ORDER BY recorded_at {dir}, id {dir} LIMIT ? OFFSET ?",
            where_clause,
            dir = direction
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(param_refs.as_slice(), Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::where_clause(filter);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let sql = format!("SELECT COUNT(*) FROM audit_log {}", where_clause);
        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEvent;
    use chrono::Duration;

    fn status_changed(ticket_id: i64, actor: &str, to: &str) -> AuditRecord {
        AuditRecord::new(
            Utc::now(),
            AuditEvent::TicketStatusChanged {
                ticket_id,
                changed_by: actor.to_string(),
                from_status: "Open".to_string(),
                to_status: to.to_string(),
            },
        )
    }

    fn comment_added(ticket_id: i64, actor: &str) -> AuditRecord {
        AuditRecord::new(
            Utc::now(),
            AuditEvent::CommentAdded {
                ticket_id,
                comment_id: 1,
                added_by: actor.to_string(),
                author: "Dana".to_string(),
            },
        )
    }

    fn started() -> AuditRecord {
        AuditRecord::new(
            Utc::now(),
            AuditEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc123".to_string(),
            },
        )
    }

    fn seeded() -> SqliteAuditStore {
        let store = SqliteAuditStore::in_memory().unwrap();
        store
            .append(&[
                started(),
                status_changed(1, "alice", "In Progress"),
                comment_added(1, "bob"),
                status_changed(2, "alice", "Closed"),
                status_changed(1, "bob", "Resolved"),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_append_assigns_ids_and_keeps_payload() {
        let store = seeded();
        let records = store.query(&AuditFilter::default()).unwrap();

        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.id > 0));
        assert_eq!(records[0].event_type, AuditEventKind::TicketStatusChanged);
        assert!(matches!(
            records[0].data,
            AuditEvent::TicketStatusChanged { ref to_status, .. } if to_status == "Resolved"
        ));
    }

    #[test]
    fn test_ticket_history_is_oldest_first() {
        let store = seeded();
        let history = store.query(&AuditFilter::ticket_history(1)).unwrap();

        let kinds: Vec<_> = history.iter().map(|r| r.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                AuditEventKind::TicketStatusChanged,
                AuditEventKind::CommentAdded,
                AuditEventKind::TicketStatusChanged,
            ]
        );
        assert_eq!(history[2].actor.as_deref(), Some("bob"));
    }

    #[test]
    fn test_filter_by_kind_set() {
        let store = seeded();
        let filter = AuditFilter {
            kinds: vec![AuditEventKind::CommentAdded, AuditEventKind::ServiceStarted],
            ..AuditFilter::default()
        };
        assert_eq!(store.count(&filter).unwrap(), 2);

        let history_comments = AuditFilter {
            kinds: vec![AuditEventKind::CommentAdded],
            ..AuditFilter::ticket_history(2)
        };
        assert!(store.query(&history_comments).unwrap().is_empty());
    }

    #[test]
    fn test_filter_by_actor() {
        let store = seeded();
        let filter = AuditFilter {
            actor: Some("alice".to_string()),
            ..AuditFilter::default()
        };
        let records = store.query(&filter).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.actor.as_deref() == Some("alice")));
    }

    #[test]
    fn test_filter_by_time_window() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let now = Utc::now();
        let mut old = started();
        old.timestamp = now - Duration::hours(2);
        store.append(&[old, started()]).unwrap();

        let recent = AuditFilter {
            since: Some(now - Duration::hours(1)),
            ..AuditFilter::default()
        };
        assert_eq!(store.count(&recent).unwrap(), 1);

        let earlier = AuditFilter {
            until: Some(now - Duration::hours(1)),
            ..AuditFilter::default()
        };
        assert_eq!(store.count(&earlier).unwrap(), 1);
    }

    #[test]
    fn test_pagination_does_not_change_count() {
        let store = seeded();
        let filter = AuditFilter {
            limit: 2,
            offset: 4,
            ..AuditFilter::default()
        };
        assert_eq!(store.query(&filter).unwrap().len(), 1);
        assert_eq!(store.count(&filter).unwrap(), 5);
    }

    #[test]
    fn test_log_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("helpdesk.db");

        SqliteAuditStore::new(&db_path)
            .unwrap()
            .append(&[comment_added(4, "carol")])
            .unwrap();

        let reopened = SqliteAuditStore::new(&db_path).unwrap();
        let history = reopened.query(&AuditFilter::ticket_history(4)).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].actor.as_deref(), Some("carol"));
    }
}
