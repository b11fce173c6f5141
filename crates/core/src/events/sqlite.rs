use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::{EventFilter, EventLog, EventRecord};
use crate::storage::{self, format_datetime, lock, parse_datetime, parse_json, StoreError};

/// SQLite-backed event log
pub struct SqliteEventLog {
    conn: Mutex<Connection>,
}

impl SqliteEventLog {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = storage::open(path.as_ref())?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory event log (useful for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS domain_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                brand_id TEXT,
                pipeline_id TEXT,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_domain_events_timestamp ON domain_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_domain_events_brand ON domain_events(brand_id);
            CREATE INDEX IF NOT EXISTS idx_domain_events_pipeline ON domain_events(pipeline_id);
            CREATE INDEX IF NOT EXISTS idx_domain_events_type ON domain_events(event_type);
            "#,
        )?;
        Ok(())
    }

    fn build_where_clause(filter: &EventFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref brand_id) = filter.brand_id {
            conditions.push("brand_id = ?");
            params.push(Box::new(brand_id.clone()));
        }

        if let Some(ref pipeline_id) = filter.pipeline_id {
            conditions.push("pipeline_id = ?");
            params.push(Box::new(pipeline_id.clone()));
        }

        if let Some(ref event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.to_ascii_uppercase()));
        }

        if let Some(ref from) = filter.from {
            conditions.push("timestamp >= ?");
            params.push(Box::new(format_datetime(from)));
        }

        if let Some(ref to) = filter.to {
            conditions.push("timestamp <= ?");
            params.push(Box::new(format_datetime(to)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl EventLog for SqliteEventLog {
    fn append(&self, record: &EventRecord) -> Result<i64, StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO domain_events (timestamp, event_type, brand_id, pipeline_id, data) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                format_datetime(&record.timestamp),
                record.event_type,
                record.brand_id,
                record.pipeline_id,
                serde_json::to_string(&record.data)?,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, StoreError> {
        let conn = lock(&self.conn)?;
        let (where_clause, mut params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT id, timestamp, event_type, brand_id, pipeline_id, data FROM domain_events {} \
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );
        params.push(Box::new(if filter.limit > 0 { filter.limit } else { 100 }));
        params.push(Box::new(filter.offset));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let records = stmt
            .query_map(param_refs.as_slice(), |row| {
                let timestamp: String = row.get(1)?;
                let data: String = row.get(5)?;
                Ok(EventRecord {
                    id: row.get(0)?,
                    timestamp: parse_datetime(&timestamp)?,
                    event_type: row.get(2)?,
                    brand_id: row.get(3)?,
                    pipeline_id: row.get(4)?,
                    data: parse_json(&data)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn count(&self, filter: &EventFilter) -> Result<i64, StoreError> {
        let conn = lock(&self.conn)?;
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM domain_events {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }
}
