use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::store::OrderStore;
use super::types::OrderSnapshot;
use crate::storage::{self, format_datetime, lock, parse_json, StoreError};

/// SQLite-backed order store. The snapshot is kept as a JSON document.
pub struct SqliteOrderStore {
    conn: Mutex<Connection>,
}

impl SqliteOrderStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = storage::open(path.as_ref())?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

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
            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                brand_id TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl OrderStore for SqliteOrderStore {
    fn record(&self, order: &OrderSnapshot) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            r#"
            INSERT INTO orders (order_id, brand_id, snapshot, recorded_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(order_id) DO UPDATE SET
                brand_id = excluded.brand_id,
                snapshot = excluded.snapshot,
                recorded_at = excluded.recorded_at
            "#,
            params![
                order.order_id,
                order.brand_id,
                serde_json::to_string(order)?,
                format_datetime(&chrono::Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn get(&self, order_id: &str) -> Result<Option<OrderSnapshot>, StoreError> {
        let conn = lock(&self.conn)?;
        let snapshot: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM orders WHERE order_id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()?;
        snapshot
            .map(|s| parse_json(&s).map_err(StoreError::from))
            .transpose()
    }
}
