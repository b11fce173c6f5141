use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::ReturnStore;
use super::types::{RefundStatus, ReturnFilter, ReturnRequest};
use crate::storage::{
    self, format_datetime, lock, parse_datetime, parse_enum, parse_json, parse_optional_datetime,
    StoreError,
};

const COLUMNS: &str = "id, brand_id, order_id, fulfillment_id, reason, items, status, \
     refund_status, refund_amount_cents, refunded_at, received_at, notes, version, created_at, \
     updated_at";

/// SQLite-backed return store.
pub struct SqliteReturnStore {
    conn: Mutex<Connection>,
}

impl SqliteReturnStore {
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
            CREATE TABLE IF NOT EXISTS returns (
                id TEXT PRIMARY KEY,
                brand_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                fulfillment_id TEXT,
                reason TEXT NOT NULL,
                items TEXT NOT NULL,
                status TEXT NOT NULL,
                refund_status TEXT,
                refund_amount_cents INTEGER,
                refunded_at TEXT,
                received_at TEXT,
                notes TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_returns_brand ON returns(brand_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_returns_order ON returns(order_id);
            "#,
        )?;
        Ok(())
    }

    fn row_to_return(row: &Row<'_>) -> Result<ReturnRequest, rusqlite::Error> {
        let items: String = row.get(5)?;
        let status: String = row.get(6)?;
        let refund_status: Option<String> = row.get(7)?;
        let notes: String = row.get(11)?;
        let created_at: String = row.get(13)?;
        let updated_at: String = row.get(14)?;

        Ok(ReturnRequest {
            id: row.get(0)?,
            brand_id: row.get(1)?,
            order_id: row.get(2)?,
            fulfillment_id: row.get(3)?,
            reason: row.get(4)?,
            items: parse_json(&items)?,
            status: parse_enum(&status)?,
            refund_status: refund_status
                .as_deref()
                .map(parse_enum::<RefundStatus>)
                .transpose()?,
            refund_amount_cents: row.get(8)?,
            refunded_at: parse_optional_datetime(row.get(9)?)?,
            received_at: parse_optional_datetime(row.get(10)?)?,
            notes: parse_json(&notes)?,
            version: row.get(12)?,
            created_at: parse_datetime(&created_at)?,
            updated_at: parse_datetime(&updated_at)?,
        })
    }

    fn query_one(conn: &Connection, id: &str) -> Result<Option<ReturnRequest>, StoreError> {
        let sql = format!("SELECT {} FROM returns WHERE id = ?1", COLUMNS);
        Ok(conn.query_row(&sql, [id], Self::row_to_return).optional()?)
    }

    fn build_where(filter: &ReturnFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(brand_id) = &filter.brand_id {
            conditions.push("brand_id = ?");
            params.push(Box::new(brand_id.clone()));
        }
        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }
        if let Some(order_id) = &filter.order_id {
            conditions.push("order_id = ?");
            params.push(Box::new(order_id.clone()));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (clause, params)
    }
}

impl ReturnStore for SqliteReturnStore {
    fn insert(&self, r: &ReturnRequest) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            &format!(
                "INSERT INTO returns ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                COLUMNS
            ),
            params![
                r.id,
                r.brand_id,
                r.order_id,
                r.fulfillment_id,
                r.reason,
                serde_json::to_string(&r.items)?,
                r.status.as_str(),
                r.refund_status.map(|s| s.as_str()),
                r.refund_amount_cents,
                r.refunded_at.as_ref().map(format_datetime),
                r.received_at.as_ref().map(format_datetime),
                serde_json::to_string(&r.notes)?,
                r.version,
                format_datetime(&r.created_at),
                format_datetime(&r.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<ReturnRequest>, StoreError> {
        let conn = lock(&self.conn)?;
        Self::query_one(&conn, id)
    }

    fn update(&self, r: &ReturnRequest) -> Result<ReturnRequest, StoreError> {
        let conn = lock(&self.conn)?;
        let updated = conn.execute(
            r#"
            UPDATE returns SET
                status = ?1,
                refund_status = ?2,
                refund_amount_cents = ?3,
                refunded_at = ?4,
                received_at = ?5,
                notes = ?6,
                version = version + 1,
                updated_at = ?7
            WHERE id = ?8 AND version = ?9
            "#,
            params![
                r.status.as_str(),
                r.refund_status.map(|s| s.as_str()),
                r.refund_amount_cents,
                r.refunded_at.as_ref().map(format_datetime),
                r.received_at.as_ref().map(format_datetime),
                serde_json::to_string(&r.notes)?,
                format_datetime(&Utc::now()),
                r.id,
                r.version,
            ],
        )?;

        if updated == 0 {
            return match Self::query_one(&conn, &r.id)? {
                Some(_) => Err(StoreError::Conflict(format!("return {}", r.id))),
                None => Err(StoreError::NotFound(r.id.clone())),
            };
        }
        Self::query_one(&conn, &r.id)?.ok_or_else(|| StoreError::NotFound(r.id.clone()))
    }

    fn list(&self, filter: &ReturnFilter) -> Result<Vec<ReturnRequest>, StoreError> {
        let conn = lock(&self.conn)?;
        let (where_clause, mut params) = Self::build_where(filter);
        let sql = format!(
            "SELECT {} FROM returns {} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_return)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count(&self, filter: &ReturnFilter) -> Result<i64, StoreError> {
        let conn = lock(&self.conn)?;
        let (where_clause, params) = Self::build_where(filter);
        let sql = format!("SELECT COUNT(*) FROM returns {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::returns::{NewReturn, ReturnItem, ReturnStatus};

    fn sample(brand_id: &str, order_id: &str) -> ReturnRequest {
        ReturnRequest::new(
            brand_id,
            NewReturn {
                order_id: order_id.into(),
                fulfillment_id: Some("f1".into()),
                reason: "damaged".into(),
                items: vec![ReturnItem {
                    line_item_id: "li-1".into(),
                    quantity: 1,
                }],
            },
        )
    }

    #[test]
    fn test_insert_get_and_update() {
        let store = SqliteReturnStore::in_memory().unwrap();
        let mut r = sample("b1", "o1");
        store.insert(&r).unwrap();

        let fetched = store.get(&r.id).unwrap().unwrap();
        assert_eq!(fetched.items, r.items);
        assert_eq!(fetched.fulfillment_id.as_deref(), Some("f1"));

        r.transition(ReturnStatus::Approved, Some("ok"), Utc::now()).unwrap();
        r.refund(500, Some(2500), None, Utc::now()).unwrap();
        let stored = store.update(&r).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, ReturnStatus::Refunded);
        assert_eq!(stored.refund_status, Some(RefundStatus::Partial));
        assert_eq!(stored.refund_amount_cents, Some(500));
        assert_eq!(stored.notes.len(), 1);
    }

    #[test]
    fn test_stale_update_conflicts() {
        let store = SqliteReturnStore::in_memory().unwrap();
        let mut r = sample("b1", "o1");
        store.insert(&r).unwrap();

        let stale = r.clone();
        r.transition(ReturnStatus::Approved, None, Utc::now()).unwrap();
        store.update(&r).unwrap();
        assert!(matches!(store.update(&stale), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn test_list_filters_by_brand_and_status() {
        let store = SqliteReturnStore::in_memory().unwrap();
        store.insert(&sample("b1", "o1")).unwrap();
        store.insert(&sample("b1", "o2")).unwrap();
        store.insert(&sample("b2", "o3")).unwrap();

        let filter = ReturnFilter::default().with_brand("b1");
        assert_eq!(store.list(&filter).unwrap().len(), 2);
        assert_eq!(store.count(&filter).unwrap(), 2);

        let filter = filter.with_status(ReturnStatus::Approved);
        assert_eq!(store.count(&filter).unwrap(), 0);

        let filter = ReturnFilter::default().with_order("o3");
        assert_eq!(store.list(&filter).unwrap()[0].brand_id, "b2");
    }
}
