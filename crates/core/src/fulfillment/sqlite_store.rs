use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::FulfillmentStore;
use super::types::{Fulfillment, FulfillmentFilter};
use crate::provider::ProviderSlug;
use crate::storage::{
    self, format_datetime, lock, parse_datetime, parse_enum, parse_json, parse_optional_datetime,
    StoreError,
};

const COLUMNS: &str = "id, pipeline_id, order_id, brand_id, provider, external_order_id, status, \
     provider_status, carrier, tracking_number, tracking_url, shipped_at, delivered_at, \
     estimated_delivery, cancelled_at, failure_reason, submission_uncertain, status_history, \
     version, created_at, updated_at, reference";

/// SQLite-backed fulfillment store.
pub struct SqliteFulfillmentStore {
    conn: Mutex<Connection>,
}

impl SqliteFulfillmentStore {
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
            CREATE TABLE IF NOT EXISTS fulfillments (
                id TEXT PRIMARY KEY,
                pipeline_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                brand_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                external_order_id TEXT,
                status TEXT NOT NULL,
                provider_status TEXT,
                carrier TEXT,
                tracking_number TEXT,
                tracking_url TEXT,
                shipped_at TEXT,
                delivered_at TEXT,
                estimated_delivery TEXT,
                cancelled_at TEXT,
                failure_reason TEXT,
                submission_uncertain INTEGER NOT NULL DEFAULT 0,
                status_history TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                reference TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_fulfillments_active_pipeline
                ON fulfillments(pipeline_id)
                WHERE status != 'CANCELLED';

            CREATE INDEX IF NOT EXISTS idx_fulfillments_brand ON fulfillments(brand_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_fulfillments_external
                ON fulfillments(provider, external_order_id);
            CREATE INDEX IF NOT EXISTS idx_fulfillments_tracking ON fulfillments(tracking_number);
            CREATE INDEX IF NOT EXISTS idx_fulfillments_reference ON fulfillments(reference);
            CREATE INDEX IF NOT EXISTS idx_fulfillments_status ON fulfillments(status);
            "#,
        )?;
        Ok(())
    }

    fn row_to_fulfillment(row: &Row<'_>) -> Result<Fulfillment, rusqlite::Error> {
        let provider: String = row.get(4)?;
        let status: String = row.get(6)?;
        let status_history: String = row.get(17)?;
        let created_at: String = row.get(19)?;
        let updated_at: String = row.get(20)?;

        Ok(Fulfillment {
            id: row.get(0)?,
            pipeline_id: row.get(1)?,
            order_id: row.get(2)?,
            brand_id: row.get(3)?,
            provider: parse_enum(&provider)?,
            reference: row.get(21)?,
            external_order_id: row.get(5)?,
            status: parse_enum(&status)?,
            provider_status: row.get(7)?,
            carrier: row.get(8)?,
            tracking_number: row.get(9)?,
            tracking_url: row.get(10)?,
            shipped_at: parse_optional_datetime(row.get(11)?)?,
            delivered_at: parse_optional_datetime(row.get(12)?)?,
            estimated_delivery: parse_optional_datetime(row.get(13)?)?,
            cancelled_at: parse_optional_datetime(row.get(14)?)?,
            failure_reason: row.get(15)?,
            submission_uncertain: row.get(16)?,
            status_history: parse_json(&status_history)?,
            version: row.get(18)?,
            created_at: parse_datetime(&created_at)?,
            updated_at: parse_datetime(&updated_at)?,
        })
    }

    fn query_one(
        conn: &Connection,
        condition: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<Fulfillment>, StoreError> {
        let sql = format!(
            "SELECT {} FROM fulfillments WHERE {} ORDER BY created_at DESC LIMIT 1",
            COLUMNS, condition
        );
        Ok(conn
            .query_row(&sql, params, Self::row_to_fulfillment)
            .optional()?)
    }

    fn build_where(filter: &FulfillmentFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
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
        if let Some(pipeline_id) = &filter.pipeline_id {
            conditions.push("pipeline_id = ?");
            params.push(Box::new(pipeline_id.clone()));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (clause, params)
    }
}

impl FulfillmentStore for SqliteFulfillmentStore {
    fn insert(&self, f: &Fulfillment) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            &format!(
                "INSERT INTO fulfillments ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                  ?18, ?19, ?20, ?21, ?22)",
                COLUMNS
            ),
            params![
                f.id,
                f.pipeline_id,
                f.order_id,
                f.brand_id,
                f.provider.as_str(),
                f.external_order_id,
                f.status.as_str(),
                f.provider_status,
                f.carrier,
                f.tracking_number,
                f.tracking_url,
                f.shipped_at.as_ref().map(format_datetime),
                f.delivered_at.as_ref().map(format_datetime),
                f.estimated_delivery.as_ref().map(format_datetime),
                f.cancelled_at.as_ref().map(format_datetime),
                f.failure_reason,
                f.submission_uncertain,
                serde_json::to_string(&f.status_history)?,
                f.version,
                format_datetime(&f.created_at),
                format_datetime(&f.updated_at),
                f.reference,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Fulfillment>, StoreError> {
        let conn = lock(&self.conn)?;
        Self::query_one(&conn, "id = ?1", &[&id])
    }

    fn find_active_by_pipeline(
        &self,
        pipeline_id: &str,
    ) -> Result<Option<Fulfillment>, StoreError> {
        let conn = lock(&self.conn)?;
        Self::query_one(
            &conn,
            "pipeline_id = ?1 AND status != 'CANCELLED'",
            &[&pipeline_id],
        )
    }

    fn find_by_external_order(
        &self,
        provider: ProviderSlug,
        external_order_id: &str,
    ) -> Result<Option<Fulfillment>, StoreError> {
        let conn = lock(&self.conn)?;
        Self::query_one(
            &conn,
            "provider = ?1 AND external_order_id = ?2",
            &[&provider.as_str(), &external_order_id],
        )
    }

    fn find_by_tracking_number(
        &self,
        tracking_number: &str,
    ) -> Result<Option<Fulfillment>, StoreError> {
        let conn = lock(&self.conn)?;
        Self::query_one(&conn, "tracking_number = ?1", &[&tracking_number])
    }

    fn find_by_reference(&self, reference: &str) -> Result<Option<Fulfillment>, StoreError> {
        let conn = lock(&self.conn)?;
        Self::query_one(&conn, "reference = ?1", &[&reference])
    }

    fn update(&self, f: &Fulfillment) -> Result<Fulfillment, StoreError> {
        let conn = lock(&self.conn)?;
        let now = Utc::now();

        let updated = conn.execute(
            r#"
            UPDATE fulfillments SET
                reference = ?17,
                external_order_id = ?1,
                status = ?2,
                provider_status = ?3,
                carrier = ?4,
                tracking_number = COALESCE(tracking_number, ?5),
                tracking_url = ?6,
                shipped_at = ?7,
                delivered_at = ?8,
                estimated_delivery = ?9,
                cancelled_at = ?10,
                failure_reason = ?11,
                submission_uncertain = ?12,
                status_history = ?13,
                version = version + 1,
                updated_at = ?14
            WHERE id = ?15 AND version = ?16
            "#,
            params![
                f.external_order_id,
                f.status.as_str(),
                f.provider_status,
                f.carrier,
                f.tracking_number,
                f.tracking_url,
                f.shipped_at.as_ref().map(format_datetime),
                f.delivered_at.as_ref().map(format_datetime),
                f.estimated_delivery.as_ref().map(format_datetime),
                f.cancelled_at.as_ref().map(format_datetime),
                f.failure_reason,
                f.submission_uncertain,
                serde_json::to_string(&f.status_history)?,
                format_datetime(&now),
                f.id,
                f.version,
                f.reference,
            ],
        )?;

        if updated == 0 {
            return match Self::query_one(&conn, "id = ?1", &[&f.id])? {
                Some(_) => Err(StoreError::Conflict(format!("fulfillment {}", f.id))),
                None => Err(StoreError::NotFound(f.id.clone())),
            };
        }

        Self::query_one(&conn, "id = ?1", &[&f.id])?
            .ok_or_else(|| StoreError::NotFound(f.id.clone()))
    }

    fn list(&self, filter: &FulfillmentFilter) -> Result<Vec<Fulfillment>, StoreError> {
        let conn = lock(&self.conn)?;
        let (where_clause, mut params) = Self::build_where(filter);
        let sql = format!(
            "SELECT {} FROM fulfillments {} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_fulfillment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count(&self, filter: &FulfillmentFilter) -> Result<i64, StoreError> {
        let conn = lock(&self.conn)?;
        let (where_clause, params) = Self::build_where(filter);
        let sql = format!("SELECT COUNT(*) FROM fulfillments {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }

    fn list_in_transit(&self) -> Result<Vec<Fulfillment>, StoreError> {
        let conn = lock(&self.conn)?;
        let sql = format!(
            "SELECT {} FROM fulfillments \
             WHERE status IN ('SHIPPED', 'IN_TRANSIT', 'OUT_FOR_DELIVERY') \
             ORDER BY shipped_at",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], Self::row_to_fulfillment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
