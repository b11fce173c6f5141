use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::{InsertOutcome, PipelineStats, PipelineStore};
use super::types::{Pipeline, PipelineFilter, PipelineStatus, RenderedArtifact};
use crate::storage::{
    self, format_datetime, is_constraint_violation, lock, parse_datetime, parse_enum, parse_json,
    parse_optional_datetime, StoreError,
};

const COLUMNS: &str = "id, order_id, brand_id, current_stage, status, options, stage_history, \
     errors, artifacts, cancel_reason, version, created_at, updated_at, completed_at, cancelled_at";

/// SQLite-backed pipeline store.
pub struct SqlitePipelineStore {
    conn: Mutex<Connection>,
}

impl SqlitePipelineStore {
    /// Open (or create) the store at `path`.
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
            CREATE TABLE IF NOT EXISTS pipelines (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                brand_id TEXT NOT NULL,
                current_stage TEXT NOT NULL,
                status TEXT NOT NULL,
                options TEXT NOT NULL,
                stage_history TEXT NOT NULL,
                errors TEXT NOT NULL,
                artifacts TEXT NOT NULL DEFAULT '[]',
                cancel_reason TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                cancelled_at TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_pipelines_active_order
                ON pipelines(order_id)
                WHERE status NOT IN ('COMPLETED', 'CANCELLED');

            CREATE INDEX IF NOT EXISTS idx_pipelines_brand ON pipelines(brand_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_pipelines_status ON pipelines(status);
            "#,
        )?;
        Ok(())
    }

    fn row_to_pipeline(row: &Row<'_>) -> Result<Pipeline, rusqlite::Error> {
        let current_stage: String = row.get(3)?;
        let status: String = row.get(4)?;
        let options: String = row.get(5)?;
        let stage_history: String = row.get(6)?;
        let errors: String = row.get(7)?;
        let artifacts: String = row.get(8)?;
        let created_at: String = row.get(11)?;
        let updated_at: String = row.get(12)?;

        Ok(Pipeline {
            id: row.get(0)?,
            order_id: row.get(1)?,
            brand_id: row.get(2)?,
            current_stage: parse_enum(&current_stage)?,
            status: parse_enum(&status)?,
            options: parse_json(&options)?,
            stage_history: parse_json(&stage_history)?,
            errors: parse_json(&errors)?,
            artifacts: parse_json(&artifacts)?,
            cancel_reason: row.get(9)?,
            version: row.get(10)?,
            created_at: parse_datetime(&created_at)?,
            updated_at: parse_datetime(&updated_at)?,
            completed_at: parse_optional_datetime(row.get(13)?)?,
            cancelled_at: parse_optional_datetime(row.get(14)?)?,
        })
    }

    fn get_with(conn: &Connection, id: &str) -> Result<Option<Pipeline>, StoreError> {
        let sql = format!("SELECT {} FROM pipelines WHERE id = ?1", COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_pipeline)
            .optional()?)
    }

    fn find_active_with(conn: &Connection, order_id: &str) -> Result<Option<Pipeline>, StoreError> {
        let sql = format!(
            "SELECT {} FROM pipelines WHERE order_id = ?1 \
             AND status NOT IN ('COMPLETED', 'CANCELLED')",
            COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![order_id], Self::row_to_pipeline)
            .optional()?)
    }

    fn build_where(filter: &PipelineFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
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
        if let Some(stage) = filter.stage {
            conditions.push("current_stage = ?");
            params.push(Box::new(stage.as_str()));
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

impl PipelineStore for SqlitePipelineStore {
    fn insert_if_absent(&self, pipeline: &Pipeline) -> Result<InsertOutcome, StoreError> {
        let conn = lock(&self.conn)?;

        if let Some(existing) = Self::find_active_with(&conn, &pipeline.order_id)? {
            return Ok(InsertOutcome::Existing(existing));
        }

        let result = conn.execute(
            &format!(
                "INSERT INTO pipelines ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                COLUMNS
            ),
            params![
                pipeline.id,
                pipeline.order_id,
                pipeline.brand_id,
                pipeline.current_stage.as_str(),
                pipeline.status.as_str(),
                serde_json::to_string(&pipeline.options)?,
                serde_json::to_string(&pipeline.stage_history)?,
                serde_json::to_string(&pipeline.errors)?,
                serde_json::to_string(&pipeline.artifacts)?,
                pipeline.cancel_reason,
                pipeline.version,
                format_datetime(&pipeline.created_at),
                format_datetime(&pipeline.updated_at),
                pipeline.completed_at.as_ref().map(format_datetime),
                pipeline.cancelled_at.as_ref().map(format_datetime),
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Created(pipeline.clone())),
            // Another process inserted between our check and the insert.
            Err(e) if is_constraint_violation(&e) => {
                match Self::find_active_with(&conn, &pipeline.order_id)? {
                    Some(existing) => Ok(InsertOutcome::Existing(existing)),
                    None => Err(StoreError::Conflict(format!(
                        "pipeline for order {}",
                        pipeline.order_id
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Pipeline>, StoreError> {
        let conn = lock(&self.conn)?;
        Self::get_with(&conn, id)
    }

    fn find_active_by_order(&self, order_id: &str) -> Result<Option<Pipeline>, StoreError> {
        let conn = lock(&self.conn)?;
        Self::find_active_with(&conn, order_id)
    }

    fn update(&self, pipeline: &Pipeline) -> Result<Pipeline, StoreError> {
        let conn = lock(&self.conn)?;
        let now = Utc::now();

        let updated = conn.execute(
            r#"
            UPDATE pipelines SET
                current_stage = ?1,
                status = ?2,
                options = ?3,
                stage_history = ?4,
                errors = ?5,
                cancel_reason = ?6,
                version = version + 1,
                updated_at = ?7,
                completed_at = ?8,
                cancelled_at = ?9
            WHERE id = ?10 AND version = ?11
            "#,
            params![
                pipeline.current_stage.as_str(),
                pipeline.status.as_str(),
                serde_json::to_string(&pipeline.options)?,
                serde_json::to_string(&pipeline.stage_history)?,
                serde_json::to_string(&pipeline.errors)?,
                pipeline.cancel_reason,
                format_datetime(&now),
                pipeline.completed_at.as_ref().map(format_datetime),
                pipeline.cancelled_at.as_ref().map(format_datetime),
                pipeline.id,
                pipeline.version,
            ],
        )?;

        if updated == 0 {
            return match Self::get_with(&conn, &pipeline.id)? {
                Some(_) => Err(StoreError::Conflict(format!("pipeline {}", pipeline.id))),
                None => Err(StoreError::NotFound(pipeline.id.clone())),
            };
        }

        Self::get_with(&conn, &pipeline.id)?
            .ok_or_else(|| StoreError::NotFound(pipeline.id.clone()))
    }

    fn record_artifacts(
        &self,
        id: &str,
        artifacts: &[RenderedArtifact],
    ) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        let updated = conn.execute(
            "UPDATE pipelines SET artifacts = ?1 WHERE id = ?2",
            params![serde_json::to_string(artifacts)?, id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn list(&self, filter: &PipelineFilter) -> Result<Vec<Pipeline>, StoreError> {
        let conn = lock(&self.conn)?;
        let (where_clause, mut params) = Self::build_where(filter);
        let sql = format!(
            "SELECT {} FROM pipelines {} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let pipelines = stmt
            .query_map(param_refs.as_slice(), Self::row_to_pipeline)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pipelines)
    }

    fn count(&self, filter: &PipelineFilter) -> Result<i64, StoreError> {
        let conn = lock(&self.conn)?;
        let (where_clause, params) = Self::build_where(filter);
        let sql = format!("SELECT COUNT(*) FROM pipelines {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }

    fn stats(&self, brand_id: Option<&str>) -> Result<PipelineStats, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stats = PipelineStats::default();

        let mut stmt = conn.prepare(
            "SELECT status, current_stage, COUNT(*) FROM pipelines \
             WHERE (?1 IS NULL OR brand_id = ?1) GROUP BY status, current_stage",
        )?;
        let rows = stmt.query_map(params![brand_id], |row| {
            let status: String = row.get(0)?;
            let stage: String = row.get(1)?;
            let count: i64 = row.get(2)?;
            Ok((parse_enum::<PipelineStatus>(&status)?, stage, count))
        })?;

        for row in rows {
            let (status, stage, count) = row?;
            stats.total += count;
            match status {
                PipelineStatus::Pending => stats.pending += count,
                PipelineStatus::InProgress => stats.in_progress += count,
                PipelineStatus::Completed => stats.completed += count,
                PipelineStatus::Failed => stats.failed += count,
                PipelineStatus::Cancelled => stats.cancelled += count,
            }
            if !status.is_terminal() {
                *stats.active_by_stage.entry(stage).or_insert(0) += count;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{apply_advance, apply_cancel, PipelineOptions, PipelineStage};

    fn create_store() -> SqlitePipelineStore {
        SqlitePipelineStore::in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let store = create_store();
        let pipeline = Pipeline::new(
            "o1",
            "b1",
            PipelineOptions {
                skip_render: true,
                ..Default::default()
            },
        );

        let outcome = store.insert_if_absent(&pipeline).unwrap();
        assert!(matches!(outcome, InsertOutcome::Created(_)));

        let fetched = store.get(&pipeline.id).unwrap().unwrap();
        assert_eq!(fetched.order_id, "o1");
        assert_eq!(fetched.brand_id, "b1");
        assert!(fetched.options.skip_render);
        assert_eq!(fetched.stage_history.len(), 1);
        assert_eq!(fetched.version, 0);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = create_store();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_insert_if_absent_returns_existing_active() {
        let store = create_store();
        let first = Pipeline::new("o1", "b1", PipelineOptions::default());
        store.insert_if_absent(&first).unwrap();

        let second = Pipeline::new("o1", "b1", PipelineOptions::default());
        let outcome = store.insert_if_absent(&second).unwrap();
        match outcome {
            InsertOutcome::Existing(existing) => assert_eq!(existing.id, first.id),
            InsertOutcome::Created(_) => panic!("duplicate pipeline created"),
        }
        assert_eq!(store.count(&PipelineFilter::new()).unwrap(), 1);
    }

    #[test]
    fn test_new_pipeline_allowed_after_terminal() {
        let store = create_store();
        let first = Pipeline::new("o1", "b1", PipelineOptions::default());
        store.insert_if_absent(&first).unwrap();

        let mut cancelled = store.get(&first.id).unwrap().unwrap();
        apply_cancel(&mut cancelled, "test", Utc::now()).unwrap();
        store.update(&cancelled).unwrap();

        let second = Pipeline::new("o1", "b1", PipelineOptions::default());
        let outcome = store.insert_if_absent(&second).unwrap();
        assert!(matches!(outcome, InsertOutcome::Created(_)));
    }

    #[test]
    fn test_update_compare_and_swap() {
        let store = create_store();
        let pipeline = Pipeline::new("o1", "b1", PipelineOptions::default());
        store.insert_if_absent(&pipeline).unwrap();

        let mut a = store.get(&pipeline.id).unwrap().unwrap();
        let mut b = a.clone();

        apply_advance(&mut a, PipelineStage::Render, "worker-a", Utc::now());
        let stored = store.update(&a).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.current_stage, PipelineStage::Render);

        apply_advance(&mut b, PipelineStage::Render, "worker-b", Utc::now());
        let result = store.update(&b);
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let fetched = store.get(&pipeline.id).unwrap().unwrap();
        assert_eq!(fetched.stage_history.last().unwrap().trigger, "worker-a");
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let store = create_store();
        let pipeline = Pipeline::new("o1", "b1", PipelineOptions::default());
        assert!(matches!(
            store.update(&pipeline),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_record_artifacts_does_not_bump_version() {
        let store = create_store();
        let pipeline = Pipeline::new("o1", "b1", PipelineOptions::default());
        store.insert_if_absent(&pipeline).unwrap();

        let artifacts = vec![RenderedArtifact {
            line_item_id: "li-1".to_string(),
            file_url: "https://files.example.com/li-1.png".to_string(),
            rendered_at: Utc::now(),
        }];
        store.record_artifacts(&pipeline.id, &artifacts).unwrap();

        let fetched = store.get(&pipeline.id).unwrap().unwrap();
        assert_eq!(fetched.artifacts, artifacts);
        assert_eq!(fetched.version, 0);

        // A later transition keeps the artifacts intact.
        let mut advanced = fetched.clone();
        apply_advance(&mut advanced, PipelineStage::Render, "worker", Utc::now());
        let stored = store.update(&advanced).unwrap();
        assert_eq!(stored.artifacts.len(), 1);
    }

    #[test]
    fn test_list_with_filters_and_pagination() {
        let store = create_store();
        for i in 0..5 {
            let brand = if i % 2 == 0 { "b1" } else { "b2" };
            store
                .insert_if_absent(&Pipeline::new(
                    &format!("o{}", i),
                    brand,
                    PipelineOptions::default(),
                ))
                .unwrap();
        }

        let b1 = store.list(&PipelineFilter::new().with_brand("b1")).unwrap();
        assert_eq!(b1.len(), 3);
        assert!(b1.iter().all(|p| p.brand_id == "b1"));

        let page = store
            .list(&PipelineFilter::new().with_limit(2).with_offset(1))
            .unwrap();
        assert_eq!(page.len(), 2);

        let pending = store
            .count(&PipelineFilter::new().with_status(PipelineStatus::Pending))
            .unwrap();
        assert_eq!(pending, 5);
    }

    #[test]
    fn test_stats() {
        let store = create_store();
        let a = Pipeline::new("o1", "b1", PipelineOptions::default());
        let b = Pipeline::new("o2", "b1", PipelineOptions::default());
        let c = Pipeline::new("o3", "b2", PipelineOptions::default());
        for p in [&a, &b, &c] {
            store.insert_if_absent(p).unwrap();
        }

        let mut cancelled = store.get(&b.id).unwrap().unwrap();
        apply_cancel(&mut cancelled, "test", Utc::now()).unwrap();
        store.update(&cancelled).unwrap();

        let stats = store.stats(Some("b1")).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.active_by_stage.get("VALIDATION"), Some(&1));

        let all = store.stats(None).unwrap();
        assert_eq!(all.total, 3);
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.db");
        let pipeline = Pipeline::new("o1", "b1", PipelineOptions::default());

        {
            let store = SqlitePipelineStore::new(&path).unwrap();
            store.insert_if_absent(&pipeline).unwrap();
        }

        let store = SqlitePipelineStore::new(&path).unwrap();
        assert!(store.get(&pipeline.id).unwrap().is_some());
    }
}
