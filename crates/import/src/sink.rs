//! Destination store for derived rows.
//!
//! Imports are wipe-then-insert: the planner resets the dataset for
//! the job's scope, then chunks insert with conflict-skip so a
//! redelivered chunk re-inserting the same keys is harmless.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;

use siphon_jobs::JobScope;

use crate::error::ImportError;

/// One derived row produced by a chunk import.
#[derive(Debug, Clone)]
pub struct DerivedRow {
    /// Unique within a dataset; strategies namespace it by scope so
    /// tenants never collide.
    pub row_key: String,
    pub scope: JobScope,
    pub payload: serde_json::Value,
    pub amount: Option<f64>,
}

#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Delete every row in `dataset` belonging to `scope`.
    async fn reset(&self, dataset: &str, scope: &JobScope) -> Result<u64, ImportError>;

    /// Insert rows, skipping keys that already exist. Returns the
    /// number actually inserted.
    async fn insert_rows(&self, dataset: &str, rows: &[DerivedRow]) -> Result<u64, ImportError>;

    async fn count(&self, dataset: &str, scope: &JobScope) -> Result<u64, ImportError>;

    async fn sum_amount(&self, dataset: &str, scope: &JobScope) -> Result<f64, ImportError>;
}

fn scope_matches(row: &JobScope, scope: &JobScope) -> bool {
    row.company_id == scope.company_id
        && scope.project_id.map_or(true, |p| row.project_id == Some(p))
}

/// Process-local destination for development and tests.
#[derive(Default)]
pub struct MemoryDestination {
    datasets: Mutex<HashMap<String, HashMap<String, DerivedRow>>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a dataset's rows, for test assertions.
    pub fn rows(&self, dataset: &str) -> Vec<DerivedRow> {
        let datasets = self.datasets.lock().unwrap_or_else(|e| e.into_inner());
        datasets
            .get(dataset)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DestinationStore for MemoryDestination {
    async fn reset(&self, dataset: &str, scope: &JobScope) -> Result<u64, ImportError> {
        let mut datasets = self.datasets.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = datasets.get_mut(dataset) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|_, row| !scope_matches(&row.scope, scope));
        Ok((before - rows.len()) as u64)
    }

    async fn insert_rows(&self, dataset: &str, rows: &[DerivedRow]) -> Result<u64, ImportError> {
        let mut datasets = self.datasets.lock().unwrap_or_else(|e| e.into_inner());
        let existing = datasets.entry(dataset.to_string()).or_default();
        let mut inserted = 0;
        for row in rows {
            if !existing.contains_key(&row.row_key) {
                existing.insert(row.row_key.clone(), row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn count(&self, dataset: &str, scope: &JobScope) -> Result<u64, ImportError> {
        let datasets = self.datasets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(datasets
            .get(dataset)
            .map(|rows| {
                rows.values()
                    .filter(|row| scope_matches(&row.scope, scope))
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn sum_amount(&self, dataset: &str, scope: &JobScope) -> Result<f64, ImportError> {
        let datasets = self.datasets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(datasets
            .get(dataset)
            .map(|rows| {
                rows.values()
                    .filter(|row| scope_matches(&row.scope, scope))
                    .filter_map(|row| row.amount)
                    .sum()
            })
            .unwrap_or(0.0))
    }
}

/// Postgres destination over the `import_rows` table.
pub struct PgDestination {
    pool: PgPool,
}

impl PgDestination {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn sink_err(e: sqlx::Error) -> ImportError {
    ImportError::Sink(e.to_string())
}

#[async_trait]
impl DestinationStore for PgDestination {
    async fn reset(&self, dataset: &str, scope: &JobScope) -> Result<u64, ImportError> {
        let result = sqlx::query(
            "DELETE FROM import_rows \
             WHERE dataset = $1 AND company_id = $2 \
               AND ($3::uuid IS NULL OR project_id = $3)",
        )
        .bind(dataset)
        .bind(scope.company_id)
        .bind(scope.project_id)
        .execute(&self.pool)
        .await
        .map_err(sink_err)?;
        Ok(result.rows_affected())
    }

    async fn insert_rows(&self, dataset: &str, rows: &[DerivedRow]) -> Result<u64, ImportError> {
        let mut tx = self.pool.begin().await.map_err(sink_err)?;
        let mut inserted = 0;
        for row in rows {
            let result = sqlx::query(
                "INSERT INTO import_rows \
                 (dataset, row_key, company_id, project_id, payload, amount) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (dataset, row_key) DO NOTHING",
            )
            .bind(dataset)
            .bind(&row.row_key)
            .bind(row.scope.company_id)
            .bind(row.scope.project_id)
            .bind(&row.payload)
            .bind(row.amount)
            .execute(&mut *tx)
            .await
            .map_err(sink_err)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(sink_err)?;
        Ok(inserted)
    }

    async fn count(&self, dataset: &str, scope: &JobScope) -> Result<u64, ImportError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM import_rows \
             WHERE dataset = $1 AND company_id = $2 \
               AND ($3::uuid IS NULL OR project_id = $3)",
        )
        .bind(dataset)
        .bind(scope.company_id)
        .bind(scope.project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(sink_err)?;
        Ok(count.max(0) as u64)
    }

    async fn sum_amount(&self, dataset: &str, scope: &JobScope) -> Result<f64, ImportError> {
        let (sum,): (Option<f64>,) = sqlx::query_as(
            "SELECT sum(amount) FROM import_rows \
             WHERE dataset = $1 AND company_id = $2 \
               AND ($3::uuid IS NULL OR project_id = $3)",
        )
        .bind(dataset)
        .bind(scope.company_id)
        .bind(scope.project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(sink_err)?;
        Ok(sum.unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn row(scope: JobScope, key: &str, amount: f64) -> DerivedRow {
        DerivedRow {
            row_key: key.to_string(),
            scope,
            payload: serde_json::json!({"key": key}),
            amount: Some(amount),
        }
    }

    #[tokio::test]
    async fn test_insert_skips_existing_keys() {
        let sink = MemoryDestination::new();
        let scope = JobScope::company(Uuid::new_v4());
        let rows = vec![row(scope, "a:1", 1.0), row(scope, "a:2", 2.0)];

        assert_eq!(sink.insert_rows("items", &rows).await.unwrap(), 2);
        // Redelivered chunk writes the same keys again.
        assert_eq!(sink.insert_rows("items", &rows).await.unwrap(), 0);
        assert_eq!(sink.count("items", &scope).await.unwrap(), 2);
        assert_eq!(sink.sum_amount("items", &scope).await.unwrap(), 3.0);
    }

    #[tokio::test]
    async fn test_reset_only_touches_matching_scope() {
        let sink = MemoryDestination::new();
        let ours = JobScope::company(Uuid::new_v4());
        let theirs = JobScope::company(Uuid::new_v4());

        sink.insert_rows("items", &[row(ours, "a:1", 1.0)]).await.unwrap();
        sink.insert_rows("items", &[row(theirs, "b:1", 5.0)]).await.unwrap();

        assert_eq!(sink.reset("items", &ours).await.unwrap(), 1);
        assert_eq!(sink.count("items", &ours).await.unwrap(), 0);
        assert_eq!(sink.count("items", &theirs).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_project_scope_is_narrower_than_company() {
        let sink = MemoryDestination::new();
        let company = Uuid::new_v4();
        let project_scope = JobScope::project(company, Uuid::new_v4());
        let company_scope = JobScope::company(company);

        sink.insert_rows("items", &[row(project_scope, "p:1", 1.0)])
            .await
            .unwrap();
        sink.insert_rows("items", &[row(company_scope, "c:1", 1.0)])
            .await
            .unwrap();

        // Project scope sees only its own row; company scope sees both.
        assert_eq!(sink.count("items", &project_scope).await.unwrap(), 1);
        assert_eq!(sink.count("items", &company_scope).await.unwrap(), 2);
    }
}
