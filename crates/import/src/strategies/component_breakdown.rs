//! Group-aggregating import: source rows are grouped by their `Code`
//! column and each group collapses into one aggregate row.
//!
//! Partitioning hashes the code so every occurrence of a code lands in
//! the same chunk, which lets each chunk compute complete aggregates
//! without cross-chunk coordination.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ImportError;
use crate::partition::{chunk_count, hash_bucket, records_per_chunk};
use crate::sink::DerivedRow;
use crate::source::{read_csv, write_chunk_csv};
use crate::strategy::{
    ChunkContext, ChunkOutcome, FinalizeContext, ImportPlan, ImportStrategy, PlanContext,
};

use super::{parse_amount, payload_str};

const DATASET: &str = "component_breakdown";
const CODE_COLUMN: &str = "Code";

#[derive(Debug)]
pub struct ComponentBreakdown;

#[async_trait]
impl ImportStrategy for ComponentBreakdown {
    fn name(&self) -> &'static str {
        "component-breakdown"
    }

    async fn plan(&self, ctx: &PlanContext) -> Result<ImportPlan, ImportError> {
        let source_path = ctx.source.fetch(&ctx.job.source_ref).await?;
        let table = read_csv(&source_path)?;
        let total = table.rows.len() as u64;

        if total == 0 {
            return Ok(ImportPlan::empty(serde_json::json!({ "totalRecords": 0 })));
        }
        let code_column = table.column(CODE_COLUMN).ok_or_else(|| {
            ImportError::Strategy(format!("source is missing a '{CODE_COLUMN}' column"))
        })?;

        ctx.sink.reset(DATASET, &ctx.job.scope).await?;

        let per_chunk = records_per_chunk(total, &ctx.tuning);
        let buckets = chunk_count(total, per_chunk, &ctx.tuning);
        let mut grouped: BTreeMap<u32, Vec<Vec<String>>> = BTreeMap::new();
        for row in &table.rows {
            let code = row.get(code_column).map(String::as_str).unwrap_or("");
            grouped
                .entry(hash_bucket(code, buckets))
                .or_default()
                .push(row.clone());
        }

        // Some buckets can come out empty; chunk indexes must still be
        // dense, so they are assigned by position here.
        let mut payloads = Vec::with_capacity(grouped.len());
        for (chunk_index, rows) in grouped.into_values().enumerate() {
            let path = write_chunk_csv(
                ctx.source.chunk_dir(),
                ctx.job.id,
                chunk_index as u32,
                &table.headers,
                &rows,
            )?;
            payloads.push(serde_json::json!({
                "path": path.to_string_lossy(),
                "rowCount": rows.len(),
            }));
        }

        Ok(ImportPlan {
            meta: serde_json::json!({
                "totalRecords": total,
                "recordsPerChunk": per_chunk,
            }),
            chunks: payloads,
        })
    }

    async fn import_chunk(&self, ctx: &ChunkContext) -> Result<ChunkOutcome, ImportError> {
        let path = payload_str(&ctx.payload, "path")?;
        let table = read_csv(std::path::Path::new(path))?;
        let code_column = table.column(CODE_COLUMN).ok_or_else(|| {
            ImportError::Strategy(format!("chunk file is missing a '{CODE_COLUMN}' column"))
        })?;
        let amount_column = table.column("Amount");

        struct Aggregate {
            occurrences: u64,
            total_amount: f64,
        }
        let mut aggregates: BTreeMap<String, Aggregate> = BTreeMap::new();
        for row in &table.rows {
            let code = row.get(code_column).map(String::as_str).unwrap_or("").trim();
            if code.is_empty() {
                continue;
            }
            let amount = amount_column
                .and_then(|col| parse_amount(row.get(col)))
                .unwrap_or(0.0);
            let entry = aggregates
                .entry(code.to_string())
                .or_insert(Aggregate { occurrences: 0, total_amount: 0.0 });
            entry.occurrences += 1;
            entry.total_amount += amount;
        }

        let scope_key = ctx.job.scope.key();
        let rows: Vec<DerivedRow> = aggregates
            .into_iter()
            .map(|(code, aggregate)| DerivedRow {
                row_key: format!("{scope_key}:{code}"),
                scope: ctx.job.scope,
                payload: serde_json::json!({
                    "code": code,
                    "occurrences": aggregate.occurrences,
                    "totalAmount": aggregate.total_amount,
                }),
                amount: Some(aggregate.total_amount),
            })
            .collect();

        let rows_written = ctx.sink.insert_rows(DATASET, &rows).await?;
        Ok(ChunkOutcome { rows_written })
    }

    async fn finalize(&self, ctx: &FinalizeContext) -> Result<serde_json::Value, ImportError> {
        let component_count = ctx.sink.count(DATASET, &ctx.job.scope).await?;
        let total_amount = ctx.sink.sum_amount(DATASET, &ctx.job.scope).await?;
        Ok(serde_json::json!({
            "dataset": DATASET,
            "componentCount": component_count,
            "totalAmount": total_amount,
        }))
    }
}
