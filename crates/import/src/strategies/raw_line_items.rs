//! Row-preserving import: every source row becomes one derived row,
//! keyed by its absolute position in the file.

use async_trait::async_trait;

use crate::error::ImportError;
use crate::partition::{chunk_count, records_per_chunk, row_ranges};
use crate::sink::DerivedRow;
use crate::source::{read_csv, write_chunk_csv};
use crate::strategy::{
    ChunkContext, ChunkOutcome, FinalizeContext, ImportPlan, ImportStrategy, PlanContext,
};

use super::{parse_amount, payload_str, payload_u64, row_object};

const DATASET: &str = "raw_line_items";

#[derive(Debug)]
pub struct RawLineItems;

#[async_trait]
impl ImportStrategy for RawLineItems {
    fn name(&self) -> &'static str {
        "raw-line-items"
    }

    async fn plan(&self, ctx: &PlanContext) -> Result<ImportPlan, ImportError> {
        let source_path = ctx.source.fetch(&ctx.job.source_ref).await?;
        let table = read_csv(&source_path)?;
        let total = table.rows.len() as u64;

        if total == 0 {
            return Ok(ImportPlan::empty(serde_json::json!({ "totalRecords": 0 })));
        }

        // Wipe before any chunk writes so a re-import fully replaces
        // the previous run's rows.
        ctx.sink.reset(DATASET, &ctx.job.scope).await?;

        let per_chunk = records_per_chunk(total, &ctx.tuning);
        let chunks = chunk_count(total, per_chunk, &ctx.tuning);
        let mut payloads = Vec::with_capacity(chunks as usize);
        for (chunk_index, (start, len)) in row_ranges(total, chunks).into_iter().enumerate() {
            let slice = &table.rows[start as usize..(start + len) as usize];
            let path = write_chunk_csv(
                ctx.source.chunk_dir(),
                ctx.job.id,
                chunk_index as u32,
                &table.headers,
                slice,
            )?;
            payloads.push(serde_json::json!({
                "path": path.to_string_lossy(),
                "startRow": start,
                "rowCount": len,
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
        let start_row = payload_u64(&ctx.payload, "startRow")?;
        let table = read_csv(std::path::Path::new(path))?;
        let amount_column = table.column("Amount");

        let scope_key = ctx.job.scope.key();
        let rows: Vec<DerivedRow> = table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| DerivedRow {
                row_key: format!("{}:{}", scope_key, start_row + i as u64),
                scope: ctx.job.scope,
                payload: row_object(&table.headers, row),
                amount: amount_column.and_then(|col| parse_amount(row.get(col))),
            })
            .collect();

        let rows_written = ctx.sink.insert_rows(DATASET, &rows).await?;
        Ok(ChunkOutcome { rows_written })
    }

    async fn finalize(&self, ctx: &FinalizeContext) -> Result<serde_json::Value, ImportError> {
        let row_count = ctx.sink.count(DATASET, &ctx.job.scope).await?;
        let total_amount = ctx.sink.sum_amount(DATASET, &ctx.job.scope).await?;
        Ok(serde_json::json!({
            "dataset": DATASET,
            "rowCount": row_count,
            "totalAmount": total_amount,
        }))
    }
}
