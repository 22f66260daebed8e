//! Price list import: one derived row per item code, last occurrence
//! wins. Price lists are small so planning always yields one chunk.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ImportError;
use crate::sink::DerivedRow;
use crate::source::{read_csv, write_chunk_csv};
use crate::strategy::{
    ChunkContext, ChunkOutcome, FinalizeContext, ImportPlan, ImportStrategy, PlanContext,
};

use super::{parse_amount, payload_str, row_object};

const DATASET: &str = "price_list";
const ITEM_COLUMN: &str = "Item Code";
const PRICE_COLUMN: &str = "Unit Price";

#[derive(Debug)]
pub struct PriceList;

#[async_trait]
impl ImportStrategy for PriceList {
    fn name(&self) -> &'static str {
        "price-list"
    }

    async fn plan(&self, ctx: &PlanContext) -> Result<ImportPlan, ImportError> {
        let source_path = ctx.source.fetch(&ctx.job.source_ref).await?;
        let table = read_csv(&source_path)?;
        let total = table.rows.len() as u64;

        if total == 0 {
            return Ok(ImportPlan::empty(serde_json::json!({ "totalRecords": 0 })));
        }
        for column in [ITEM_COLUMN, PRICE_COLUMN] {
            if table.column(column).is_none() {
                return Err(ImportError::Strategy(format!(
                    "source is missing a '{column}' column"
                )));
            }
        }

        ctx.sink.reset(DATASET, &ctx.job.scope).await?;

        let path = write_chunk_csv(
            ctx.source.chunk_dir(),
            ctx.job.id,
            0,
            &table.headers,
            &table.rows,
        )?;
        Ok(ImportPlan {
            meta: serde_json::json!({ "totalRecords": total }),
            chunks: vec![serde_json::json!({ "path": path.to_string_lossy() })],
        })
    }

    async fn import_chunk(&self, ctx: &ChunkContext) -> Result<ChunkOutcome, ImportError> {
        let path = payload_str(&ctx.payload, "path")?;
        let table = read_csv(std::path::Path::new(path))?;
        let item_column = table.column(ITEM_COLUMN).ok_or_else(|| {
            ImportError::Strategy(format!("chunk file is missing a '{ITEM_COLUMN}' column"))
        })?;
        let price_column = table.column(PRICE_COLUMN);

        // Last occurrence of an item code wins.
        let mut latest: BTreeMap<String, (serde_json::Value, Option<f64>)> = BTreeMap::new();
        for row in &table.rows {
            let code = row.get(item_column).map(String::as_str).unwrap_or("").trim();
            if code.is_empty() {
                continue;
            }
            let price = price_column.and_then(|col| parse_amount(row.get(col)));
            latest.insert(code.to_string(), (row_object(&table.headers, row), price));
        }

        let scope_key = ctx.job.scope.key();
        let rows: Vec<DerivedRow> = latest
            .into_iter()
            .map(|(code, (payload, price))| DerivedRow {
                row_key: format!("{scope_key}:{code}"),
                scope: ctx.job.scope,
                payload,
                amount: price,
            })
            .collect();

        let rows_written = ctx.sink.insert_rows(DATASET, &rows).await?;
        Ok(ChunkOutcome { rows_written })
    }

    async fn finalize(&self, ctx: &FinalizeContext) -> Result<serde_json::Value, ImportError> {
        let item_count = ctx.sink.count(DATASET, &ctx.job.scope).await?;
        Ok(serde_json::json!({
            "dataset": DATASET,
            "itemCount": item_count,
        }))
    }
}
