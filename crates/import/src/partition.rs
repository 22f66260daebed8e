//! Chunk sizing and record partitioning helpers.

use sha2::{Digest, Sha256};

use crate::strategy::PlanTuning;

/// Baseline chunk size, stepped down for large sources so more chunks
/// run in parallel.
const RECORDS_PER_CHUNK_BASE: u32 = 8_000;
const RECORDS_PER_CHUNK_LARGE: u32 = 4_000;
const RECORDS_PER_CHUNK_HUGE: u32 = 2_500;
const LARGE_SOURCE_THRESHOLD: u64 = 20_000;
const HUGE_SOURCE_THRESHOLD: u64 = 50_000;

/// Target records per chunk for a source of `total_records` rows.
pub fn records_per_chunk(total_records: u64, tuning: &PlanTuning) -> u32 {
    if let Some(explicit) = tuning.records_per_chunk {
        return explicit.max(1);
    }
    if total_records > HUGE_SOURCE_THRESHOLD {
        RECORDS_PER_CHUNK_HUGE
    } else if total_records > LARGE_SOURCE_THRESHOLD {
        RECORDS_PER_CHUNK_LARGE
    } else {
        RECORDS_PER_CHUNK_BASE
    }
}

/// Number of chunks for a source, capped at `tuning.max_chunks`.
/// Returns 0 only for an empty source.
pub fn chunk_count(total_records: u64, per_chunk: u32, tuning: &PlanTuning) -> u32 {
    if total_records == 0 {
        return 0;
    }
    let per_chunk = per_chunk.max(1) as u64;
    let ideal = total_records.div_ceil(per_chunk);
    ideal.min(tuning.max_chunks.max(1) as u64) as u32
}

/// Split `total` records into `chunks` contiguous `(start, len)`
/// ranges differing in length by at most one.
pub fn row_ranges(total: u64, chunks: u32) -> Vec<(u64, u64)> {
    if total == 0 || chunks == 0 {
        return Vec::new();
    }
    let chunks = chunks as u64;
    let base = total / chunks;
    let remainder = total % chunks;
    let mut ranges = Vec::with_capacity(chunks as usize);
    let mut start = 0;
    for i in 0..chunks {
        let len = base + u64::from(i < remainder);
        ranges.push((start, len));
        start += len;
    }
    ranges
}

/// Stable bucket assignment for a grouping key. Equal keys always land
/// in the same bucket, which lets group-aggregating strategies keep a
/// whole group inside one chunk.
pub fn hash_bucket(key: &str, buckets: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let word = u64::from_be_bytes(digest[..8].try_into().unwrap());
    (word % buckets.max(1) as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_per_chunk_steps_down_for_large_sources() {
        let tuning = PlanTuning::default();
        assert_eq!(records_per_chunk(1_000, &tuning), 8_000);
        assert_eq!(records_per_chunk(20_000, &tuning), 8_000);
        assert_eq!(records_per_chunk(30_000, &tuning), 4_000);
        assert_eq!(records_per_chunk(80_000, &tuning), 2_500);
    }

    #[test]
    fn test_records_per_chunk_honors_override() {
        let tuning = PlanTuning { records_per_chunk: Some(500), max_chunks: 16 };
        assert_eq!(records_per_chunk(80_000, &tuning), 500);
    }

    #[test]
    fn test_chunk_count_is_capped() {
        let tuning = PlanTuning::default();
        assert_eq!(chunk_count(0, 8_000, &tuning), 0);
        assert_eq!(chunk_count(100, 8_000, &tuning), 1);
        assert_eq!(chunk_count(16_001, 8_000, &tuning), 3);
        // 200k records at 2500/chunk would be 80 chunks; capped at 16.
        assert_eq!(chunk_count(200_000, 2_500, &tuning), 16);
    }

    #[test]
    fn test_row_ranges_cover_all_rows() {
        let ranges = row_ranges(10, 3);
        assert_eq!(ranges, vec![(0, 4), (4, 3), (7, 3)]);

        let total: u64 = row_ranges(1_000, 7).iter().map(|(_, len)| len).sum();
        assert_eq!(total, 1_000);
    }

    #[test]
    fn test_hash_bucket_is_stable_and_in_range() {
        let a = hash_bucket("WIDGET-01", 8);
        assert_eq!(a, hash_bucket("WIDGET-01", 8));
        assert!(a < 8);
        assert_eq!(hash_bucket("anything", 1), 0);
    }
}
