//! Source file access: uploaded exports on local disk or in S3, plus
//! the CSV helpers strategies use to slice them into chunk files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tracing::info;
use uuid::Uuid;

use siphon_core::config::{AwsConfig, StorageConfig};

use crate::error::ImportError;

/// Resolves a job's `source_ref` to a readable local file and owns the
/// scratch directory chunk files are written into.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Make the source available locally, downloading if remote.
    async fn fetch(&self, source_ref: &str) -> Result<PathBuf, ImportError>;

    fn chunk_dir(&self) -> &Path;
}

/// Sources are already local paths (uploads written by the API
/// server). The default backend.
pub struct LocalSourceStore {
    chunk_dir: PathBuf,
}

impl LocalSourceStore {
    pub fn new(config: &StorageConfig) -> Result<Self, ImportError> {
        std::fs::create_dir_all(&config.chunk_dir)
            .map_err(|e| ImportError::Source(format!("create chunk dir: {e}")))?;
        Ok(Self { chunk_dir: config.chunk_dir.clone() })
    }

    #[cfg(test)]
    pub fn with_chunk_dir(chunk_dir: PathBuf) -> Self {
        Self { chunk_dir }
    }
}

#[async_trait]
impl SourceStore for LocalSourceStore {
    async fn fetch(&self, source_ref: &str) -> Result<PathBuf, ImportError> {
        let path = PathBuf::from(source_ref);
        if !path.is_file() {
            return Err(ImportError::Source(format!(
                "source file not found: {source_ref}"
            )));
        }
        Ok(path)
    }

    fn chunk_dir(&self) -> &Path {
        &self.chunk_dir
    }
}

/// Sources live in S3 under `s3://bucket/key` refs and are downloaded
/// into the scratch directory before planning.
pub struct ObjectSourceStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    download_dir: PathBuf,
    chunk_dir: PathBuf,
}

impl ObjectSourceStore {
    pub fn new(aws: &AwsConfig, storage: &StorageConfig) -> Result<Self, ImportError> {
        let bucket = aws
            .s3_bucket
            .as_deref()
            .ok_or_else(|| ImportError::Source("S3_BUCKET not set".into()))?;

        let mut builder = AmazonS3Builder::new().with_region(&aws.region);
        if let Some(ref key) = aws.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = aws.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref token) = aws.session_token {
            builder = builder.with_token(token);
        }
        if let Some(ref endpoint) = aws.endpoint_url {
            // object_store requires absolute endpoint URLs
            let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://")
            {
                endpoint.clone()
            } else {
                format!("https://{endpoint}")
            };
            builder = builder
                .with_bucket_name(bucket)
                .with_endpoint(&endpoint_url)
                .with_allow_http(endpoint_url.starts_with("http://"));
        } else {
            builder = builder.with_url(format!("s3://{bucket}"));
        }
        let store = builder
            .build()
            .map_err(|e| ImportError::Source(format!("s3 builder: {e}")))?;

        std::fs::create_dir_all(&storage.chunk_dir)
            .map_err(|e| ImportError::Source(format!("create chunk dir: {e}")))?;
        info!(bucket, "source store: s3 backend");

        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
            download_dir: storage.upload_dir.clone(),
            chunk_dir: storage.chunk_dir.clone(),
        })
    }
}

#[async_trait]
impl SourceStore for ObjectSourceStore {
    async fn fetch(&self, source_ref: &str) -> Result<PathBuf, ImportError> {
        let key = source_ref
            .strip_prefix(&format!("s3://{}/", self.bucket))
            .or_else(|| source_ref.strip_prefix("s3://"))
            .unwrap_or(source_ref);

        let object = self
            .store
            .get(&ObjectPath::from(key))
            .await
            .map_err(|e| ImportError::Source(format!("fetch {source_ref}: {e}")))?;
        let bytes = object
            .bytes()
            .await
            .map_err(|e| ImportError::Source(format!("read {source_ref}: {e}")))?;

        std::fs::create_dir_all(&self.download_dir)
            .map_err(|e| ImportError::Source(format!("create download dir: {e}")))?;
        let local = self
            .download_dir
            .join(format!("download-{}.csv", Uuid::new_v4()));
        tokio::fs::write(&local, &bytes)
            .await
            .map_err(|e| ImportError::Source(format!("write {}: {e}", local.display())))?;
        Ok(local)
    }

    fn chunk_dir(&self) -> &Path {
        &self.chunk_dir
    }
}

/// A parsed delimited-text source: header row plus data records.
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Index of a named column, case-insensitive.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
    }
}

pub fn read_csv(path: &Path) -> Result<CsvTable, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| ImportError::Source(format!("open {}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| ImportError::Source(format!("headers in {}: {e}", path.display())))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| ImportError::Source(format!("row in {}: {e}", path.display())))?;
        rows.push(record.iter().map(|f| f.to_string()).collect());
    }
    Ok(CsvTable { headers, rows })
}

/// Materialize one chunk's rows as a CSV file under
/// `<chunk_dir>/<job_id>/chunk-<index>.csv`.
pub fn write_chunk_csv(
    chunk_dir: &Path,
    job_id: Uuid,
    chunk_index: u32,
    headers: &[String],
    rows: &[Vec<String>],
) -> Result<PathBuf, ImportError> {
    let job_dir = chunk_dir.join(job_id.to_string());
    std::fs::create_dir_all(&job_dir)
        .map_err(|e| ImportError::Source(format!("create {}: {e}", job_dir.display())))?;

    let path = job_dir.join(format!("chunk-{chunk_index}.csv"));
    let mut writer = csv::Writer::from_path(&path)
        .map_err(|e| ImportError::Source(format!("create {}: {e}", path.display())))?;
    writer
        .write_record(headers)
        .map_err(|e| ImportError::Source(format!("write {}: {e}", path.display())))?;
    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| ImportError::Source(format!("write {}: {e}", path.display())))?;
    }
    writer
        .flush()
        .map_err(|e| ImportError::Source(format!("flush {}: {e}", path.display())))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_roundtrip_through_chunk_file() {
        let dir = tempfile::tempdir().unwrap();
        let headers = vec!["Code".to_string(), "Amount".to_string()];
        let rows = vec![
            vec!["A-1".to_string(), "10.5".to_string()],
            vec!["B-2".to_string(), "3".to_string()],
        ];
        let job_id = Uuid::new_v4();
        let path = write_chunk_csv(dir.path(), job_id, 0, &headers, &rows).unwrap();
        assert!(path.ends_with(format!("{job_id}/chunk-0.csv")));

        let table = read_csv(&path).unwrap();
        assert_eq!(table.headers, headers);
        assert_eq!(table.rows, rows);
        assert_eq!(table.column("amount"), Some(1));
        assert_eq!(table.column("missing"), None);
    }

    #[tokio::test]
    async fn test_local_fetch_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalSourceStore::with_chunk_dir(dir.path().to_path_buf());
        let err = store.fetch("/nonexistent/file.csv").await.unwrap_err();
        assert!(matches!(err, ImportError::Source(_)));
        assert!(!err.is_transient());
    }
}
