//! HTTP router construction.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api;
use crate::state::AppState;

/// ~200 MB: large delimited exports arrive as a single multipart part.
const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = match state.config.server.cors_origin.as_str() {
        "*" | "" => CorsLayer::permissive(),
        origin => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin.parse().unwrap_or_else(|_| {
                "http://localhost:3000".parse().unwrap()
            })))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    };

    Router::new()
        .route("/health", get(api::health))
        // `/pending/summary` must precede `/{id}` so "pending" is not
        // captured as a job id.
        .route("/imports/pending/summary", get(api::pending_summary))
        .route("/imports/{id}", get(api::get_import))
        .route("/imports", get(api::list_imports).post(api::create_import))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    use siphon_import::{
        ImportRegistry, ImportRuntime, LocalSourceStore, MemoryDestination, PlanTuning,
    };
    use siphon_jobs::{ImportType, JobScope, JobStore, MemoryJobStore, NewImportJob};
    use siphon_queue::MemoryQueue;

    fn test_state(dir: &std::path::Path) -> Arc<AppState> {
        let mut config = siphon_core::Config::from_env();
        config.storage.upload_dir = dir.to_path_buf();
        config.storage.chunk_dir = dir.join("chunks");

        let runtime = ImportRuntime {
            store: Arc::new(MemoryJobStore::new()),
            queue: Arc::new(MemoryQueue::new()),
            registry: Arc::new(ImportRegistry::with_builtins()),
            source: Arc::new(LocalSourceStore::new(&config.storage).unwrap()),
            sink: Arc::new(MemoryDestination::new()),
            tuning: PlanTuning::default(),
        };
        Arc::new(AppState {
            upload_dir: config.storage.upload_dir.clone(),
            runtime,
            config,
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_queue() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["queueConnected"], true);
        // The in-memory provider has no dead-letter queue.
        assert_eq!(json["dlqDepth"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_get_unknown_import_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        let response = app
            .oneshot(
                Request::get(format!("/imports/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_import_accepts_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = build_router(state.clone());

        let company_id = Uuid::new_v4();
        let boundary = "xYzBoundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"items.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n\
             Description,Amount\r\nwidget,5.0\r\n\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"companyId\"\r\n\r\n\
             {company_id}\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"importType\"\r\n\r\n\
             raw-line-items\r\n\
             --{boundary}--\r\n"
        );

        let response = app
            .oneshot(
                Request::post("/imports")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let json = body_json(response).await;
        assert_eq!(json["status"], "QUEUED");
        assert_eq!(json["companyId"], company_id.to_string());
        assert_eq!(json["importType"], "raw-line-items");

        // The parent message is on the queue and the upload exists.
        let job_id = Uuid::parse_str(json["id"].as_str().unwrap()).unwrap();
        let job = state.store().get(job_id).await.unwrap();
        assert!(std::path::Path::new(&job.source_ref).is_file());
    }

    #[tokio::test]
    async fn test_create_import_rejects_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        let boundary = "xYzBoundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"importType\"\r\n\r\n\
             raw-line-items\r\n\
             --{boundary}--\r\n"
        );
        let response = app
            .oneshot(
                Request::post("/imports")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_and_pending_summary() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = build_router(state.clone());

        let company_id = Uuid::new_v4();
        for _ in 0..2 {
            state
                .store()
                .create(NewImportJob {
                    scope: JobScope::company(company_id),
                    import_type: ImportType::PriceList,
                    source_ref: "/tmp/prices.csv".into(),
                })
                .await
                .unwrap();
        }

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/imports?companyId={company_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);

        let response = app
            .oneshot(
                Request::get(format!("/imports/pending/summary?companyId={company_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["queued"], 2);
        assert_eq!(json["running"], 0);
    }
}
