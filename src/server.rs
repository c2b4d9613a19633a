use crate::aggregate::{aggregate, Mode};
use crate::catalog::{BoundarySource, Catalog, CatalogCache};
use crate::error::{ApiError, CatalogLoadError};
use crate::source::RecordSource;
use crate::types::{CourseInfo, EnrollmentFilter};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared by every request. The catalog is an immutable handle resolved once
/// at startup, so reads take no lock.
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub boundary: BoundarySource,
    pub source: Arc<dyn RecordSource>,
}

impl AppState {
    pub fn new(
        catalogs: &CatalogCache,
        boundary: BoundarySource,
        source: Arc<dyn RecordSource>,
    ) -> Result<Self, CatalogLoadError> {
        Ok(Self {
            catalog: catalogs.load(&boundary)?,
            boundary,
            source,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaByRegionResponse {
    #[serde(rename = "averageGPA")]
    pub average_gpa: BTreeMap<String, f64>,
    pub student_counts: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_info: Option<CourseInfo>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/regions", get(regions_handler))
        .route("/api/students-by-region", get(students_by_region_handler))
        .route("/api/students-gpa-by-region", get(gpa_by_region_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(port: u16, state: AppState) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting server on http://{}", addr);

    let app = router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn regions_handler(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let content = tokio::fs::read_to_string(&state.boundary.path)
        .await
        .map_err(|e| ApiError::Boundary(e.to_string()))?;
    let value = serde_json::from_str(&content).map_err(|e| ApiError::Boundary(e.to_string()))?;
    Ok(Json(value))
}

async fn students_by_region_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<String, u64>>, ApiError> {
    let counts = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let records = state.source.student_locations()?;
        Ok(aggregate(&state.catalog, &records, Mode::CountOnly).finalize().counts)
    })
    .await??;

    Ok(Json(counts))
}

async fn gpa_by_region_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<EnrollmentFilter>,
) -> Result<Json<GpaByRegionResponse>, ApiError> {
    let filter = filter.normalized();

    let response = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let batch = state.source.enrollment_gpas(&filter)?;
        let summary = aggregate(&state.catalog, &batch.records, Mode::Weighted).finalize();
        Ok(GpaByRegionResponse {
            average_gpa: summary.averages,
            student_counts: summary.counts,
            course_info: batch.course,
        })
    })
    .await??;

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::{write_fixture, TWO_SQUARES};
    use crate::error::UpstreamDataError;
    use crate::source::tests::StaticSource;
    use crate::types::{EnrollmentBatch, LocatedRecord, RawMeasurement, RawPoint};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn rec(point: &str, gpa: Option<f64>) -> LocatedRecord {
        LocatedRecord::new(Some(RawPoint::Text(point.into())), gpa.map(RawMeasurement::Number))
    }

    fn state(boundary: BoundarySource, source: impl RecordSource + 'static) -> Arc<AppState> {
        Arc::new(AppState::new(&CatalogCache::new(), boundary, Arc::new(source)).unwrap())
    }

    fn sample_source() -> StaticSource {
        StaticSource {
            students: vec![
                rec("POINT(5 5)", None),
                rec("POINT(6 1)", None),
                rec("POINT(15 5)", None),
                rec("POINT(100 100)", None),
                LocatedRecord::default(),
            ],
            enrollments: EnrollmentBatch {
                records: vec![
                    rec("POINT(5 5)", Some(3.5)),
                    rec("POINT(15 5)", Some(4.0)),
                    rec("POINT(100 100)", Some(2.0)),
                    rec("garbage", Some(3.0)),
                ],
                course: Some(CourseInfo {
                    course_id: "MC1".into(),
                    course_name: "Algorithms".into(),
                }),
            },
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn counts_cover_every_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "regions.json", TWO_SQUARES);
        let app = router(state(BoundarySource::new(path, "name"), sample_source()));

        let (status, body) = get(app, "/api/students-by-region").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "A": 2, "B": 1 }));
    }

    #[tokio::test]
    async fn gpa_by_region_matches_weighted_example() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "regions.json", TWO_SQUARES);
        let app = router(state(BoundarySource::new(path, "name"), sample_source()));

        let (status, body) = get(app, "/api/students-gpa-by-region?course_id=MC1&semester_id=").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "averageGPA": { "A": 3.5, "B": 4.0 },
                "studentCounts": { "A": 1, "B": 1 },
                "courseInfo": { "courseId": "MC1", "courseName": "Algorithms" }
            })
        );
    }

    #[tokio::test]
    async fn course_info_is_omitted_without_course() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "regions.json", TWO_SQUARES);
        let mut source = sample_source();
        source.enrollments.course = None;
        let app = router(state(BoundarySource::new(path, "name"), source));

        let (_, body) = get(app, "/api/students-gpa-by-region").await;
        assert!(body.get("courseInfo").is_none());
        assert_eq!(body["studentCounts"], json!({ "A": 1, "B": 1 }));
    }

    #[tokio::test]
    async fn regions_endpoint_returns_boundary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "regions.json", TWO_SQUARES);
        let app = router(state(BoundarySource::new(path, "name"), sample_source()));

        let (status, body) = get(app, "/api/regions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "FeatureCollection");
        assert_eq!(body["features"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn broken_catalog_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "regions.json", "{ not json");
        let result = AppState::new(
            &CatalogCache::new(),
            BoundarySource::new(path, "name"),
            Arc::new(sample_source()),
        );
        assert!(matches!(result, Err(CatalogLoadError::GeoJson { .. })));
    }

    #[tokio::test]
    async fn catalog_handle_outlives_boundary_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "regions.json", TWO_SQUARES);
        let app = router(state(BoundarySource::new(path, "name"), sample_source()));

        write_fixture(dir.path(), "regions.json", "{ not json");

        let (status, body) = get(app.clone(), "/api/students-by-region").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "A": 2, "B": 1 }));

        let (status, body) = get(app, "/api/regions").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("boundary file"));
    }

    struct FailingSource;

    impl RecordSource for FailingSource {
        fn student_locations(&self) -> Result<Vec<LocatedRecord>, UpstreamDataError> {
            Err(UpstreamDataError::MissingColumn {
                path: "students.csv".into(),
                column: "geoPoint".into(),
            })
        }

        fn enrollment_gpas(&self, _filter: &EnrollmentFilter) -> Result<EnrollmentBatch, UpstreamDataError> {
            Err(UpstreamDataError::MissingColumn {
                path: "enrollments.csv".into(),
                column: "StandardizedGPA".into(),
            })
        }
    }

    #[tokio::test]
    async fn upstream_failure_returns_no_partial_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "regions.json", TWO_SQUARES);
        let app = router(state(BoundarySource::new(path, "name"), FailingSource));

        let (status, body) = get(app.clone(), "/api/students-gpa-by-region").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({ "error": "Column 'StandardizedGPA' not found in \"enrollments.csv\"" })
        );

        let (status, body) = get(app, "/api/students-by-region").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.get("A").is_none());
    }
}
