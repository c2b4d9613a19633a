use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// The boundary dataset could not be turned into a complete catalog.
#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("Failed to open boundary file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse GeoJSON {path:?}: {message}")]
    GeoJson { path: PathBuf, message: String },

    #[error("Failed to read Shapefile {path:?}: {message}")]
    Shapefile { path: PathBuf, message: String },

    #[error("Unsupported boundary format: {0:?}")]
    UnsupportedFormat(PathBuf),

    #[error("Boundary GeoJSON must be a FeatureCollection")]
    NotAFeatureCollection,

    /// Feature at `index` has no usable name property.
    #[error("Feature #{index} has no '{property}' name")]
    MissingName { index: usize, property: String },

    #[error("Region '{0}' appears more than once")]
    DuplicateRegion(String),

    #[error("Region '{name}' has invalid geometry: {reason}")]
    InvalidGeometry { name: String, reason: String },

    #[error("Boundary dataset {0:?} contains no regions")]
    Empty(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidPointError {
    #[error("point is missing")]
    Missing,

    #[error("point {0:?} is not of the form POINT(x y)")]
    Malformed(String),

    #[error("point coordinate {0:?} is not a finite number")]
    BadCoordinate(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("measurement {0:?} is not a finite number")]
pub struct InvalidMeasurementError(pub String);

/// Why a single record was left out of a batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error(transparent)]
    Point(#[from] InvalidPointError),

    #[error(transparent)]
    Measurement(#[from] InvalidMeasurementError),
}

/// The external data source failed as a whole; no record was classified.
#[derive(Debug, Error)]
pub enum UpstreamDataError {
    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Column '{column}' not found in {path:?}")]
    MissingColumn { path: PathBuf, column: String },
}

/// Errors surfaced by the HTTP layer. Each carries a descriptive message and
/// never a partial aggregate.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Upstream(#[from] UpstreamDataError),

    #[error("Failed to read boundary file: {0}")]
    Boundary(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!("{}", self);
        let body = Json(json!({ "error": self.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
