use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub boundary: MultiPolygon<f64>,
}

/// A validated planar location, in the same coordinate system as the
/// region boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

/// Location as delivered by the data source, before validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPoint {
    Pair([f64; 2]),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawMeasurement {
    Number(f64),
    Text(String),
}

/// One logical entity from the data source: where it is, and optionally a
/// value measured for it (e.g. a standardized GPA).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LocatedRecord {
    pub point: Option<RawPoint>,
    pub measurement: Option<RawMeasurement>,
}

impl LocatedRecord {
    pub fn new(point: Option<RawPoint>, measurement: Option<RawMeasurement>) -> Self {
        Self { point, measurement }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnrollmentFilter {
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub semester_id: Option<String>,
}

impl EnrollmentFilter {
    /// Empty query parameters mean "no filter".
    pub fn normalized(self) -> Self {
        fn keep(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        Self {
            course_id: keep(self.course_id),
            semester_id: keep(self.semester_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfo {
    pub course_id: String,
    pub course_name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrollmentBatch {
    pub records: Vec<LocatedRecord>,
    pub course: Option<CourseInfo>,
}
