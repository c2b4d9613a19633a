use crate::error::UpstreamDataError;
use crate::types::{CourseInfo, EnrollmentBatch, EnrollmentFilter, LocatedRecord, RawMeasurement, RawPoint};
use csv::{ByteRecord, ReaderBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// The external store the engine reads records from.
pub trait RecordSource: Send + Sync {
    /// One record per student: location only.
    fn student_locations(&self) -> Result<Vec<LocatedRecord>, UpstreamDataError>;

    /// One record per matching enrollment: the student's location and the
    /// enrollment's standardized GPA.
    fn enrollment_gpas(&self, filter: &EnrollmentFilter) -> Result<EnrollmentBatch, UpstreamDataError>;
}

const STUDENT_ID: &str = "StudentID";
const GEO_POINT: &str = "geoPoint";
const SEMESTER_ID: &str = "SemesterID";
const COURSE_ID: &str = "CourseID";
const COURSE_NAME: &str = "CourseName";
const GPA: &str = "StandardizedGPA";

/// Tabular export of the graph store: a students file and an enrollments
/// file, joined on `StudentID`.
#[derive(Debug, Clone)]
pub struct CsvExport {
    students_csv: PathBuf,
    enrollments_csv: PathBuf,
}

impl CsvExport {
    pub fn new(students_csv: impl Into<PathBuf>, enrollments_csv: impl Into<PathBuf>) -> Self {
        Self {
            students_csv: students_csv.into(),
            enrollments_csv: enrollments_csv.into(),
        }
    }

    fn student_points(&self) -> Result<HashMap<String, Option<RawPoint>>, UpstreamDataError> {
        let table = read_table(&self.students_csv, &[STUDENT_ID, GEO_POINT])?;
        Ok(table
            .rows
            .iter()
            .map(|row| {
                let id = field(row, table.col[STUDENT_ID]).unwrap_or_default();
                let point = field(row, table.col[GEO_POINT]).map(RawPoint::Text);
                (id, point)
            })
            .collect())
    }
}

impl RecordSource for CsvExport {
    fn student_locations(&self) -> Result<Vec<LocatedRecord>, UpstreamDataError> {
        let table = read_table(&self.students_csv, &[GEO_POINT])?;
        let records: Vec<LocatedRecord> = table
            .rows
            .iter()
            .map(|row| {
                let point = field(row, table.col[GEO_POINT]).map(RawPoint::Text);
                LocatedRecord::new(point, None)
            })
            .collect();
        info!("Read {} student locations from {:?}", records.len(), self.students_csv);
        Ok(records)
    }

    fn enrollment_gpas(&self, filter: &EnrollmentFilter) -> Result<EnrollmentBatch, UpstreamDataError> {
        let points = self.student_points()?;
        let table = read_table(
            &self.enrollments_csv,
            &[STUDENT_ID, SEMESTER_ID, COURSE_ID, COURSE_NAME, GPA],
        )?;

        let mut batch = EnrollmentBatch::default();

        for row in &table.rows {
            let course_id = field(row, table.col[COURSE_ID]);
            if let Some(wanted) = &filter.semester_id {
                if field(row, table.col[SEMESTER_ID]).as_deref() != Some(wanted.as_str()) {
                    continue;
                }
            }
            if let Some(wanted) = &filter.course_id {
                if course_id.as_deref() != Some(wanted.as_str()) {
                    continue;
                }
                if batch.course.is_none() {
                    batch.course = Some(CourseInfo {
                        course_id: wanted.clone(),
                        course_name: field(row, table.col[COURSE_NAME]).unwrap_or_default(),
                    });
                }
            }

            let point = field(row, table.col[STUDENT_ID])
                .and_then(|id| points.get(&id))
                .cloned()
                .flatten();
            let gpa = field(row, table.col[GPA]).map(RawMeasurement::Text);
            batch.records.push(LocatedRecord::new(point, gpa));
        }

        info!(
            "Read {} enrollments from {:?} (course: {:?}, semester: {:?})",
            batch.records.len(),
            self.enrollments_csv,
            filter.course_id,
            filter.semester_id
        );
        Ok(batch)
    }
}

struct Table {
    col: HashMap<&'static str, usize>,
    rows: Vec<ByteRecord>,
}

fn read_table(path: &Path, required: &[&'static str]) -> Result<Table, UpstreamDataError> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|source| UpstreamDataError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let read_error = |source| UpstreamDataError::Read {
        path: path.to_path_buf(),
        source,
    };

    let headers = rdr.headers().map_err(read_error)?.clone();

    let mut col = HashMap::new();
    for &name in required {
        let idx = headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| UpstreamDataError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })?;
        col.insert(name, idx);
    }

    // Rows stay as bytes so one badly encoded cell only spoils its own
    // record, not the whole read.
    let rows = rdr
        .byte_records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_error)?;

    Ok(Table { col, rows })
}

// Blank cells are treated as null. Invalid UTF-8 is replaced with U+FFFD,
// which can never parse as a coordinate or a number, so such a cell fails
// validation downstream.
fn field(row: &ByteRecord, idx: usize) -> Option<String> {
    row.get(idx)
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
        .filter(|s| !s.is_empty())
}
