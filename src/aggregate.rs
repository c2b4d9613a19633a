use crate::catalog::Catalog;
use crate::classify::classify_index;
use crate::error::{InvalidPointError, RecordError};
use crate::point::{parse_measurement, parse_point};
use crate::types::LocatedRecord;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Count located records per region; measurements are ignored.
    CountOnly,
    /// Count and sum measurements per region. Records without a measurement
    /// are left out entirely.
    Weighted,
}

/// What one record contributes to a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Assigned { region: usize, value: f64 },
    /// Valid location outside every region.
    Unassigned,
    /// Weighted mode only: no measurement, so no data for this record.
    Excluded,
}

/// Pure per-record step: parse, classify, pair with the measurement.
pub fn evaluate(catalog: &Catalog, record: &LocatedRecord, mode: Mode) -> Result<Outcome, RecordError> {
    let value = match mode {
        Mode::CountOnly => 0.0,
        Mode::Weighted => match parse_measurement(record.measurement.as_ref())? {
            Some(v) => v,
            None => return Ok(Outcome::Excluded),
        },
    };

    let point = parse_point(record.point.as_ref())?;

    Ok(match classify_index(point, catalog) {
        Some(region) => Outcome::Assigned { region, value },
        None => Outcome::Unassigned,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tally {
    pub count: u64,
    pub sum: f64,
}

/// Running per-region counters, aligned with catalog order. Every region
/// starts at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateState {
    names: Vec<String>,
    tallies: Vec<Tally>,
}

impl AggregateState {
    pub fn new(catalog: &Catalog) -> Self {
        Self {
            names: catalog.names().map(str::to_string).collect(),
            tallies: vec![Tally::default(); catalog.len()],
        }
    }

    pub fn record(&mut self, region: usize, value: f64) {
        let tally = &mut self.tallies[region];
        tally.count += 1;
        tally.sum += value;
    }

    pub fn tally(&self, name: &str) -> Option<Tally> {
        self.names.iter().position(|n| n == name).map(|i| self.tallies[i])
    }

    /// One entry per region. Averages are rounded to two decimals; empty
    /// regions report 0.
    pub fn finalize(&self) -> RegionSummary {
        let mut averages = BTreeMap::new();
        let mut counts = BTreeMap::new();

        for (name, tally) in self.names.iter().zip(&self.tallies) {
            let average = if tally.count > 0 {
                round2(tally.sum / tally.count as f64)
            } else {
                0.0
            };
            averages.insert(name.clone(), average);
            counts.insert(name.clone(), tally.count);
        }

        RegionSummary { averages, counts }
    }
}

// Decimal rounding of the exact binary value, ties to even: 3.125 -> 3.12,
// 2.675 (stored just below) -> 2.67.
fn round2(v: f64) -> f64 {
    format!("{:.2}", v).parse().unwrap_or(v)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSummary {
    pub averages: BTreeMap<String, f64>,
    pub counts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub state: AggregateState,
    pub assigned: usize,
    pub unassigned: usize,
    pub excluded: usize,
    /// Input position and reason of every record that could not be used.
    pub skipped: Vec<(usize, RecordError)>,
}

impl BatchReport {
    pub fn finalize(&self) -> RegionSummary {
        self.state.finalize()
    }
}

/// Runs a whole batch. Records are evaluated in parallel and folded in input
/// order; a bad record is logged and skipped without touching any tally.
pub fn aggregate(catalog: &Catalog, records: &[LocatedRecord], mode: Mode) -> BatchReport {
    let outcomes: Vec<Result<Outcome, RecordError>> = records
        .par_iter()
        .map(|record| evaluate(catalog, record, mode))
        .collect();

    let mut report = BatchReport {
        state: AggregateState::new(catalog),
        assigned: 0,
        unassigned: 0,
        excluded: 0,
        skipped: Vec::new(),
    };

    for (position, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(Outcome::Assigned { region, value }) => {
                report.state.record(region, value);
                report.assigned += 1;
            }
            Ok(Outcome::Unassigned) => report.unassigned += 1,
            Ok(Outcome::Excluded) => report.excluded += 1,
            Err(err) => {
                match &err {
                    RecordError::Point(InvalidPointError::Missing) => {
                        debug!("Skipping record {}: {}", position, err)
                    }
                    _ => warn!("Skipping record {}: {}", position, err),
                }
                report.skipped.push((position, err));
            }
        }
    }

    info!(
        "Aggregated {} records: {} assigned, {} unassigned, {} excluded, {} skipped",
        records.len(),
        report.assigned,
        report.unassigned,
        report.excluded,
        report.skipped.len()
    );

    report
}
