use crate::error::{InvalidMeasurementError, InvalidPointError};
use crate::types::{Coordinate, RawMeasurement, RawPoint};

const ENVELOPE_OPEN: &str = "POINT(";
const ENVELOPE_CLOSE: &str = ")";

/// Validates a raw location.
///
/// Text must be exactly `POINT(x y)`: the envelope, then two whitespace
/// separated numbers. Anything else (other WKT types, an SRID prefix, extra
/// tokens) is rejected rather than guessed at.
pub fn parse_point(raw: Option<&RawPoint>) -> Result<Coordinate, InvalidPointError> {
    match raw {
        None => Err(InvalidPointError::Missing),
        Some(RawPoint::Pair([x, y])) => {
            for v in [x, y] {
                if !v.is_finite() {
                    return Err(InvalidPointError::BadCoordinate(v.to_string()));
                }
            }
            Ok(Coordinate { x: *x, y: *y })
        }
        Some(RawPoint::Text(text)) => parse_point_text(text),
    }
}

fn parse_point_text(text: &str) -> Result<Coordinate, InvalidPointError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(InvalidPointError::Missing);
    }

    let inner = trimmed
        .strip_prefix(ENVELOPE_OPEN)
        .and_then(|rest| rest.strip_suffix(ENVELOPE_CLOSE))
        .ok_or_else(|| InvalidPointError::Malformed(text.to_string()))?;

    let tokens: Vec<&str> = inner.split_whitespace().collect();
    let [x, y] = tokens.as_slice() else {
        return Err(InvalidPointError::Malformed(text.to_string()));
    };

    Ok(Coordinate {
        x: parse_finite(x)?,
        y: parse_finite(y)?,
    })
}

fn parse_finite(token: &str) -> Result<f64, InvalidPointError> {
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| InvalidPointError::BadCoordinate(token.to_string()))
}

/// Validates a raw measurement. `Ok(None)` means "no data", which is
/// distinct from a measured zero.
pub fn parse_measurement(
    raw: Option<&RawMeasurement>,
) -> Result<Option<f64>, InvalidMeasurementError> {
    match raw {
        None => Ok(None),
        Some(RawMeasurement::Number(v)) if v.is_finite() => Ok(Some(*v)),
        Some(RawMeasurement::Number(v)) => Err(InvalidMeasurementError(v.to_string())),
        Some(RawMeasurement::Text(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| InvalidMeasurementError(s.to_string()))
        }
    }
}
