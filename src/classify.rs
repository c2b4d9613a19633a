use crate::catalog::Catalog;
use crate::types::Coordinate;
use geo::algorithm::contains::Contains;
use geo::Point;

/// Catalog position of the region owning `point`, if any.
///
/// The bounding-box index only narrows the search; among the regions that
/// actually contain the point the earliest in catalog order wins, so
/// overlapping boundaries resolve deterministically.
pub fn classify_index(point: Coordinate, catalog: &Catalog) -> Option<usize> {
    let pt = Point::new(point.x, point.y);
    catalog
        .candidates_at(point.x, point.y)
        .filter(|&i| catalog.regions()[i].boundary.contains(&pt))
        .min()
}

pub fn classify(point: Coordinate, catalog: &Catalog) -> Option<&str> {
    classify_index(point, catalog).map(|i| catalog.regions()[i].name.as_str())
}
