use crate::error::CatalogLoadError;
use crate::types::Region;
use geo::bounding_rect::BoundingRect;
use geo::MultiPolygon;
use geojson::GeoJson;
use rstar::{RTree, RTreeObject, AABB};
use shapefile::dbase::FieldValue;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Where a catalog comes from: the boundary file and the attribute that
/// names each region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoundarySource {
    pub path: PathBuf,
    pub name_property: String,
}

impl BoundarySource {
    pub fn new(path: impl Into<PathBuf>, name_property: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name_property: name_property.into(),
        }
    }
}

// Bounding box of one region, pointing back at its catalog position.
pub(crate) struct RegionEnvelope {
    pub(crate) index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for RegionEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Immutable, ordered set of named regions.
///
/// Order is significant: it is the tie-break when boundaries overlap.
pub struct Catalog {
    regions: Vec<Region>,
    tree: RTree<RegionEnvelope>,
}

impl Catalog {
    pub fn new(regions: Vec<Region>) -> Result<Self, CatalogLoadError> {
        let mut seen = HashSet::new();
        let mut envelopes = Vec::with_capacity(regions.len());

        for (index, region) in regions.iter().enumerate() {
            if !seen.insert(region.name.as_str()) {
                return Err(CatalogLoadError::DuplicateRegion(region.name.clone()));
            }
            let rect = region.boundary.bounding_rect().ok_or_else(|| {
                CatalogLoadError::InvalidGeometry {
                    name: region.name.clone(),
                    reason: "geometry is empty".to_string(),
                }
            })?;
            envelopes.push(RegionEnvelope {
                index,
                aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            });
        }

        Ok(Self {
            regions,
            tree: RTree::bulk_load(envelopes),
        })
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|r| r.name.as_str())
    }

    pub(crate) fn candidates_at(&self, x: f64, y: f64) -> impl Iterator<Item = usize> + '_ {
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point([x, y]))
            .map(|e| e.index)
    }
}

// The index is derived from `regions`, so equality is region equality.
impl PartialEq for Catalog {
    fn eq(&self, other: &Self) -> bool {
        self.regions == other.regions
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("regions", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

/// Builds a catalog from a boundary file. Any bad feature fails the whole
/// load; there are no partial catalogs.
pub fn load_catalog(source: &BoundarySource) -> Result<Catalog, CatalogLoadError> {
    let extension = source
        .path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| CatalogLoadError::UnsupportedFormat(source.path.clone()))?;

    let regions = match extension.as_str() {
        "shp" => load_shapefile_regions(&source.path, &source.name_property)?,
        "json" | "geojson" => load_geojson_regions(&source.path, &source.name_property)?,
        _ => return Err(CatalogLoadError::UnsupportedFormat(source.path.clone())),
    };

    if regions.is_empty() {
        return Err(CatalogLoadError::Empty(source.path.clone()));
    }

    let catalog = Catalog::new(regions)?;
    info!("Loaded {} regions from {:?}", catalog.len(), source.path);
    Ok(catalog)
}

fn load_geojson_regions(path: &Path, name_property: &str) -> Result<Vec<Region>, CatalogLoadError> {
    let file = File::open(path).map_err(|source| CatalogLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);

    let geojson = GeoJson::from_reader(reader).map_err(|e| CatalogLoadError::GeoJson {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(CatalogLoadError::NotAFeatureCollection),
    };

    let mut regions = Vec::with_capacity(collection.features.len());

    for (index, feature) in collection.features.into_iter().enumerate() {
        let raw = match feature.properties.as_ref().and_then(|props| props.get(name_property)) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let name = region_name(raw).ok_or_else(|| CatalogLoadError::MissingName {
            index,
            property: name_property.to_string(),
        })?;

        let invalid = |reason: String| CatalogLoadError::InvalidGeometry {
            name: name.clone(),
            reason,
        };

        let geometry = feature
            .geometry
            .ok_or_else(|| invalid("feature has no geometry".to_string()))?;
        let converted: geo::Geometry<f64> = geometry
            .value
            .try_into()
            .map_err(|e: geojson::Error| invalid(e.to_string()))?;

        let boundary = match converted {
            geo::Geometry::MultiPolygon(mp) => mp,
            geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
            other => return Err(invalid(format!("expected a polygon, found {}", geometry_kind(&other)))),
        };

        regions.push(Region { name, boundary });
    }

    Ok(regions)
}

fn load_shapefile_regions(path: &Path, name_property: &str) -> Result<Vec<Region>, CatalogLoadError> {
    let shapefile_error = |message: String| CatalogLoadError::Shapefile {
        path: path.to_path_buf(),
        message,
    };

    let mut reader = shapefile::Reader::from_path(path).map_err(|e| shapefile_error(e.to_string()))?;

    let mut regions = Vec::new();

    for (index, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result.map_err(|e| shapefile_error(e.to_string()))?;

        let raw = match record.get(name_property) {
            Some(FieldValue::Character(Some(s))) => Some(s.clone()),
            Some(FieldValue::Numeric(Some(n))) => Some(n.to_string()),
            Some(FieldValue::Integer(i)) => Some(i.to_string()),
            _ => None,
        };
        let name = region_name(raw).ok_or_else(|| CatalogLoadError::MissingName {
            index,
            property: name_property.to_string(),
        })?;

        let converted: Result<MultiPolygon<f64>, String> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.try_into().map_err(|e| format!("{:?}", e)),
            shapefile::Shape::PolygonM(polygon) => polygon.try_into().map_err(|e| format!("{:?}", e)),
            shapefile::Shape::PolygonZ(polygon) => polygon.try_into().map_err(|e| format!("{:?}", e)),
            other => Err(format!("expected a polygon, found {:?}", other.shapetype())),
        };

        let boundary = converted.map_err(|reason| CatalogLoadError::InvalidGeometry {
            name: name.clone(),
            reason,
        })?;

        regions.push(Region { name, boundary });
    }

    Ok(regions)
}

// Both formats: surrounding whitespace is dropped, blank means no name.
fn region_name(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn geometry_kind(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) | geo::Geometry::MultiPoint(_) => "a point",
        geo::Geometry::Line(_) | geo::Geometry::LineString(_) | geo::Geometry::MultiLineString(_) => "a line",
        geo::Geometry::GeometryCollection(_) => "a geometry collection",
        _ => "an unsupported geometry",
    }
}

/// Process-wide store of built catalogs, keyed by source.
///
/// The first `load` for a source builds the catalog while holding the lock,
/// so concurrent first callers wait and then share that one build. Failed
/// builds are not remembered.
#[derive(Default)]
pub struct CatalogCache {
    slots: Mutex<HashMap<BoundarySource, Arc<Catalog>>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, source: &BoundarySource) -> Result<Arc<Catalog>, CatalogLoadError> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(catalog) = slots.get(source) {
            return Ok(Arc::clone(catalog));
        }
        let catalog = Arc::new(load_catalog(source)?);
        slots.insert(source.clone(), Arc::clone(&catalog));
        Ok(catalog)
    }

    /// Rebuilds from `source` and swaps the result in. On failure the
    /// previously cached catalog stays in place.
    pub fn reload(&self, source: &BoundarySource) -> Result<Arc<Catalog>, CatalogLoadError> {
        let catalog = Arc::new(load_catalog(source)?);
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.insert(source.clone(), Arc::clone(&catalog));
        Ok(catalog)
    }

    pub fn invalidate(&self, source: &BoundarySource) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.remove(source).is_some()
    }
}
