#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Polygon layers and the two spatial operations of the toolchain.
//!
//! Loads polygon regions from `GeoJSON` layer files, reduces a polygon to
//! its bounding rectangle for the over-approximate API query, and clips a
//! materialized point set back down to exact polygon membership.
//!
//! `GeoJSON` coordinates are WGS84 by definition, so no reprojection step
//! exists between layer loading and the bounding-box query.

use std::path::Path;

use geo::{BoundingRect, Contains, MultiPolygon, Point, Polygon};
use geojson::GeoJson;

use gbif_occ_client::CancelToken;
use gbif_occ_client::progress::ProgressCallback;
use gbif_occ_models::{ATTRIBUTE_NAMES, BoundingBox, PointFeature};

/// Errors that can occur while loading layers or clipping.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// Reading the layer file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The layer file is not valid `GeoJSON`.
    #[error("GeoJSON parse error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The layer contains no usable geometry.
    #[error("Invalid geometry: {message}")]
    InvalidGeometry {
        /// Description of what went wrong.
        message: String,
    },
}

/// One polygon feature of a layer, identified by its position in the file.
#[derive(Debug, Clone)]
pub struct Region {
    /// Zero-based feature id within the source layer.
    pub id: u64,
    /// The region geometry. Single polygons are stored as a one-part
    /// multi-polygon so callers iterate parts uniformly.
    pub geometry: MultiPolygon<f64>,
}

/// A named collection of polygon regions loaded from one `GeoJSON` file.
#[derive(Debug, Clone)]
pub struct PolygonLayer {
    /// Layer name (the file stem).
    pub name: String,
    /// Polygon regions, in file order. Non-polygon features are skipped.
    pub regions: Vec<Region>,
}

/// Outcome of a clip pass over one region's point set.
#[derive(Debug, Clone, PartialEq)]
pub enum ClipOutcome {
    /// Clip ran over every feature; only points inside the polygon remain.
    Completed(Vec<PointFeature>),
    /// The cancellation token was asserted mid-clip.
    Aborted,
}

/// Loads a polygon layer from a `GeoJSON` file.
///
/// # Errors
///
/// Returns [`SpatialError`] if the file cannot be read or parsed.
pub fn load_polygon_layer(path: &Path) -> Result<PolygonLayer, SpatialError> {
    let name = path
        .file_stem()
        .map_or_else(|| "layer".to_owned(), |s| s.to_string_lossy().into_owned());
    let contents = std::fs::read_to_string(path)?;
    parse_polygon_layer(&name, &contents)
}

/// Parses a polygon layer from `GeoJSON` text.
///
/// Accepts a `FeatureCollection`; features whose geometry is neither
/// `Polygon` nor `MultiPolygon` are skipped (the layer picker only offers
/// polygon layers, but mixed collections exist in the wild).
///
/// # Errors
///
/// Returns [`SpatialError`] if the text is not valid `GeoJSON` or is not a
/// feature collection.
pub fn parse_polygon_layer(name: &str, geojson_str: &str) -> Result<PolygonLayer, SpatialError> {
    let geojson: GeoJson = geojson_str.parse()?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(SpatialError::InvalidGeometry {
            message: "expected a GeoJSON FeatureCollection".to_owned(),
        });
    };

    let mut regions = Vec::new();
    for (index, feature) in collection.features.into_iter().enumerate() {
        let id = index as u64;
        let Some(geometry) = feature.geometry else {
            continue;
        };
        let Ok(geo_geom) = geo::Geometry::<f64>::try_from(geometry) else {
            log::warn!("Skipping feature {id} in layer '{name}': unsupported geometry");
            continue;
        };
        match geo_geom {
            geo::Geometry::Polygon(polygon) => regions.push(Region {
                id,
                geometry: MultiPolygon(vec![polygon]),
            }),
            geo::Geometry::MultiPolygon(multi) => regions.push(Region {
                id,
                geometry: multi,
            }),
            _ => {
                log::debug!("Skipping non-polygon feature {id} in layer '{name}'");
            }
        }
    }

    log::info!("Layer '{name}': {} polygon region(s)", regions.len());
    Ok(PolygonLayer {
        name: name.to_owned(),
        regions,
    })
}

/// Reduces one polygon to its axis-aligned bounding rectangle.
///
/// Returns `None` only for a degenerate polygon with no vertices.
#[must_use]
pub fn bounding_box(polygon: &Polygon<f64>) -> Option<BoundingBox> {
    polygon.bounding_rect().map(|rect| BoundingBox {
        min_lon: rect.min().x,
        min_lat: rect.min().y,
        max_lon: rect.max().x,
        max_lat: rect.max().y,
    })
}

/// Filters a point set down to the features strictly inside the polygon.
///
/// This is the step that corrects bounding-box over-fetch to exact polygon
/// membership. The cancellation token is checked after each feature; an
/// asserted token yields [`ClipOutcome::Aborted`] and the partial result is
/// discarded.
#[must_use]
pub fn clip_points(
    polygon: &Polygon<f64>,
    features: Vec<PointFeature>,
    cancel: &CancelToken,
    progress: &dyn ProgressCallback,
) -> ClipOutcome {
    let total = features.len();
    let mut inside = Vec::new();

    for feature in features {
        if polygon.contains(&Point::new(feature.lon, feature.lat)) {
            inside.push(feature);
        }
        progress.inc(1);

        if cancel.is_cancelled() {
            log::info!("Clip aborted");
            return ClipOutcome::Aborted;
        }
    }

    log::debug!("Clip kept {} of {total} features", inside.len());
    ClipOutcome::Completed(inside)
}

/// Renders a clipped point set as a `GeoJSON` `FeatureCollection` with the
/// seven occurrence attributes as properties.
#[must_use]
pub fn to_feature_collection(features: &[PointFeature]) -> geojson::FeatureCollection {
    let features = features
        .iter()
        .map(|feature| {
            let mut properties = geojson::JsonObject::new();
            for (key, value) in ATTRIBUTE_NAMES.iter().zip(feature.attribute_values()) {
                properties.insert((*key).to_owned(), serde_json::Value::String(value.to_owned()));
            }
            geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![
                    feature.lon,
                    feature.lat,
                ]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
