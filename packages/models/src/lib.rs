#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Core types shared across the GBIF occurrence toolchain.
//!
//! Raw occurrence records arrive as untyped [`serde_json::Value`] objects
//! straight from the occurrence-search API. [`materialize`] turns one raw
//! record into a [`PointFeature`] — or nothing, when the record carries no
//! usable coordinates.

use serde::{Deserialize, Serialize};

/// Placeholder substituted for any absent optional attribute.
pub const PLACEHOLDER: &str = "Unknown";

/// Attribute names of a materialized point feature, in the fixed order
/// the occurrence layer schema defines them.
pub const ATTRIBUTE_NAMES: [&str; 7] = [
    "gbifID",
    "species",
    "country",
    "eventDate",
    "catalogNumber",
    "identifiedBy",
    "individualCount",
];

/// Axis-aligned longitude/latitude envelope of a query region (WGS84).
///
/// Used as an over-approximate spatial filter: the remote API is queried
/// with this rectangle, and exact polygon membership is restored later by
/// the clip step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western edge (minimum longitude).
    pub min_lon: f64,
    /// Southern edge (minimum latitude).
    pub min_lat: f64,
    /// Eastern edge (maximum longitude).
    pub max_lon: f64,
    /// Northern edge (maximum latitude).
    pub max_lat: f64,
}

impl BoundingBox {
    /// Renders the rectangle as a closed WKT polygon ring, counter-clockwise
    /// from the south-west corner, as the occurrence-search `geometry`
    /// parameter expects it.
    #[must_use]
    pub fn to_wkt_polygon(&self) -> String {
        format!(
            "POLYGON(({min_lon} {min_lat},{max_lon} {min_lat},{max_lon} {max_lat},{min_lon} {max_lat},{min_lon} {min_lat}))",
            min_lon = self.min_lon,
            min_lat = self.min_lat,
            max_lon = self.max_lon,
            max_lat = self.max_lat,
        )
    }

    /// Returns `true` if the point lies inside or on the edge of the box.
    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// One occurrence record materialized as a point geometry plus its seven
/// attributes, held in memory for the duration of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointFeature {
    /// Longitude (`decimalLongitude` in the source record).
    pub lon: f64,
    /// Latitude (`decimalLatitude` in the source record).
    pub lat: f64,
    /// GBIF record identifier.
    pub gbif_id: String,
    /// Scientific species name.
    pub species: String,
    /// Country of the observation.
    pub country: String,
    /// Date of the observation event.
    pub event_date: String,
    /// Collection catalog number.
    pub catalog_number: String,
    /// Agent who identified the specimen.
    pub identified_by: String,
    /// Number of individuals observed.
    pub individual_count: String,
}

impl PointFeature {
    /// Attribute values in the same fixed order as [`ATTRIBUTE_NAMES`].
    #[must_use]
    pub fn attribute_values(&self) -> [&str; 7] {
        [
            &self.gbif_id,
            &self.species,
            &self.country,
            &self.event_date,
            &self.catalog_number,
            &self.identified_by,
            &self.individual_count,
        ]
    }
}

/// Converts one raw occurrence record into a [`PointFeature`].
///
/// Returns `None` when `decimalLatitude` or `decimalLongitude` is null or
/// absent — such records cannot be placed on a map and are dropped, not
/// treated as an error. Every other field falls back to [`PLACEHOLDER`]
/// when missing.
#[must_use]
pub fn materialize(record: &serde_json::Value) -> Option<PointFeature> {
    let lat = record.get("decimalLatitude")?.as_f64()?;
    let lon = record.get("decimalLongitude")?.as_f64()?;

    Some(PointFeature {
        lon,
        lat,
        gbif_id: field_or_placeholder(record, "gbifID"),
        species: field_or_placeholder(record, "species"),
        country: field_or_placeholder(record, "country"),
        event_date: field_or_placeholder(record, "eventDate"),
        catalog_number: field_or_placeholder(record, "catalogNumber"),
        identified_by: field_or_placeholder(record, "identifiedBy"),
        individual_count: field_or_placeholder(record, "individualCount"),
    })
}

/// Reads an attribute field as a string, accepting numeric values as well
/// (the API returns `gbifID` and `individualCount` as numbers).
fn field_or_placeholder(record: &serde_json::Value, key: &str) -> String {
    match record.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => PLACEHOLDER.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn materializes_complete_record() {
        let record = json!({
            "gbifID": 4501234567u64,
            "species": "Bombus terrestris",
            "country": "Norway",
            "eventDate": "2023-06-14",
            "catalogNumber": "NHM-2023-112",
            "identifiedBy": "A. Hansen",
            "individualCount": 3,
            "decimalLatitude": 59.91,
            "decimalLongitude": 10.75,
        });

        let feature = materialize(&record).unwrap();
        assert!((feature.lat - 59.91).abs() < f64::EPSILON);
        assert!((feature.lon - 10.75).abs() < f64::EPSILON);
        assert_eq!(
            feature.attribute_values(),
            [
                "4501234567",
                "Bombus terrestris",
                "Norway",
                "2023-06-14",
                "NHM-2023-112",
                "A. Hansen",
                "3",
            ]
        );
    }

    #[test]
    fn substitutes_placeholder_for_missing_optional_fields() {
        let record = json!({
            "decimalLatitude": -33.9,
            "decimalLongitude": 18.4,
            "species": "Protea cynaroides",
        });

        let feature = materialize(&record).unwrap();
        assert_eq!(feature.species, "Protea cynaroides");
        assert_eq!(feature.gbif_id, PLACEHOLDER);
        assert_eq!(feature.country, PLACEHOLDER);
        assert_eq!(feature.event_date, PLACEHOLDER);
        assert_eq!(feature.catalog_number, PLACEHOLDER);
        assert_eq!(feature.identified_by, PLACEHOLDER);
        assert_eq!(feature.individual_count, PLACEHOLDER);
    }

    #[test]
    fn drops_record_missing_latitude() {
        let record = json!({
            "species": "Aquila chrysaetos",
            "decimalLongitude": 7.5,
        });
        assert!(materialize(&record).is_none());
    }

    #[test]
    fn drops_record_with_null_longitude() {
        let record = json!({
            "decimalLatitude": 47.2,
            "decimalLongitude": null,
        });
        assert!(materialize(&record).is_none());
    }

    #[test]
    fn wkt_polygon_closes_the_ring() {
        let bbox = BoundingBox {
            min_lon: 5.0,
            min_lat: 58.0,
            max_lon: 6.5,
            max_lat: 59.25,
        };
        assert_eq!(
            bbox.to_wkt_polygon(),
            "POLYGON((5 58,6.5 58,6.5 59.25,5 59.25,5 58))"
        );
    }

    #[test]
    fn bounding_box_contains_edges() {
        let bbox = BoundingBox {
            min_lon: -1.0,
            min_lat: -1.0,
            max_lon: 1.0,
            max_lat: 1.0,
        };
        assert!(bbox.contains(0.0, 0.0));
        assert!(bbox.contains(-1.0, 1.0));
        assert!(!bbox.contains(1.1, 0.0));
    }
}
