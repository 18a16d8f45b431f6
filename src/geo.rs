use anyhow::{Result, ensure};
use serde::Deserialize;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// One position extracted from an accepted feed line.
///
/// Never stored: it is handed straight to the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub lat: f64,
    pub lon: f64,
}

// ------------------------------------------------------------
// Bounding box
// ------------------------------------------------------------
//
// The monitored region. Both corners are validated when the box
// is built:
// - upper_right must be strictly north of lower_left
// - upper_right must be strictly east of lower_left
//
// Corners that violate this are rejected, never swapped.
//
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    upper_right: Coordinate,
    lower_left: Coordinate,
}

impl BoundingBox {
    pub fn new(upper_right: Coordinate, lower_left: Coordinate) -> Result<Self> {
        for (name, c) in [("upper_right", upper_right), ("lower_left", lower_left)] {
            ensure!(
                c.lat.is_finite() && c.lon.is_finite(),
                "bounding box corner {name} is not a finite coordinate ({}, {})",
                c.lat,
                c.lon
            );
        }

        ensure!(
            upper_right.lat > lower_left.lat,
            "bounding box latitude is inverted: upper_right.lat ({}) must be greater than lower_left.lat ({})",
            upper_right.lat,
            lower_left.lat
        );
        ensure!(
            upper_right.lon > lower_left.lon,
            "bounding box longitude is inverted: upper_right.lon ({}) must be greater than lower_left.lon ({})",
            upper_right.lon,
            lower_left.lon
        );

        Ok(Self { upper_right, lower_left })
    }

    pub fn upper_right(&self) -> Coordinate {
        self.upper_right
    }

    pub fn lower_left(&self) -> Coordinate {
        self.lower_left
    }

    /// Inclusive on every edge. NaN is never contained.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.lower_left.lat..=self.upper_right.lat).contains(&lat)
            && (self.lower_left.lon..=self.upper_right.lon).contains(&lon)
    }
}
