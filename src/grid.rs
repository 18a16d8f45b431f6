use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, ensure};
use serde::Serialize;

use crate::geo::BoundingBox;

/// Default number of cells per axis.
pub const DEFAULT_GRID_SIZE: usize = 500;

/// Largest accepted number of cells per axis (128 MiB of counters).
pub const MAX_GRID_SIZE: usize = 4096;

// ------------------------------------------------------------
// Grid geometry
// ------------------------------------------------------------
//
// Maps coordinates to cells and back. The grid is anchored at
// the lower-left corner of the bounding box:
//
//   x = floor((lon - lower_left.lon) / step_lon)
//   y = floor((lat - lower_left.lat) / step_lat)
//
#[derive(Debug, Clone, Copy)]
pub struct GridGeometry {
    bounds: BoundingBox,
    size: usize,
    step_lat: f64,
    step_lon: f64,
}

impl GridGeometry {
    pub fn new(bounds: BoundingBox, size: usize) -> Result<Self> {
        ensure!(size > 0, "grid size must be greater than zero");
        ensure!(
            size <= MAX_GRID_SIZE,
            "grid size {size} exceeds the maximum of {MAX_GRID_SIZE} cells per axis"
        );

        let ur = bounds.upper_right();
        let ll = bounds.lower_left();

        Ok(Self {
            bounds,
            size,
            step_lat: (ur.lat - ll.lat) / size as f64,
            step_lon: (ur.lon - ll.lon) / size as f64,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the `(x, y)` cell for a coordinate, or `None` when it
    /// lies outside the bounding box.
    ///
    /// The upper and right edges belong to the last row/column.
    pub fn cell_of(&self, lat: f64, lon: f64) -> Option<(usize, usize)> {
        if !self.bounds.contains(lat, lon) {
            return None;
        }

        let ll = self.bounds.lower_left();
        let last = self.size - 1;

        let x = ((lon - ll.lon) / self.step_lon).floor() as usize;
        let y = ((lat - ll.lat) / self.step_lat).floor() as usize;

        Some((x.min(last), y.min(last)))
    }

    /// Center of cell `(x, y)` as `(lat, lon)`.
    pub fn cell_center(&self, x: usize, y: usize) -> (f64, f64) {
        let ll = self.bounds.lower_left();
        (
            ll.lat + y as f64 * self.step_lat + self.step_lat / 2.0,
            ll.lon + x as f64 * self.step_lon + self.step_lon / 2.0,
        )
    }
}

/// A non-zero cell captured by a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellCount {
    pub x: usize,
    pub y: usize,
    pub count: u64,
}

/// A cell center with its count, as exported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightedPoint {
    pub lat: f64,
    pub lon: f64,
    pub weight: u64,
}

// ------------------------------------------------------------
// Grid accumulator
// ------------------------------------------------------------
//
// N×N histogram of observations, shared between the feed task
// (writer) and the export task (reader).
//
// CONCURRENCY:
// - One mutex guards the whole cell vector
// - `place` holds it for a single increment
// - `snapshot` holds it only while copying non-zero cells
//
// Cells never decrease.
//
pub struct GridAccumulator {
    geometry: GridGeometry,

    /// Row-major: index = y * size + x
    cells: Mutex<Vec<u64>>,
}

impl GridAccumulator {
    pub fn new(bounds: BoundingBox, size: usize) -> Result<Self> {
        let geometry = GridGeometry::new(bounds, size)?;
        let Some(cells) = size.checked_mul(size) else {
            anyhow::bail!("grid size {size} overflows the cell count");
        };

        Ok(Self {
            geometry,
            cells: Mutex::new(vec![0; cells]),
        })
    }

    /// Counts one observation.
    ///
    /// Returns `false` without touching any cell when the coordinate
    /// is outside the bounding box.
    pub fn place(&self, lat: f64, lon: f64) -> bool {
        let Some((x, y)) = self.geometry.cell_of(lat, lon) else {
            return false;
        };

        let idx = y * self.geometry.size + x;
        let mut cells = self.lock();
        cells[idx] = cells[idx].saturating_add(1);

        true
    }

    /// Point-in-time copy of all non-zero cells.
    ///
    /// Rows are listed north to south, columns west to east.
    pub fn snapshot(&self) -> GridSnapshot {
        let size = self.geometry.size;

        let cells = {
            let guard = self.lock();

            (0..size)
                .rev()
                .flat_map(|y| (0..size).map(move |x| (x, y)))
                .filter_map(|(x, y)| {
                    let count = guard[y * size + x];
                    (count > 0).then_some(CellCount { x, y, count })
                })
                .collect()
        };

        GridSnapshot {
            geometry: self.geometry,
            cells,
        }
    }

    // Every critical section leaves the vector consistent, so a
    // poisoned lock still holds valid counts.
    fn lock(&self) -> MutexGuard<'_, Vec<u64>> {
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Immutable result of [`GridAccumulator::snapshot`].
#[derive(Debug, Clone)]
pub struct GridSnapshot {
    geometry: GridGeometry,
    cells: Vec<CellCount>,
}

impl GridSnapshot {
    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    #[cfg(test)]
    pub fn cells(&self) -> &[CellCount] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.cells.iter().map(|c| c.count).sum()
    }

    pub fn points(&self) -> impl Iterator<Item = WeightedPoint> + '_ {
        self.cells.iter().map(|c| {
            let (lat, lon) = self.geometry.cell_center(c.x, c.y);
            WeightedPoint { lat, lon, weight: c.count }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::geo::Coordinate;

    fn grid(size: usize) -> GridAccumulator {
        let bounds =
            BoundingBox::new(Coordinate::new(40.0, -30.0), Coordinate::new(30.0, -40.0)).unwrap();
        GridAccumulator::new(bounds, size).unwrap()
    }

    #[test]
    fn rejects_zero_size() {
        let bounds =
            BoundingBox::new(Coordinate::new(1.0, 1.0), Coordinate::new(0.0, 0.0)).unwrap();
        assert!(GridAccumulator::new(bounds, 0).is_err());
    }

    #[test]
    fn rejects_oversized_grids() {
        let bounds =
            BoundingBox::new(Coordinate::new(1.0, 1.0), Coordinate::new(0.0, 0.0)).unwrap();

        for size in [MAX_GRID_SIZE + 1, 100_000, 1 << 32, usize::MAX] {
            let err = GridAccumulator::new(bounds, size).err().unwrap();
            assert!(err.to_string().contains("exceeds the maximum"), "size {size}");
        }
    }

    #[test]
    fn accepts_the_largest_grid() {
        let bounds =
            BoundingBox::new(Coordinate::new(1.0, 1.0), Coordinate::new(0.0, 0.0)).unwrap();
        let geometry = GridGeometry::new(bounds, MAX_GRID_SIZE).unwrap();
        assert_eq!(geometry.cell_of(1.0, 1.0), Some((MAX_GRID_SIZE - 1, MAX_GRID_SIZE - 1)));
    }

    #[test]
    fn place_increments_floor_cell() {
        let g = grid(10);

        assert!(g.place(35.0, -35.0));

        let snap = g.snapshot();
        assert_eq!(snap.cells(), &[CellCount { x: 5, y: 5, count: 1 }]);

        let points: Vec<_> = snap.points().collect();
        assert_eq!(points, vec![WeightedPoint { lat: 35.5, lon: -34.5, weight: 1 }]);
    }

    #[test]
    fn place_uses_floor_inside_a_cell() {
        let g = grid(10);

        g.place(31.99, -39.01);
        g.place(39.5, -30.5);

        let cells = g.snapshot().cells().to_vec();
        assert_eq!(
            cells,
            vec![
                CellCount { x: 9, y: 9, count: 1 },
                CellCount { x: 0, y: 1, count: 1 },
            ]
        );
    }

    #[test]
    fn out_of_bounds_mutates_nothing() {
        let g = grid(10);

        for (lat, lon) in [
            (40.5, -35.0),
            (29.5, -35.0),
            (35.0, -29.5),
            (35.0, -40.5),
            (f64::NAN, -35.0),
            (35.0, f64::INFINITY),
        ] {
            assert!(!g.place(lat, lon), "({lat}, {lon}) should be rejected");
        }

        assert!(g.snapshot().is_empty());
    }

    #[test]
    fn edges_stay_inside_the_grid() {
        let g = grid(10);

        assert!(g.place(40.0, -30.0));
        assert!(g.place(30.0, -40.0));

        let cells = g.snapshot().cells().to_vec();
        assert_eq!(
            cells,
            vec![
                CellCount { x: 9, y: 9, count: 1 },
                CellCount { x: 0, y: 0, count: 1 },
            ]
        );
    }

    #[test]
    fn repeated_place_is_additive() {
        let g = grid(DEFAULT_GRID_SIZE);

        for _ in 0..250 {
            g.place(33.3, -36.6);
        }

        let snap = g.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.cells()[0].count, 250);
        assert_eq!(snap.total(), 250);
    }

    #[test]
    fn unit_cell_center() {
        let bounds =
            BoundingBox::new(Coordinate::new(10.0, 10.0), Coordinate::new(0.0, 0.0)).unwrap();
        let geometry = GridGeometry::new(bounds, 10).unwrap();

        assert_eq!(geometry.cell_center(0, 0), (0.5, 0.5));
        assert_eq!(geometry.cell_center(3, 7), (7.5, 3.5));
    }

    #[test]
    fn snapshot_is_detached_from_later_places() {
        let g = grid(10);
        g.place(35.0, -35.0);

        let snap = g.snapshot();
        g.place(35.0, -35.0);

        assert_eq!(snap.total(), 1);
        assert_eq!(g.snapshot().total(), 2);
    }

    #[test]
    fn concurrent_places_are_not_lost() {
        let g = Arc::new(grid(10));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let g = g.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        g.place(30.5 + i as f64, -35.0);
                    }
                })
            })
            .collect();

        for _ in 0..50 {
            let snap = g.snapshot();
            assert!(snap.total() <= 8_000);
        }

        for h in handles {
            h.join().unwrap();
        }

        let snap = g.snapshot();
        assert_eq!(snap.len(), 8);
        assert_eq!(snap.total(), 8_000);
    }
}
