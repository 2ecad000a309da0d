//! Geographic grid of points and segments, grounded on `eflips/grid.py`'s
//! `GridPoint`/`GridSegment`/`Grid`.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub enum PointKind {
    Stop,
    Depot,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridPoint {
    pub id: u32,
    pub name: String,
    pub kind: PointKind,
    #[serde(default)]
    pub coords: Option<(f64, f64)>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridSegment {
    pub id: u32,
    pub origin: u32,
    pub destination: u32,
    pub distance_km: f64,
}

/// A collection of unique points and segments with shortest-segment lookup.
/// New deadhead segments discovered during schedule generation are inserted
/// with lazily-allocated ids via `next_segment_id`.
#[derive(Default)]
pub struct Grid {
    points: HashMap<u32, GridPoint>,
    segments: HashMap<u32, GridSegment>,
    next_segment_id: u32,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, point: GridPoint) {
        self.points.insert(point.id, point);
    }

    pub fn point(&self, id: u32) -> Option<&GridPoint> {
        self.points.get(&id)
    }

    pub fn add_segment(&mut self, segment: GridSegment) {
        self.next_segment_id = self.next_segment_id.max(segment.id + 1);
        self.segments.insert(segment.id, segment);
    }

    pub fn segment(&self, id: u32) -> Option<&GridSegment> {
        self.segments.get(&id)
    }

    /// Allocates the next free segment id and inserts a new segment with it,
    /// returning the id. Used when the schedule generator materialises a
    /// deadhead trip that has no pre-existing segment.
    pub fn create_segment(&mut self, origin: u32, destination: u32, distance_km: f64) -> u32 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        self.segments.insert(id, GridSegment { id, origin, destination, distance_km });
        id
    }

    /// Shortest segment directly connecting `origin` to `destination`, by
    /// linear scan (ties broken by insertion order via `HashMap` iteration
    /// being incidental — callers needing a stable tie-break should compare
    /// `distance_km` strictly, as this does).
    pub fn shortest_segment(&self, origin: u32, destination: u32) -> Option<&GridSegment> {
        self.segments
            .values()
            .filter(|s| s.origin == origin && s.destination == destination)
            .min_by(|a, b| a.distance_km.total_cmp(&b.distance_km))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortest_segment_picks_minimum_distance_among_duplicates() {
        let mut grid = Grid::new();
        grid.add_point(GridPoint { id: 1, name: "A".into(), kind: PointKind::Stop, coords: None });
        grid.add_point(GridPoint { id: 2, name: "B".into(), kind: PointKind::Stop, coords: None });
        grid.add_segment(GridSegment { id: 10, origin: 1, destination: 2, distance_km: 5.0 });
        grid.add_segment(GridSegment { id: 11, origin: 1, destination: 2, distance_km: 3.2 });
        let segment = grid.shortest_segment(1, 2).unwrap();
        assert_eq!(segment.id, 11);
    }

    #[test]
    fn create_segment_allocates_unused_ids() {
        let mut grid = Grid::new();
        grid.add_segment(GridSegment { id: 5, origin: 1, destination: 2, distance_km: 1.0 });
        let id = grid.create_segment(2, 3, 2.0);
        assert!(id > 5);
        assert!(grid.segment(id).is_some());
    }
}
