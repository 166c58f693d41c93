/// Half-open activity interval `[start, end)`; open bounds are infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityInterval {
    pub start: f64,
    pub end: f64,
}

impl ActivityInterval {
    /// `None` start means the activity was always ongoing, `None` end that it
    /// never finishes.
    pub fn new(start: Option<f64>, end: Option<f64>) -> Self {
        Self {
            start: start.unwrap_or(f64::NEG_INFINITY),
            end: end.unwrap_or(f64::INFINITY),
        }
    }

    /// Length of the overlap with `[window_start, window_end)`.
    pub fn overlap(&self, window_start: f64, window_end: f64) -> f64 {
        let start = self.start.max(window_start);
        let end = self.end.min(window_end);
        if end > start {
            end - start
        } else {
            0.0
        }
    }
}

/// Every activity interval ever located in one grid cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tile {
    intervals: Vec<ActivityInterval>,
}

impl Tile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_activity(&mut self, start: Option<f64>, end: Option<f64>) {
        self.intervals.push(ActivityInterval::new(start, end));
    }

    pub fn intervals(&self) -> &[ActivityInterval] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Person-time spent in this cell during `[start, end)`, summed over all
    /// activities. Overlapping activities of different persons add up.
    pub fn spent_time(&self, start: f64, end: f64) -> f64 {
        self.intervals
            .iter()
            .map(|interval| interval.overlap(start, end))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(start: f64, end: f64) -> Tile {
        let mut tile = Tile::new();
        tile.add_activity(Some(start), Some(end));
        tile
    }

    #[test]
    fn window_overlapping_start() {
        assert_eq!(single(1000.0, 2000.0).spent_time(500.0, 1500.0), 500.0);
    }

    #[test]
    fn window_overlapping_end() {
        assert_eq!(single(1000.0, 2000.0).spent_time(1600.0, 2800.0), 400.0);
    }

    #[test]
    fn window_containing_activity() {
        assert_eq!(single(1000.0, 2000.0).spent_time(800.0, 2800.0), 1000.0);
    }

    #[test]
    fn window_inside_activity() {
        assert_eq!(single(1000.0, 2000.0).spent_time(1200.0, 1800.0), 600.0);
    }

    #[test]
    fn disjoint_window_is_zero() {
        let tile = single(1000.0, 2000.0);
        assert_eq!(tile.spent_time(2000.0, 3000.0), 0.0);
        assert_eq!(tile.spent_time(0.0, 1000.0), 0.0);
    }

    #[test]
    fn open_bounds_are_clipped_to_window() {
        let mut tile = Tile::new();
        tile.add_activity(None, Some(2000.0));
        tile.add_activity(Some(1000.0), Some(2000.0));
        tile.add_activity(Some(1000.0), None);

        assert_eq!(tile.len(), 3);
        assert_eq!(tile.spent_time(500.0, 2500.0), 1500.0 + 1000.0 + 1500.0);
    }

    #[test]
    fn empty_tile_spends_nothing() {
        assert_eq!(Tile::new().spent_time(0.0, 3600.0), 0.0);
    }
}
