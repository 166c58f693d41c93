//! Regular raster over a planar bounding box.
//!
//! A [`GridLayout`] fixes the mapping between world coordinates and cell
//! indices; a [`Grid`] pairs a layout with one value per cell. Cells are stored
//! row-major (`yi * x_len + xi`). The layout is immutable once built, so an
//! index computed from a coordinate stays valid for the grid's lifetime.

use std::ops::AddAssign;

use geo::Coord;
use rayon::prelude::*;

use crate::bounds::Bounds;
use crate::error::{AttributionError, Result};

/// Upper bound on the number of cells a single layout may address.
pub const MAX_CELLS: usize = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellIndex {
    pub xi: usize,
    pub yi: usize,
}

impl CellIndex {
    pub fn new(xi: usize, yi: usize) -> Self {
        Self { xi, yi }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    bounds: Bounds,
    cell_size: f64,
    x_len: usize,
    y_len: usize,
}

impl GridLayout {
    pub fn new(bounds: Bounds, cell_size: f64) -> Result<Self> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(AttributionError::invalid_dimension(format!(
                "cell size must be positive, got {cell_size}"
            )));
        }
        let x_len = axis_len(bounds.width(), cell_size)?;
        let y_len = axis_len(bounds.height(), cell_size)?;
        if x_len.checked_mul(y_len).map_or(true, |cells| cells > MAX_CELLS) {
            return Err(AttributionError::invalid_dimension(format!(
                "{x_len}x{y_len} grid exceeds {MAX_CELLS} cells"
            )));
        }
        Ok(Self {
            bounds,
            cell_size,
            x_len,
            y_len,
        })
    }

    #[inline]
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    #[inline]
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Volume of a cube with the cell's edge length.
    pub fn cell_volume(&self) -> f64 {
        self.cell_size * self.cell_size * self.cell_size
    }

    #[inline]
    pub fn x_len(&self) -> usize {
        self.x_len
    }

    #[inline]
    pub fn y_len(&self) -> usize {
        self.y_len
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.x_len * self.y_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell containing `(x, y)`.
    ///
    /// Not bounds-checked: coordinates below the minimum clamp to index 0 and
    /// coordinates past the maximum produce indices outside the grid. Use
    /// [`GridLayout::checked_index_of`] before writing.
    #[inline]
    pub fn index_of(&self, x: f64, y: f64) -> CellIndex {
        let xi = ((x - self.bounds.min_x()) / self.cell_size).floor() as usize;
        let yi = ((y - self.bounds.min_y()) / self.cell_size).floor() as usize;
        CellIndex { xi, yi }
    }

    pub fn checked_index_of(&self, x: f64, y: f64) -> Result<CellIndex> {
        if !self.bounds.contains(x, y) {
            return Err(AttributionError::OutOfRangeCoordinate {
                x,
                y,
                bounds: self.bounds,
            });
        }
        Ok(self.index_of(x, y))
    }

    #[inline]
    pub fn contains_cell(&self, cell: CellIndex) -> bool {
        cell.xi < self.x_len && cell.yi < self.y_len
    }

    #[inline]
    pub fn linear_index(&self, cell: CellIndex) -> usize {
        debug_assert!(self.contains_cell(cell));
        cell.yi * self.x_len + cell.xi
    }

    #[inline]
    pub fn cell_at(&self, linear: usize) -> CellIndex {
        CellIndex {
            xi: linear % self.x_len,
            yi: linear / self.x_len,
        }
    }

    /// Lower-left corner of the cell.
    pub fn corner_of(&self, cell: CellIndex) -> Coord<f64> {
        Coord {
            x: self.bounds.min_x() + cell.xi as f64 * self.cell_size,
            y: self.bounds.min_y() + cell.yi as f64 * self.cell_size,
        }
    }

    /// Extent spanned by every cell's receptor point. The last row and column
    /// may reach up to half a cell past `bounds`.
    pub fn receptor_bounds(&self) -> Bounds {
        Bounds::enclosing(
            self.center_of(CellIndex::new(0, 0)),
            self.center_of(CellIndex::new(self.x_len - 1, self.y_len - 1)),
        )
    }

    /// Receptor point of the cell. Maps back to the same cell under `index_of`.
    pub fn center_of(&self, cell: CellIndex) -> Coord<f64> {
        let corner = self.corner_of(cell);
        Coord {
            x: corner.x + self.cell_size * 0.5,
            y: corner.y + self.cell_size * 0.5,
        }
    }
}

fn axis_len(extent: f64, cell_size: f64) -> Result<usize> {
    let steps = (extent / cell_size).floor();
    if !steps.is_finite() || steps >= MAX_CELLS as f64 {
        return Err(AttributionError::invalid_dimension(format!(
            "extent {extent} at cell size {cell_size} exceeds {MAX_CELLS} cells per axis"
        )));
    }
    Ok(steps as usize + 1)
}

/// Fixed-resolution 2D raster holding one `T` per cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    layout: GridLayout,
    values: Vec<T>,
}

impl<T: Clone> Grid<T> {
    pub fn new(bounds: Bounds, cell_size: f64, default_value: T) -> Result<Self> {
        let layout = GridLayout::new(bounds, cell_size)?;
        Ok(Self::with_layout(layout, default_value))
    }

    pub fn with_layout(layout: GridLayout, default_value: T) -> Self {
        Self {
            layout,
            values: vec![default_value; layout.len()],
        }
    }
}

impl<T> Grid<T> {
    /// Wrap row-major values; the length must match the layout.
    pub fn from_values(layout: GridLayout, values: Vec<T>) -> Result<Self> {
        if values.len() != layout.len() {
            return Err(AttributionError::invalid_dimension(format!(
                "expected {} cell values for a {}x{} grid, got {}",
                layout.len(),
                layout.x_len(),
                layout.y_len(),
                values.len()
            )));
        }
        Ok(Self { layout, values })
    }

    #[inline]
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }

    /// # Panics
    ///
    /// If `cell` lies outside the layout. Use [`Grid::try_get`] for indices
    /// that were not produced by this grid's layout.
    #[inline]
    pub fn get(&self, cell: CellIndex) -> &T {
        &self.values[self.checked_linear(cell)]
    }

    /// # Panics
    ///
    /// If `cell` lies outside the layout.
    #[inline]
    pub fn get_mut(&mut self, cell: CellIndex) -> &mut T {
        let idx = self.checked_linear(cell);
        &mut self.values[idx]
    }

    #[inline]
    fn checked_linear(&self, cell: CellIndex) -> usize {
        assert!(
            self.layout.contains_cell(cell),
            "cell ({}, {}) outside {}x{} grid",
            cell.xi,
            cell.yi,
            self.layout.x_len(),
            self.layout.y_len()
        );
        self.layout.linear_index(cell)
    }

    pub fn try_get(&self, cell: CellIndex) -> Option<&T> {
        if self.layout.contains_cell(cell) {
            Some(self.get(cell))
        } else {
            None
        }
    }

    #[inline]
    pub fn set(&mut self, cell: CellIndex, value: T) {
        *self.get_mut(cell) = value;
    }

    pub fn get_by_coord(&self, x: f64, y: f64) -> Result<&T> {
        let cell = self.layout.checked_index_of(x, y)?;
        Ok(self.get(cell))
    }

    pub fn get_mut_by_coord(&mut self, x: f64, y: f64) -> Result<&mut T> {
        let cell = self.layout.checked_index_of(x, y)?;
        Ok(self.get_mut(cell))
    }

    pub fn set_by_coord(&mut self, x: f64, y: f64, value: T) -> Result<()> {
        *self.get_mut_by_coord(x, y)? = value;
        Ok(())
    }

    /// Row-major iteration over cells and values.
    pub fn iter(&self) -> impl Iterator<Item = (CellIndex, &T)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(move |(idx, value)| (self.layout.cell_at(idx), value))
    }

    /// Visit every cell with its corner coordinate, x outer and y inner.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(CellIndex, Coord<f64>, &T),
    {
        for xi in 0..self.layout.x_len() {
            for yi in 0..self.layout.y_len() {
                let cell = CellIndex { xi, yi };
                visitor(cell, self.layout.corner_of(cell), self.get(cell));
            }
        }
    }

    /// Replace every value with `f(value)`.
    pub fn transform<F>(&mut self, mut f: F)
    where
        F: FnMut(&T) -> T,
    {
        for value in &mut self.values {
            *value = f(value);
        }
    }

    pub fn map<U, F>(&self, mut f: F) -> Grid<U>
    where
        F: FnMut(CellIndex, &T) -> U,
    {
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(idx, value)| f(self.layout.cell_at(idx), value))
            .collect();
        Grid {
            layout: self.layout,
            values,
        }
    }
}

impl<T: AddAssign + Copy> Grid<T> {
    #[inline]
    pub fn accumulate(&mut self, cell: CellIndex, value: T) {
        *self.get_mut(cell) += value;
    }

    pub fn accumulate_by_coord(&mut self, x: f64, y: f64, value: T) -> Result<()> {
        *self.get_mut_by_coord(x, y)? += value;
        Ok(())
    }
}

/// Parallel variants. Visitors run in no particular order and must not depend
/// on other cells; `par_map` writes into an independent output grid.
impl<T: Send + Sync> Grid<T> {
    /// Fill a new grid by evaluating `f` for every cell.
    pub fn par_from_fn<F>(layout: GridLayout, f: F) -> Self
    where
        F: Fn(CellIndex) -> T + Send + Sync,
    {
        let values = (0..layout.len())
            .into_par_iter()
            .map(|idx| f(layout.cell_at(idx)))
            .collect();
        Self { layout, values }
    }

    pub fn par_for_each<F>(&self, visitor: F)
    where
        F: Fn(CellIndex, Coord<f64>, &T) + Send + Sync,
    {
        let layout = self.layout;
        self.values.par_iter().enumerate().for_each(|(idx, value)| {
            let cell = layout.cell_at(idx);
            visitor(cell, layout.corner_of(cell), value);
        });
    }

    pub fn par_transform<F>(&mut self, f: F)
    where
        F: Fn(&T) -> T + Send + Sync,
    {
        self.values.par_iter_mut().for_each(|value| *value = f(value));
    }

    pub fn par_map<U, F>(&self, f: F) -> Grid<U>
    where
        U: Send,
        F: Fn(CellIndex, &T) -> U + Send + Sync,
    {
        let layout = self.layout;
        let values = self
            .values
            .par_iter()
            .enumerate()
            .map(|(idx, value)| f(layout.cell_at(idx), value))
            .collect();
        Grid { layout, values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::sync::Mutex;

    fn bounds(max_x: f64, max_y: f64) -> Bounds {
        Bounds::new(0.0, 0.0, max_x, max_y).unwrap()
    }

    #[test]
    fn dimensions_follow_floor_plus_one() {
        let layout = GridLayout::new(bounds(10.0, 25.0), 10.0).unwrap();
        assert_eq!(layout.x_len(), 2);
        assert_eq!(layout.y_len(), 3);
        assert_eq!(layout.len(), 6);
    }

    #[test]
    fn non_positive_cell_size_is_rejected() {
        for cell_size in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                GridLayout::new(bounds(10.0, 10.0), cell_size),
                Err(AttributionError::InvalidDimension { .. })
            ));
        }
    }

    #[test]
    fn oversized_layouts_are_rejected() {
        let err = GridLayout::new(bounds(1e10, 1e10), 1e-300).unwrap_err();
        assert!(matches!(err, AttributionError::InvalidDimension { .. }));
        let err = GridLayout::new(bounds(1e6, 1e6), 1.0).unwrap_err();
        assert!(matches!(err, AttributionError::InvalidDimension { .. }));
    }

    #[test]
    #[should_panic(expected = "outside 3x3 grid")]
    fn get_past_row_end_panics_instead_of_wrapping() {
        let grid = Grid::new(bounds(20.0, 20.0), 10.0, 0.0).unwrap();
        // Linear index 3 is in range, but xi = 3 is not.
        grid.get(CellIndex::new(3, 0));
    }

    #[test]
    fn index_round_trips_through_set_and_get() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            let cell_size = rng.gen_range(0.5_f64..20.0);
            let mut grid = Grid::new(bounds(100.0, 60.0), cell_size, -1.0).unwrap();
            for _ in 0..200 {
                let x = rng.gen_range(0.0_f64..=100.0);
                let y = rng.gen_range(0.0_f64..=60.0);
                let cell = grid.layout().checked_index_of(x, y).unwrap();
                assert!(grid.layout().contains_cell(cell));
                let value = rng.gen_range(0.0_f64..1000.0);
                grid.set(cell, value);
                assert_eq!(*grid.get(grid.layout().index_of(x, y)), value);
                assert_eq!(*grid.get_by_coord(x, y).unwrap(), value);
            }
        }
    }

    #[test]
    fn cell_center_maps_back_to_its_cell() {
        let layout = GridLayout::new(bounds(95.0, 42.0), 7.5).unwrap();
        for idx in 0..layout.len() {
            let cell = layout.cell_at(idx);
            let center = layout.center_of(cell);
            assert_eq!(layout.index_of(center.x, center.y), cell);
            assert_eq!(layout.linear_index(cell), idx);
        }
    }

    #[test]
    fn receptor_bounds_span_cell_centers() {
        let layout = GridLayout::new(bounds(10.0, 25.0), 10.0).unwrap();
        let receptors = layout.receptor_bounds();
        assert_eq!(receptors.min_x(), 5.0);
        assert_eq!(receptors.max_x(), 15.0);
        assert_eq!(receptors.max_y(), 25.0);
        assert!(receptors.max_x() > layout.bounds().max_x());
    }

    #[test]
    fn out_of_range_writes_fail() {
        let mut grid = Grid::new(bounds(10.0, 10.0), 5.0, 0.0).unwrap();
        let err = grid.set_by_coord(11.0, 2.0, 1.0).unwrap_err();
        assert!(matches!(err, AttributionError::OutOfRangeCoordinate { .. }));
        assert!(grid.accumulate_by_coord(-0.1, 2.0, 1.0).is_err());
        assert!(grid.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn accumulate_adds_in_place() {
        let mut grid = Grid::new(bounds(10.0, 10.0), 5.0, 0.0).unwrap();
        grid.accumulate_by_coord(1.0, 1.0, 2.5).unwrap();
        grid.accumulate_by_coord(4.0, 4.0, 2.5).unwrap();
        assert_eq!(*grid.get(CellIndex::new(0, 0)), 5.0);
    }

    #[test]
    fn for_each_visits_x_outer_y_inner_with_corners() {
        let grid = Grid::new(Bounds::new(100.0, 200.0, 110.0, 205.0).unwrap(), 5.0, 0u8).unwrap();
        let mut visited = Vec::new();
        grid.for_each(|cell, corner, _| visited.push((cell.xi, cell.yi, corner.x, corner.y)));
        assert_eq!(
            visited,
            vec![
                (0, 0, 100.0, 200.0),
                (0, 1, 100.0, 205.0),
                (1, 0, 105.0, 200.0),
                (1, 1, 105.0, 205.0),
                (2, 0, 110.0, 200.0),
                (2, 1, 110.0, 205.0),
            ]
        );
    }

    #[test]
    fn identity_transform_is_idempotent() {
        let layout = GridLayout::new(bounds(30.0, 30.0), 10.0).unwrap();
        let values: Vec<f64> = (0..layout.len()).map(|i| i as f64 * 1.5 - 3.0).collect();
        let original = Grid::from_values(layout, values).unwrap();

        let mut sequential = original.clone();
        sequential.transform(|v| *v);
        assert_eq!(sequential, original);

        let mut parallel = original.clone();
        parallel.par_transform(|v| *v);
        assert_eq!(parallel, original);
    }

    #[test]
    fn par_map_matches_sequential_map() {
        let layout = GridLayout::new(bounds(50.0, 20.0), 2.0).unwrap();
        let values: Vec<f64> = (0..layout.len()).map(|i| i as f64).collect();
        let grid = Grid::from_values(layout, values).unwrap();

        let sequential = grid.map(|cell, v| v * 2.0 + cell.xi as f64);
        let parallel = grid.par_map(|cell, v| v * 2.0 + cell.xi as f64);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn par_for_each_visits_every_cell_once() {
        let grid = Grid::new(bounds(20.0, 20.0), 1.0, 1u32).unwrap();
        let seen = Mutex::new(Vec::new());
        grid.par_for_each(|cell, _, _| seen.lock().unwrap().push(grid.layout().linear_index(cell)));
        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..grid.layout().len()).collect::<Vec<_>>());
    }

    #[test]
    fn from_values_checks_length() {
        let layout = GridLayout::new(bounds(10.0, 10.0), 10.0).unwrap();
        assert!(Grid::from_values(layout, vec![0.0; 3]).is_err());
        assert!(Grid::from_values(layout, vec![0.0; 4]).is_ok());
    }
}
