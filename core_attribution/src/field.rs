use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use attribution_schema::RasterRecord;
use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;
use crate::error::{AttributionError, Result};
use crate::grid::{Grid, GridLayout};
use crate::time_bins::TimeBinMap;

/// Named pollutant tracked independently through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Species(String);

impl Species {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Species {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type SpeciesGrids = BTreeMap<Species, Grid<f64>>;

/// Time-bucketed, per-species rasters sharing one layout.
///
/// Cell values below zero mark "no data" (including cells inside buildings);
/// values at or above zero are concentrations in the field's native units.
#[derive(Debug, Clone)]
pub struct ConcentrationField {
    layout: GridLayout,
    bins: TimeBinMap<SpeciesGrids>,
}

impl ConcentrationField {
    /// # Panics
    /// Panics if `bin_size` is not a positive finite number. Use
    /// [`ConcentrationField::from_records`] for unvalidated input.
    pub fn new(layout: GridLayout, bin_size: f64, origin: f64) -> Self {
        Self {
            layout,
            bins: TimeBinMap::with_origin(bin_size, origin),
        }
    }

    /// Build a field from dispersion-model rasters. The first raster fixes the
    /// layout; every other raster must match it.
    pub fn from_records(records: &[RasterRecord], bin_size: f64, origin: f64) -> Result<Self> {
        if !bin_size.is_finite() || bin_size <= 0.0 {
            return Err(AttributionError::invalid_dimension(format!(
                "time bin size must be positive, got {bin_size}"
            )));
        }
        if !origin.is_finite() {
            return Err(AttributionError::invalid_dimension(format!(
                "time bin origin must be finite, got {origin}"
            )));
        }
        let first = records.first().ok_or_else(|| {
            AttributionError::invalid_dimension("concentration field contains no rasters")
        })?;
        let bounds = Bounds::new(first.min_x, first.min_y, first.max_x, first.max_y)?;
        let layout = GridLayout::new(bounds, first.cell_size)?;

        let mut field = Self::new(layout, bin_size, origin);
        for record in records {
            let species = Species::new(record.species.clone());
            let bounds = Bounds::new(record.min_x, record.min_y, record.max_x, record.max_y)?;
            let record_layout = GridLayout::new(bounds, record.cell_size)?;
            if record_layout != layout {
                return Err(AttributionError::MismatchedLayout {
                    time: record.time,
                    species,
                    reason: format!(
                        "bounds {} / cell size {} differ from {} / {}",
                        bounds,
                        record.cell_size,
                        layout.bounds(),
                        layout.cell_size()
                    ),
                });
            }
            let grid = Grid::from_values(layout, record.values.clone()).map_err(|err| {
                AttributionError::MismatchedLayout {
                    time: record.time,
                    species: species.clone(),
                    reason: err.to_string(),
                }
            })?;
            field.insert(record.time, species, grid)?;
        }
        Ok(field)
    }

    /// Place a raster into the bucket containing `time`.
    pub fn insert(&mut self, time: f64, species: Species, grid: Grid<f64>) -> Result<()> {
        if grid.layout() != &self.layout {
            return Err(AttributionError::MismatchedLayout {
                time,
                species,
                reason: "grid layout differs from field layout".to_string(),
            });
        }
        let bin = self.bins.get_or_default(time);
        if bin.value().contains_key(&species) {
            return Err(AttributionError::MismatchedLayout {
                time,
                species,
                reason: format!("duplicate raster for bucket starting at {}", bin.start_time()),
            });
        }
        bin.value_mut().insert(species, grid);
        Ok(())
    }

    pub(crate) fn from_bins(layout: GridLayout, bins: TimeBinMap<SpeciesGrids>) -> Self {
        Self { layout, bins }
    }

    #[inline]
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn bins(&self) -> &TimeBinMap<SpeciesGrids> {
        &self.bins
    }

    pub fn bin_size(&self) -> f64 {
        self.bins.bin_size()
    }

    pub fn species(&self) -> BTreeSet<Species> {
        self.bins
            .iter()
            .flat_map(|bin| bin.value().keys().cloned())
            .collect()
    }

    pub fn grid(&self, time: f64, species: &Species) -> Option<&Grid<f64>> {
        self.bins
            .get(time)
            .and_then(|bin| bin.value().get(species))
    }
}
