//! Exposure of persons to the concentration field.
//!
//! Activities are located on the grid (optionally snapped to the nearest known
//! location first) and collected into one [`Tile`] per occupied cell. Person-time
//! in a cell, multiplied by the cell's concentration, yields an exposure field
//! with the same shape as the concentration field; that field can be fed
//! straight into [`crate::LinkAttributor`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use attribution_schema::{ActivityRecord, LocationSet, PersonExposureRow};
use geo::Coord;
use rayon::prelude::*;

use crate::config::ExposureConfig;
use crate::error::{AttributionError, Result};
use crate::field::{ConcentrationField, Species, SpeciesGrids};
use crate::grid::{CellIndex, Grid, GridLayout};
use crate::spatial_index::PointIndex;
use crate::tile::{ActivityInterval, Tile};
use crate::time_bins::{TimeBin, TimeBinMap};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PersonId(Arc<str>);

impl PersonId {
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PersonId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Known discrete locations (facilities) activities snap to.
#[derive(Debug)]
pub struct KnownLocations {
    index: PointIndex<String>,
}

impl KnownLocations {
    pub fn from_records(set: &LocationSet) -> Self {
        Self {
            index: PointIndex::build(
                set.locations
                    .iter()
                    .map(|loc| (Coord { x: loc.x, y: loc.y }, loc.id.clone())),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Coordinate of the nearest known location, or `at` if none are known.
    pub fn snap(&self, at: Coord<f64>) -> Coord<f64> {
        self.index.nearest(at).map_or(at, |(coord, _)| coord)
    }
}

#[derive(Debug, Clone)]
struct LocatedActivity {
    person: PersonId,
    cell: CellIndex,
    interval: ActivityInterval,
}

/// Activities located on a grid layout, with one tile per occupied cell.
#[derive(Debug, Clone)]
pub struct ActivityTiles {
    tiles: Grid<Option<Tile>>,
    activities: Vec<LocatedActivity>,
    skipped: usize,
}

impl ActivityTiles {
    /// Locate every activity on `layout`. With `locations`, coordinates first
    /// snap to the nearest known location. Activities that land outside the
    /// layout are dropped and counted in [`Self::skipped`].
    pub fn build(
        layout: GridLayout,
        activities: &[ActivityRecord],
        locations: Option<&KnownLocations>,
    ) -> Self {
        let mut tiles: Grid<Option<Tile>> = Grid::with_layout(layout, None);
        let mut located = Vec::with_capacity(activities.len());
        let mut skipped = 0;

        for record in activities {
            let raw = Coord {
                x: record.x,
                y: record.y,
            };
            let at = locations.map_or(raw, |known| known.snap(raw));
            let cell = match layout.checked_index_of(at.x, at.y) {
                Ok(cell) => cell,
                Err(err) => {
                    tracing::debug!(
                        target: "attribution::exposure",
                        person = %record.person_id,
                        error = %err,
                        "exposure.activity_outside_grid"
                    );
                    skipped += 1;
                    continue;
                }
            };

            tiles
                .get_mut(cell)
                .get_or_insert_with(Tile::new)
                .add_activity(record.start_time, record.end_time);
            located.push(LocatedActivity {
                person: PersonId::new(&record.person_id),
                cell,
                interval: ActivityInterval::new(record.start_time, record.end_time),
            });
        }

        let built = Self {
            tiles,
            activities: located,
            skipped,
        };
        tracing::info!(
            target: "attribution::exposure",
            activities = activities.len(),
            located = built.activities.len(),
            skipped,
            occupied_cells = built.occupied_cells(),
            "exposure.tiles_built"
        );
        built
    }

    /// Convenience wrapper honouring `settings.snap_to_locations`.
    pub fn from_records(
        layout: GridLayout,
        activities: &[ActivityRecord],
        locations: Option<&LocationSet>,
        settings: &ExposureConfig,
    ) -> Self {
        let known = locations
            .filter(|_| settings.snap_to_locations)
            .map(KnownLocations::from_records)
            .filter(|known| !known.is_empty());
        Self::build(layout, activities, known.as_ref())
    }

    pub fn layout(&self) -> &GridLayout {
        self.tiles.layout()
    }

    pub fn tile(&self, cell: CellIndex) -> Option<&Tile> {
        self.tiles.try_get(cell).and_then(Option::as_ref)
    }

    pub fn occupied_cells(&self) -> usize {
        self.tiles.values().iter().filter(|tile| tile.is_some()).count()
    }

    pub fn located(&self) -> usize {
        self.activities.len()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn check_layout(&self, field: &ConcentrationField) -> Result<()> {
        if field.layout() != self.layout() {
            return Err(AttributionError::invalid_dimension(
                "activity tiles and concentration field use different layouts",
            ));
        }
        Ok(())
    }

    /// Concentration times person-time per cell and bucket.
    ///
    /// No-data cells (negative concentration) keep their value, so downstream
    /// attribution still skips them; unoccupied cells get zero exposure.
    pub fn exposure_field(&self, field: &ConcentrationField) -> Result<ConcentrationField> {
        self.check_layout(field)?;
        let bin_size = field.bin_size();

        let bins: Vec<&TimeBin<SpeciesGrids>> = field.bins().iter().collect();
        let exposed: Vec<(f64, SpeciesGrids)> = bins
            .par_iter()
            .map(|bin| {
                let start = bin.start_time();
                let end = start + bin_size;
                let grids = bin
                    .value()
                    .iter()
                    .map(|(species, grid)| {
                        let exposure = grid.par_map(|cell, concentration| {
                            if *concentration < 0.0 {
                                return *concentration;
                            }
                            match self.tile(cell) {
                                Some(tile) => concentration * tile.spent_time(start, end),
                                None => 0.0,
                            }
                        });
                        (species.clone(), exposure)
                    })
                    .collect();
                (start, grids)
            })
            .collect();

        let bins = TimeBinMap::from_entries(
            bin_size,
            field.bins().origin(),
            exposed,
            |existing: &mut SpeciesGrids, more| existing.extend(more),
        );
        Ok(ConcentrationField::from_bins(*field.layout(), bins))
    }

    /// Exposure of every located person per bucket and species.
    pub fn person_exposure(&self, field: &ConcentrationField) -> Result<PersonExposureLedger> {
        self.check_layout(field)?;
        let bin_size = field.bin_size();

        let bins: Vec<&TimeBin<SpeciesGrids>> = field.bins().iter().collect();
        let per_bucket: Vec<(f64, PersonBucket)> = bins
            .par_iter()
            .map(|bin| {
                let start = bin.start_time();
                let end = start + bin_size;
                let mut bucket = PersonBucket::new();
                for activity in &self.activities {
                    let overlap = activity.interval.overlap(start, end);
                    if overlap <= 0.0 {
                        continue;
                    }
                    for (species, grid) in bin.value() {
                        let concentration = *grid.get(activity.cell);
                        if concentration < 0.0 {
                            continue;
                        }
                        *bucket
                            .entry(activity.person.clone())
                            .or_default()
                            .entry(species.clone())
                            .or_insert(0.0) += concentration * overlap;
                    }
                }
                (start, bucket)
            })
            .collect();

        Ok(PersonExposureLedger {
            bins: TimeBinMap::from_entries(
                bin_size,
                field.bins().origin(),
                per_bucket,
                |existing: &mut PersonBucket, more| existing.extend(more),
            ),
        })
    }
}

pub type PersonBucket = BTreeMap<PersonId, BTreeMap<Species, f64>>;

/// Per-bucket, per-person, per-species exposure.
#[derive(Debug, Clone)]
pub struct PersonExposureLedger {
    bins: TimeBinMap<PersonBucket>,
}

impl PersonExposureLedger {
    pub fn bins(&self) -> &TimeBinMap<PersonBucket> {
        &self.bins
    }

    pub fn value(&self, time: f64, person: &PersonId, species: &Species) -> f64 {
        self.bins
            .get(time)
            .and_then(|bin| bin.value().get(person))
            .and_then(|values| values.get(species))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn species(&self) -> BTreeSet<Species> {
        self.bins
            .iter()
            .flat_map(|bin| bin.value().values())
            .flat_map(|values| values.keys().cloned())
            .collect()
    }

    /// Rows ordered by bucket start, then person id.
    pub fn rows(&self) -> Vec<PersonExposureRow> {
        self.bins
            .iter()
            .flat_map(|bin| {
                bin.value().iter().map(move |(person, values)| PersonExposureRow {
                    person_id: person.to_string(),
                    time: bin.start_time(),
                    values: values
                        .iter()
                        .map(|(species, value)| (species.to_string(), *value))
                        .collect(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Bounds;
    use attribution_schema::LocationRecord;

    fn layout() -> GridLayout {
        // 3 x 3 cells of 10 units.
        GridLayout::new(Bounds::new(0.0, 0.0, 20.0, 20.0).unwrap(), 10.0).unwrap()
    }

    fn activity(person: &str, x: f64, y: f64, start: Option<f64>, end: Option<f64>) -> ActivityRecord {
        ActivityRecord {
            person_id: person.to_string(),
            x,
            y,
            start_time: start,
            end_time: end,
        }
    }

    fn uniform_field(value: f64) -> ConcentrationField {
        let mut field = ConcentrationField::new(layout(), 3600.0, 0.0);
        for time in [0.0, 3600.0] {
            field
                .insert(time, Species::from("NO2"), Grid::with_layout(layout(), value))
                .unwrap();
        }
        field
    }

    #[test]
    fn tiles_collect_activities_per_cell() {
        let tiles = ActivityTiles::build(
            layout(),
            &[
                activity("p1", 1.0, 1.0, Some(0.0), Some(100.0)),
                activity("p2", 2.0, 3.0, Some(50.0), None),
                activity("p3", 15.0, 15.0, None, Some(10.0)),
                activity("lost", 500.0, 500.0, None, None),
            ],
            None,
        );
        assert_eq!(tiles.located(), 3);
        assert_eq!(tiles.skipped(), 1);
        assert_eq!(tiles.occupied_cells(), 2);
        assert_eq!(tiles.tile(CellIndex::new(0, 0)).unwrap().len(), 2);
        assert!(tiles.tile(CellIndex::new(2, 2)).is_none());
    }

    #[test]
    fn activities_snap_to_nearest_location() {
        let locations = LocationSet {
            locations: vec![LocationRecord {
                id: "home".to_string(),
                x: 15.0,
                y: 5.0,
            }],
        };
        let tiles = ActivityTiles::from_records(
            layout(),
            &[activity("p1", 1.0, 1.0, None, None)],
            Some(&locations),
            &ExposureConfig {
                snap_to_locations: true,
            },
        );
        assert!(tiles.tile(CellIndex::new(0, 0)).is_none());
        assert!(tiles.tile(CellIndex::new(1, 0)).is_some());

        let unsnapped = ActivityTiles::from_records(
            layout(),
            &[activity("p1", 1.0, 1.0, None, None)],
            Some(&locations),
            &ExposureConfig {
                snap_to_locations: false,
            },
        );
        assert!(unsnapped.tile(CellIndex::new(0, 0)).is_some());
    }

    #[test]
    fn exposure_multiplies_concentration_by_spent_time() {
        let tiles = ActivityTiles::build(
            layout(),
            &[activity("p1", 5.0, 5.0, Some(1800.0), Some(5400.0))],
            None,
        );
        let no_data = CellIndex::new(2, 2);
        let mut first = Grid::with_layout(layout(), 2.0);
        first.set(no_data, -1.0);
        let mut field = ConcentrationField::new(layout(), 3600.0, 0.0);
        field.insert(0.0, Species::from("NO2"), first).unwrap();
        field
            .insert(3600.0, Species::from("NO2"), Grid::with_layout(layout(), 2.0))
            .unwrap();

        let exposure = tiles.exposure_field(&field).unwrap();
        let no2 = Species::from("NO2");
        let early = exposure.grid(0.0, &no2).unwrap();
        let late = exposure.grid(3600.0, &no2).unwrap();

        assert_eq!(*early.get(CellIndex::new(0, 0)), 2.0 * 1800.0);
        assert_eq!(*late.get(CellIndex::new(0, 0)), 2.0 * 1800.0);
        assert_eq!(*early.get(CellIndex::new(1, 1)), 0.0);
        assert_eq!(*early.get(no_data), -1.0);
    }

    #[test]
    fn person_exposure_follows_each_activity() {
        let tiles = ActivityTiles::build(
            layout(),
            &[
                activity("p1", 5.0, 5.0, None, Some(900.0)),
                activity("p1", 15.0, 5.0, Some(900.0), Some(4500.0)),
                activity("p2", 5.0, 5.0, Some(3600.0), None),
            ],
            None,
        );
        let ledger = tiles.person_exposure(&uniform_field(0.5)).unwrap();
        let no2 = Species::from("NO2");
        let p1 = PersonId::from("p1");
        let p2 = PersonId::from("p2");

        assert_eq!(ledger.value(0.0, &p1, &no2), 0.5 * 3600.0);
        assert_eq!(ledger.value(3600.0, &p1, &no2), 0.5 * 900.0);
        assert_eq!(ledger.value(0.0, &p2, &no2), 0.0);
        assert_eq!(ledger.value(3600.0, &p2, &no2), 0.5 * 3600.0);

        let rows = ledger.rows();
        let keys: Vec<_> = rows.iter().map(|r| (r.time, r.person_id.as_str())).collect();
        assert_eq!(keys, vec![(0.0, "p1"), (3600.0, "p1"), (3600.0, "p2")]);
    }
}
