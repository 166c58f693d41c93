//! Attribution of field values to the network links that plausibly caused them.
//!
//! The candidate cache (which links can reach which cell) depends only on
//! geometry, so it is built once per grid layout and shared read-only by every
//! bucket and species scan. Each time bucket owns its own ledger; species of the
//! same bucket accumulate into it concurrently.

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashMap;
use attribution_schema::LinkValueRow;
use dashmap::DashMap;
use geo::Geometry;
use rayon::prelude::*;

use crate::config::LinkAttributionConfig;
use crate::error::{AttributionError, Result};
use crate::field::{ConcentrationField, Species, SpeciesGrids};
use crate::grid::{CellIndex, Grid, GridLayout};
use crate::kernel::SmoothingKernel;
use crate::network::{Link, LinkId, Network};
use crate::spatial_index::{SpatialIndex, SpatialPredicate};
use crate::time_bins::{TimeBin, TimeBinMap};

/// Attributed amount per species for one link in one bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkValue {
    values: BTreeMap<Species, f64>,
}

impl LinkValue {
    pub fn add(&mut self, species: &Species, amount: f64) {
        match self.values.get_mut(species) {
            Some(total) => *total += amount,
            None => {
                self.values.insert(species.clone(), amount);
            }
        }
    }

    /// Zero for species never attributed to this link.
    pub fn get(&self, species: &Species) -> f64 {
        self.values.get(species).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Species, f64)> + '_ {
        self.values.iter().map(|(species, value)| (species, *value))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub type LinkBucket = BTreeMap<LinkId, LinkValue>;

/// Per-bucket, per-link, per-species attributed amounts.
#[derive(Debug, Clone)]
pub struct LinkLedger {
    bins: TimeBinMap<LinkBucket>,
}

impl LinkLedger {
    pub fn new(bin_size: f64, origin: f64) -> Self {
        Self {
            bins: TimeBinMap::with_origin(bin_size, origin),
        }
    }

    pub fn bins(&self) -> &TimeBinMap<LinkBucket> {
        &self.bins
    }

    pub fn bin_size(&self) -> f64 {
        self.bins.bin_size()
    }

    pub fn add(&mut self, time: f64, link: &LinkId, species: &Species, amount: f64) {
        self.bins
            .get_or_default(time)
            .value_mut()
            .entry(link.clone())
            .or_default()
            .add(species, amount);
    }

    pub fn value(&self, time: f64, link: &LinkId, species: &Species) -> f64 {
        self.bins
            .get(time)
            .and_then(|bin| bin.value().get(link))
            .map_or(0.0, |value| value.get(species))
    }

    pub fn species(&self) -> BTreeSet<Species> {
        self.bins
            .iter()
            .flat_map(|bin| bin.value().values())
            .flat_map(|value| value.values.keys().cloned())
            .collect()
    }

    /// Sum over every bucket and link.
    pub fn total(&self, species: &Species) -> f64 {
        self.bins
            .iter()
            .flat_map(|bin| bin.value().values())
            .map(|value| value.get(species))
            .sum()
    }

    /// Tabular rows ordered by bucket start, then link id.
    pub fn rows(&self) -> Vec<LinkValueRow> {
        self.bins
            .iter()
            .flat_map(|bin| {
                bin.value().iter().map(move |(link, value)| LinkValueRow {
                    link_id: link.to_string(),
                    time: bin.start_time(),
                    values: value
                        .iter()
                        .map(|(species, amount)| (species.to_string(), amount))
                        .collect(),
                })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

/// Immutable attribution context for one grid layout: the links that can reach
/// the field and, per cell, which of them do.
#[derive(Debug)]
pub struct LinkAttributor {
    links: Vec<Link>,
    candidates: Grid<Vec<usize>>,
    kernel: SmoothingKernel,
}

impl LinkAttributor {
    pub fn build(
        network: &Network,
        layout: GridLayout,
        settings: &LinkAttributionConfig,
    ) -> Result<Self> {
        let kernel = SmoothingKernel::new(settings.smoothing_radius)?;
        let search_radius = settings.search_radius;
        if !search_radius.is_finite() || search_radius <= 0.0 {
            return Err(AttributionError::invalid_dimension(format!(
                "search radius must be positive, got {search_radius}"
            )));
        }

        let receptors = layout.receptor_bounds();
        let links: Vec<Link> = network
            .links()
            .iter()
            .filter(|link| link.bounds().expanded_by(search_radius).intersects(&receptors))
            .cloned()
            .collect();

        let index = SpatialIndex::build(0..links.len(), |idx| {
            Geometry::Polygon(links[*idx].buffer(search_radius, settings.buffer_segments))
        });

        let candidates = Grid::par_from_fn(layout, |cell| {
            let mut found: Vec<usize> = index
                .query_point(layout.center_of(cell), SpatialPredicate::Covers)
                .into_iter()
                .copied()
                .collect();
            found.sort_unstable();
            found
        });

        tracing::info!(
            target: "attribution::links",
            network_links = network.len(),
            indexed_links = index.len(),
            skipped = index.skipped(),
            cells = layout.len(),
            covered_cells = candidates.values().iter().filter(|c| !c.is_empty()).count(),
            "link_cache.built"
        );

        Ok(Self {
            links,
            candidates,
            kernel,
        })
    }

    pub fn layout(&self) -> &GridLayout {
        self.candidates.layout()
    }

    pub fn kernel(&self) -> SmoothingKernel {
        self.kernel
    }

    /// Links whose reach covers the center of `cell`.
    pub fn candidates_at(&self, cell: CellIndex) -> impl Iterator<Item = &Link> + '_ {
        self.candidates
            .get(cell)
            .iter()
            .map(move |idx| &self.links[*idx])
    }

    /// Attribute every bucket and species of `field` to links.
    ///
    /// Any failure aborts the whole run; the error names the bucket and species.
    pub fn attribute(&self, field: &ConcentrationField) -> Result<LinkLedger> {
        if field.layout() != self.layout() {
            return Err(AttributionError::invalid_dimension(
                "field layout differs from the layout of the candidate cache",
            ));
        }

        let bins: Vec<&TimeBin<SpeciesGrids>> = field.bins().iter().collect();
        let buckets = bins
            .par_iter()
            .map(|bin| self.attribute_bucket(bin))
            .collect::<Result<Vec<_>>>()?;

        let bins = TimeBinMap::from_entries(
            field.bin_size(),
            field.bins().origin(),
            buckets,
            |existing: &mut LinkBucket, more| existing.extend(more),
        );
        Ok(LinkLedger { bins })
    }

    fn attribute_bucket(&self, bin: &TimeBin<SpeciesGrids>) -> Result<(f64, LinkBucket)> {
        let start_time = bin.start_time();
        let ledger: DashMap<LinkId, LinkValue, ahash::RandomState> =
            DashMap::with_hasher(ahash::RandomState::new());

        bin.value().par_iter().try_for_each(|(species, grid)| {
            self.scan_species(grid, species, &ledger)
                .map_err(|err| err.in_bucket(start_time, species))
        })?;

        let bucket: LinkBucket = ledger.into_iter().collect();
        tracing::debug!(
            target: "attribution::links",
            start_time,
            species = bin.value().len(),
            links = bucket.len(),
            "attribution.bucket_done"
        );
        Ok((start_time, bucket))
    }

    fn scan_species(
        &self,
        grid: &Grid<f64>,
        species: &Species,
        ledger: &DashMap<LinkId, LinkValue, ahash::RandomState>,
    ) -> Result<()> {
        let layout = grid.layout();
        let mut local: AHashMap<usize, f64> = AHashMap::new();

        for (linear, value) in grid.values().iter().enumerate() {
            // Zero and below carry no attributable mass.
            if *value <= 0.0 {
                continue;
            }
            let cell = layout.cell_at(linear);
            let receptor = layout.center_of(cell);
            for idx in self.candidates.get(cell) {
                let weight = self.kernel.weight(&self.links[*idx], receptor)?;
                if weight > 0.0 {
                    *local.entry(*idx).or_insert(0.0) += value * weight;
                }
            }
        }

        for (idx, amount) in local {
            ledger
                .entry(self.links[idx].id.clone())
                .or_default()
                .add(species, amount);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Bounds;
    use geo::Coord;

    fn settings() -> LinkAttributionConfig {
        LinkAttributionConfig {
            smoothing_radius: 20.0,
            search_radius: 30.0,
            buffer_segments: 8,
        }
    }

    fn layout() -> GridLayout {
        GridLayout::new(Bounds::new(0.0, 0.0, 10.0, 10.0).unwrap(), 10.0).unwrap()
    }

    fn link(id: &str, from: (f64, f64), to: (f64, f64)) -> Link {
        let from = Coord { x: from.0, y: from.1 };
        let to = Coord { x: to.0, y: to.1 };
        let length = ((to.x - from.x).powi(2) + (to.y - from.y).powi(2)).sqrt();
        Link::new(id, from, to, length)
    }

    fn field_with(values: Vec<f64>) -> ConcentrationField {
        let mut field = ConcentrationField::new(layout(), 3600.0, 0.0);
        field
            .insert(0.0, Species::from("NO2"), Grid::from_values(layout(), values).unwrap())
            .unwrap();
        field
    }

    #[test]
    fn distant_links_are_not_indexed() {
        let network = Network::new(vec![
            link("near", (0.0, 5.0), (10.0, 5.0)),
            link("far", (500.0, 500.0), (600.0, 500.0)),
        ])
        .unwrap();
        let attributor = LinkAttributor::build(&network, layout(), &settings()).unwrap();
        assert_eq!(attributor.links.len(), 1);
        let ids: Vec<_> = attributor
            .candidates_at(CellIndex::new(0, 0))
            .map(|l| l.id.to_string())
            .collect();
        assert_eq!(ids, vec!["near"]);
    }

    #[test]
    fn single_hot_cell_is_attributed_to_the_link_below_it() {
        let network = Network::new(vec![
            link("under", (0.0, 5.0), (10.0, 5.0)),
            // Indexed, but its reach misses the hot cell's center.
            link("edge", (0.0, 38.0), (10.0, 38.0)),
        ])
        .unwrap();
        let attributor = LinkAttributor::build(&network, layout(), &settings()).unwrap();
        assert_eq!(attributor.links.len(), 2);

        let mut values = vec![-1.0; 4];
        values[0] = 1000.0;
        let ledger = attributor.attribute(&field_with(values)).unwrap();

        let no2 = Species::from("NO2");
        let under = LinkId::from("under");
        let expected = 1000.0
            * attributor
                .kernel()
                .weight(&network.links()[0], Coord { x: 5.0, y: 5.0 })
                .unwrap();
        assert!(expected > 0.0);
        assert!((ledger.value(0.0, &under, &no2) - expected).abs() < 1e-9);
        assert_eq!(ledger.value(0.0, &LinkId::from("edge"), &no2), 0.0);
        assert_eq!(ledger.bins().get(0.0).unwrap().value().len(), 1);
    }

    #[test]
    fn link_reaching_only_an_edge_receptor_is_indexed() {
        // Top row centers sit at y = 15, past the bounds' max_y of 10. The
        // link's reach ends at y = 14.
        let network = Network::new(vec![link("north", (0.0, 44.0), (20.0, 44.0))]).unwrap();
        let attributor = LinkAttributor::build(&network, layout(), &settings()).unwrap();
        let ids: Vec<_> = attributor
            .candidates_at(CellIndex::new(0, 1))
            .map(|l| l.id.to_string())
            .collect();
        assert_eq!(ids, vec!["north"]);

        let mut values = vec![-1.0; 4];
        values[2] = 1000.0;
        let ledger = attributor.attribute(&field_with(values)).unwrap();
        let expected = 1000.0
            * attributor
                .kernel()
                .weight(&network.links()[0], Coord { x: 5.0, y: 15.0 })
                .unwrap();
        let value = ledger.value(0.0, &LinkId::from("north"), &Species::from("NO2"));
        assert!(value > 0.0);
        assert!((value - expected).abs() < 1e-9);
    }

    #[test]
    fn no_data_field_produces_empty_buckets() {
        let network = Network::new(vec![link("under", (0.0, 5.0), (10.0, 5.0))]).unwrap();
        let attributor = LinkAttributor::build(&network, layout(), &settings()).unwrap();
        let ledger = attributor.attribute(&field_with(vec![-1.0, 0.0, -5.0, 0.0])).unwrap();
        assert!(ledger.rows().is_empty());
        assert_eq!(ledger.total(&Species::from("NO2")), 0.0);
    }

    #[test]
    fn kernel_failure_names_bucket_and_species() {
        // Non-zero geometric extent with a zero physical length.
        let network = Network::new(vec![Link::new(
            "broken",
            Coord { x: 0.0, y: 5.0 },
            Coord { x: 10.0, y: 5.0 },
            0.0,
        )])
        .unwrap();
        let attributor = LinkAttributor::build(&network, layout(), &settings()).unwrap();
        let err = attributor.attribute(&field_with(vec![1.0; 4])).unwrap_err();
        match err {
            AttributionError::Bucket {
                start_time,
                species,
                source,
            } => {
                assert_eq!(start_time, 0.0);
                assert_eq!(species, Species::from("NO2"));
                assert!(matches!(*source, AttributionError::InvalidDimension { .. }));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn ledger_rows_are_sorted_by_time_then_link() {
        let mut ledger = LinkLedger::new(3600.0, 0.0);
        let no2 = Species::from("NO2");
        ledger.add(4000.0, &LinkId::from("b"), &no2, 1.0);
        ledger.add(10.0, &LinkId::from("b"), &no2, 2.0);
        ledger.add(20.0, &LinkId::from("a"), &no2, 3.0);
        ledger.add(30.0, &LinkId::from("a"), &no2, 0.5);

        let rows = ledger.rows();
        let keys: Vec<_> = rows.iter().map(|r| (r.time, r.link_id.as_str())).collect();
        assert_eq!(keys, vec![(0.0, "a"), (0.0, "b"), (3600.0, "b")]);
        assert_eq!(rows[0].values["NO2"], 3.5);
        assert_eq!(ledger.total(&no2), 6.5);
    }

    #[test]
    fn mismatched_field_layout_is_rejected() {
        let network = Network::new(vec![link("under", (0.0, 5.0), (10.0, 5.0))]).unwrap();
        let attributor = LinkAttributor::build(&network, layout(), &settings()).unwrap();
        let other = GridLayout::new(Bounds::new(0.0, 0.0, 20.0, 20.0).unwrap(), 10.0).unwrap();
        let field = ConcentrationField::new(other, 3600.0, 0.0);
        assert!(attributor.attribute(&field).is_err());
    }
}
