//! Attribution of pollutant fields to network links and persons.
//!
//! A gridded, time-bucketed concentration field is distributed back onto the
//! links that plausibly produced it with a line-source smoothing kernel, and
//! priced into a per-link cost schedule. Person activities are turned into an
//! exposure field that goes through the same link attribution.

pub mod bounds;
pub mod config;
pub mod cost;
mod error;
pub mod exposure;
pub mod field;
pub mod grid;
pub mod kernel;
pub mod link_attribution;
pub mod network;
pub mod radius;
pub mod spatial_index;
pub mod tile;
pub mod time_bins;

pub use bounds::Bounds;
pub use config::{
    load_attribution_config_from_env, AttributionConfig, ConfigError, ConfigMetadata,
};
pub use cost::{CostFactors, CostSchedule, CostWindow};
pub use error::{AttributionError, Result};
pub use exposure::{ActivityTiles, KnownLocations, PersonExposureLedger, PersonId};
pub use field::{ConcentrationField, Species};
pub use grid::{CellIndex, Grid, GridLayout};
pub use kernel::SmoothingKernel;
pub use link_attribution::{LinkAttributor, LinkLedger, LinkValue};
pub use network::{Link, LinkId, Network};
pub use radius::{estimate_from_request, estimate_smoothing_radius, RadiusEstimate};
pub use spatial_index::{PointIndex, SpatialIndex, SpatialPredicate};
pub use tile::Tile;
pub use time_bins::{TimeBin, TimeBinMap};

/// Link ledger of one field together with its priced schedule.
#[derive(Debug, Clone)]
pub struct AttributionOutcome {
    pub ledger: LinkLedger,
    pub schedule: CostSchedule,
}

/// Everything derived from an activity log against one concentration field.
#[derive(Debug, Clone)]
pub struct ExposureOutcome {
    pub links: AttributionOutcome,
    pub persons: PersonExposureLedger,
}

/// Attribute `field` to the links of `attributor` and price the result.
pub fn attribute_and_price(
    attributor: &LinkAttributor,
    field: &ConcentrationField,
    factors: &CostFactors,
) -> Result<AttributionOutcome> {
    let ledger = attributor.attribute(field)?;
    let schedule = CostSchedule::from_ledger(&ledger, field.layout().cell_volume(), factors)?;
    Ok(AttributionOutcome { ledger, schedule })
}

/// Run exposure-based attribution: the exposure field derived from `tiles`
/// replaces the raw concentrations.
pub fn attribute_exposure(
    attributor: &LinkAttributor,
    field: &ConcentrationField,
    tiles: &ActivityTiles,
    factors: &CostFactors,
) -> Result<ExposureOutcome> {
    let exposure = tiles.exposure_field(field)?;
    let links = attribute_and_price(attributor, &exposure, factors)?;
    let persons = tiles.person_exposure(field)?;
    Ok(ExposureOutcome { links, persons })
}
