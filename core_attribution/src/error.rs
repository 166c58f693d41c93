use thiserror::Error;

use crate::bounds::Bounds;
use crate::field::Species;

#[derive(Debug, Error)]
pub enum AttributionError {
    #[error("invalid dimension: {reason}")]
    InvalidDimension { reason: String },

    #[error("coordinate ({x}, {y}) lies outside grid bounds {bounds}")]
    OutOfRangeCoordinate { x: f64, y: f64, bounds: Bounds },

    #[error("no factor configured for species {species}")]
    UnknownSpecies { species: Species },

    #[error(
        "radius estimate did not converge after {iterations} iterations \
         (last radius {radius}, residual {residual})"
    )]
    NoConvergence {
        iterations: usize,
        radius: f64,
        residual: f64,
    },

    #[error("raster for {species} at t={time} does not match the field layout: {reason}")]
    MismatchedLayout {
        time: f64,
        species: Species,
        reason: String,
    },

    #[error("invalid link {id}: {reason}")]
    InvalidLink { id: String, reason: String },

    #[error("attribution failed for {species} in bucket starting at {start_time}: {source}")]
    Bucket {
        start_time: f64,
        species: Species,
        #[source]
        source: Box<AttributionError>,
    },
}

impl AttributionError {
    pub(crate) fn invalid_dimension(reason: impl Into<String>) -> Self {
        Self::InvalidDimension {
            reason: reason.into(),
        }
    }

    pub(crate) fn in_bucket(self, start_time: f64, species: &Species) -> Self {
        Self::Bucket {
            start_time,
            species: species.clone(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, AttributionError>;
