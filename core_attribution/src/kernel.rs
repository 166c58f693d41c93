//! Line-source smoothing kernel.
//!
//! A unit emission spread uniformly along the segment `A -> B` is smoothed with
//! a Gaussian of radius `R`. For a receptor `P` with perpendicular distance `d`
//! to the line through `A` and `B`, and signed projection `t` measured from `A`,
//! the weight is
//!
//! ```text
//! w = R * sqrt(pi) / (2 * L) * exp(-d^2 / R^2) * (erf((G - t) / R) + erf(t / R))
//! ```
//!
//! where `G = |AB|` and `L` is the physical link length. The erf difference is
//! the Gaussian mass collected between the two ends of the segment. When
//! `L == G` the weight lies in `[0, 1]`; it tends to the point kernel
//! `exp(-|AP|^2 / R^2)` as the segment shrinks.

use std::f64::consts::PI;

use geo::Coord;
use statrs::function::erf::erf;

use crate::error::{AttributionError, Result};
use crate::network::Link;

/// Point-source kernel for a receptor at `distance_sq` from the source.
#[inline]
pub fn point_weight(distance_sq: f64, radius: f64) -> f64 {
    (-distance_sq / (radius * radius)).exp()
}

/// Weight of the segment `from -> to` (physical length `length`) at `receptor`.
pub fn line_weight(
    from: Coord<f64>,
    to: Coord<f64>,
    receptor: Coord<f64>,
    length: f64,
    radius: f64,
) -> Result<f64> {
    if !(radius > 0.0) {
        return Err(AttributionError::invalid_dimension(format!(
            "smoothing radius must be positive, got {radius}"
        )));
    }

    let ab_x = to.x - from.x;
    let ab_y = to.y - from.y;
    let ap_x = receptor.x - from.x;
    let ap_y = receptor.y - from.y;
    let ap_sq = ap_x * ap_x + ap_y * ap_y;
    let geometric_sq = ab_x * ab_x + ab_y * ab_y;

    if geometric_sq == 0.0 {
        return Ok(point_weight(ap_sq, radius));
    }
    if !(length > 0.0) {
        return Err(AttributionError::invalid_dimension(format!(
            "segment length must be positive, got {length}"
        )));
    }

    let geometric = geometric_sq.sqrt();
    let t = (ap_x * ab_x + ap_y * ab_y) / geometric;
    // |AP|^2 - t^2 can dip below zero through rounding for on-line receptors.
    let d_sq = (ap_sq - t * t).max(0.0);

    let prefactor = radius * PI.sqrt() / (2.0 * length);
    let lateral = (-d_sq / (radius * radius)).exp();
    let along = erf((geometric - t) / radius) + erf(t / radius);

    Ok((prefactor * lateral * along).max(0.0))
}

/// Kernel with a fixed smoothing radius, evaluated against network links.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingKernel {
    radius: f64,
}

impl SmoothingKernel {
    pub fn new(radius: f64) -> Result<Self> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(AttributionError::invalid_dimension(format!(
                "smoothing radius must be positive, got {radius}"
            )));
        }
        Ok(Self { radius })
    }

    #[inline]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn weight(&self, link: &Link, receptor: Coord<f64>) -> Result<f64> {
        line_weight(link.from, link.to, receptor, link.length, self.radius)
    }
}
