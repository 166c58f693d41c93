//! Offline calibration of the smoothing radius.
//!
//! Given emissions on the links feeding one receptor and the value observed at
//! that receptor, find `R` such that `sum(e_i * w_i(R)) == observed`. The
//! solver is Newton's method on a central-difference derivative, safeguarded
//! by bisection once the root is bracketed and by halving or doubling `R`
//! while it is not.

use attribution_schema::CalibrationRequest;
use geo::Coord;

use crate::config::RadiusEstimateConfig;
use crate::error::{AttributionError, Result};
use crate::kernel::line_weight;
use crate::network::Link;

/// Radius reproducing the observed value, with solver diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusEstimate {
    pub radius: f64,
    pub iterations: usize,
    /// `modelled - observed` at `radius`.
    pub residual: f64,
}

fn modelled(emissions: &[(Link, f64)], receptor: Coord<f64>, radius: f64) -> Result<f64> {
    emissions.iter().try_fold(0.0, |acc, (link, emission)| {
        let weight = line_weight(link.from, link.to, receptor, link.length, radius)?;
        Ok(acc + emission * weight)
    })
}

pub fn estimate_smoothing_radius(
    emissions: &[(Link, f64)],
    receptor: Coord<f64>,
    observed: f64,
    settings: &RadiusEstimateConfig,
) -> Result<RadiusEstimate> {
    if emissions.is_empty() {
        return Err(AttributionError::invalid_dimension(
            "radius estimation needs at least one emitting link",
        ));
    }
    if !observed.is_finite() {
        return Err(AttributionError::invalid_dimension(format!(
            "observed value must be finite, got {observed}"
        )));
    }
    if !(settings.initial_radius > 0.0) || !(settings.derivative_step > 0.0) {
        return Err(AttributionError::invalid_dimension(
            "initial radius and derivative step must be positive",
        ));
    }

    let residual_at = |radius: f64| modelled(emissions, receptor, radius).map(|v| v - observed);

    let mut radius = settings.initial_radius;
    let mut residual = f64::NAN;
    // Largest radius known to undershoot, smallest known to overshoot.
    let mut below: Option<f64> = None;
    let mut above: Option<f64> = None;

    for iteration in 1..=settings.max_iterations {
        residual = residual_at(radius)?;
        if residual.abs() <= settings.tolerance {
            tracing::debug!(
                target: "attribution::calibration",
                radius,
                iterations = iteration,
                residual,
                "radius_estimate.converged"
            );
            return Ok(RadiusEstimate {
                radius,
                iterations: iteration,
                residual,
            });
        }
        if residual < 0.0 {
            below = Some(below.map_or(radius, |b: f64| b.max(radius)));
        } else {
            above = Some(above.map_or(radius, |a: f64| a.min(radius)));
        }

        let step = settings.derivative_step.min(radius * 0.5);
        let slope = (residual_at(radius + step)? - residual_at(radius - step)?) / (2.0 * step);
        let newton = radius - residual / slope;
        let newton = (newton.is_finite() && newton > 0.0).then_some(newton);

        radius = match (below, above) {
            (Some(lo), Some(hi)) => match newton {
                Some(next) if next > lo && next < hi => next,
                _ => 0.5 * (lo + hi),
            },
            (Some(_), None) => match newton {
                Some(next) if next > radius => next.min(radius * 2.0),
                _ => radius * 2.0,
            },
            (None, Some(_)) => match newton {
                Some(next) if next < radius => next.max(radius * 0.5),
                _ => radius * 0.5,
            },
            (None, None) => radius,
        };
    }

    tracing::warn!(
        target: "attribution::calibration",
        iterations = settings.max_iterations,
        radius,
        residual,
        "radius_estimate.no_convergence"
    );
    Err(AttributionError::NoConvergence {
        iterations: settings.max_iterations,
        radius,
        residual,
    })
}

/// Run the estimator on a calibration request document.
pub fn estimate_from_request(
    request: &CalibrationRequest,
    settings: &RadiusEstimateConfig,
) -> Result<RadiusEstimate> {
    let emissions = request
        .emissions
        .iter()
        .map(|record| Ok((Link::from_record(&record.link)?, record.value)))
        .collect::<Result<Vec<_>>>()?;
    let receptor = Coord {
        x: request.receptor.x,
        y: request.receptor.y,
    };
    estimate_smoothing_radius(&emissions, receptor, request.observed, settings)
}
