use std::collections::BTreeMap;

use attribution_schema::{CostWindowState, LinkCostSchedule, TollScheme};

use crate::config::CostConfig;
use crate::error::{AttributionError, Result};
use crate::field::Species;
use crate::link_attribution::LinkLedger;
use crate::network::LinkId;

/// Per-species money-per-unit table plus a global scale factor.
#[derive(Debug, Clone, PartialEq)]
pub struct CostFactors {
    factors: BTreeMap<Species, f64>,
    scale_factor: f64,
}

impl CostFactors {
    pub fn new(factors: BTreeMap<Species, f64>, scale_factor: f64) -> Result<Self> {
        if !scale_factor.is_finite() || scale_factor <= 0.0 {
            return Err(AttributionError::invalid_dimension(format!(
                "cost scale factor must be positive, got {scale_factor}"
            )));
        }
        Ok(Self {
            factors,
            scale_factor,
        })
    }

    pub fn from_config(config: &CostConfig) -> Result<Self> {
        Self::new(config.factors.clone(), config.scale_factor)
    }

    pub fn factor(&self, species: &Species) -> Result<f64> {
        self.factors
            .get(species)
            .copied()
            .ok_or_else(|| AttributionError::UnknownSpecies {
                species: species.clone(),
            })
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }
}

/// Amount charged on a link during `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostWindow {
    pub start: f64,
    pub end: f64,
    pub amount: f64,
}

/// Link-indexed cost schedule; each link's windows are ordered and disjoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostSchedule {
    links: BTreeMap<LinkId, Vec<CostWindow>>,
}

impl CostSchedule {
    /// Value a link ledger:
    /// `amount = sum(ledger[species] * cell_volume * factor[species]) * scale_factor`.
    ///
    /// Every species in the ledger must have a factor; otherwise no schedule is
    /// produced at all.
    pub fn from_ledger(ledger: &LinkLedger, cell_volume: f64, factors: &CostFactors) -> Result<Self> {
        let species_factors = ledger
            .species()
            .into_iter()
            .map(|species| factors.factor(&species).map(|factor| (species, factor)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let bin_size = ledger.bin_size();
        let mut links: BTreeMap<LinkId, Vec<CostWindow>> = BTreeMap::new();
        for bin in ledger.bins().iter() {
            let start = bin.start_time();
            for (link, value) in bin.value() {
                let mass: f64 = value
                    .iter()
                    .map(|(species, amount)| amount * cell_volume * species_factors[species])
                    .sum();
                links.entry(link.clone()).or_default().push(CostWindow {
                    start,
                    end: start + bin_size,
                    amount: mass * factors.scale_factor(),
                });
            }
        }

        let schedule = Self { links };
        tracing::info!(
            target: "attribution::cost",
            links = schedule.links.len(),
            total = schedule.total(),
            "cost_schedule.built"
        );
        Ok(schedule)
    }

    pub fn windows(&self, link: &LinkId) -> &[CostWindow] {
        self.links.get(link).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LinkId, &[CostWindow])> + '_ {
        self.links.iter().map(|(link, windows)| (link, windows.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.links
            .values()
            .flat_map(|windows| windows.iter().map(|w| w.amount))
            .sum()
    }

    pub fn to_toll_scheme(&self, name: &str) -> TollScheme {
        TollScheme {
            name: name.to_string(),
            links: self
                .links
                .iter()
                .map(|(link, windows)| LinkCostSchedule {
                    link_id: link.to_string(),
                    windows: windows
                        .iter()
                        .map(|w| CostWindowState {
                            start: w.start,
                            end: w.end,
                            amount: w.amount,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
