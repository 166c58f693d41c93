//! Data contracts shared by the attribution engine and its external collaborators.
//!
//! Everything here is plain serde data: raster records produced by a dispersion
//! model reader, network links, activity logs, and the ledger rows and cost
//! schedules handed to writers. No attribution logic lives in this crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CoordState {
    pub x: f64,
    pub y: f64,
}

impl CoordState {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One network link, straightened to a single segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkRecord {
    pub id: String,
    pub from: CoordState,
    pub to: CoordState,
    /// Physical length; may differ from the straight-line distance.
    pub length: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkRecord {
    pub links: Vec<LinkRecord>,
}

/// A single raster of one species for one time bucket.
///
/// `values` is row-major: index `yi * x_len + xi`, with
/// `x_len = floor((max_x - min_x) / cell_size) + 1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RasterRecord {
    pub time: f64,
    pub species: String,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub cell_size: f64,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldRecord {
    pub rasters: Vec<RasterRecord>,
}

/// A located activity. Missing bounds mean the activity was ongoing before the
/// log starts (start) or never ends (end).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityRecord {
    pub person_id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub end_time: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivityLog {
    pub activities: Vec<ActivityRecord>,
}

/// A known discrete location (facility, building entrance) activities snap to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationRecord {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocationSet {
    pub locations: Vec<LocationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkValueRow {
    pub link_id: String,
    pub time: f64,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonExposureRow {
    pub person_id: String,
    pub time: f64,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CostWindowState {
    pub start: f64,
    pub end: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkCostSchedule {
    pub link_id: String,
    pub windows: Vec<CostWindowState>,
}

/// Link-indexed cost schedule as consumed by road-pricing scheme writers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TollScheme {
    pub name: String,
    pub links: Vec<LinkCostSchedule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkEmissionRecord {
    pub link: LinkRecord,
    pub value: f64,
}

/// Offline smoothing-radius calibration input for one receptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationRequest {
    pub receptor: CoordState,
    pub observed: f64,
    pub emissions: Vec<LinkEmissionRecord>,
}

/// Render link ledger rows as CSV with one column per species.
///
/// Species missing from a row are written as `0`.
pub fn render_link_values_csv(rows: &[LinkValueRow], species: &[String]) -> String {
    let mut out = String::new();
    write_header(&mut out, "link_id", species);
    for row in rows {
        write_row(&mut out, &row.link_id, row.time, &row.values, species);
    }
    out
}

pub fn render_person_exposure_csv(rows: &[PersonExposureRow], species: &[String]) -> String {
    let mut out = String::new();
    write_header(&mut out, "person_id", species);
    for row in rows {
        write_row(&mut out, &row.person_id, row.time, &row.values, species);
    }
    out
}

fn write_header(out: &mut String, id_column: &str, species: &[String]) {
    out.push_str(id_column);
    out.push_str(",time");
    for name in species {
        out.push(',');
        push_field(out, name);
    }
    out.push('\n');
}

fn write_row(
    out: &mut String,
    id: &str,
    time: f64,
    values: &BTreeMap<String, f64>,
    species: &[String],
) {
    push_field(out, id);
    // Writing into a String cannot fail.
    let _ = write!(out, ",{}", time);
    for name in species {
        let value = values.get(name).copied().unwrap_or(0.0);
        let _ = write!(out, ",{}", value);
    }
    out.push('\n');
}

/// Append a text field, quoted per RFC 4180 when it holds a delimiter, quote
/// or line break.
fn push_field(out: &mut String, field: &str) {
    if !field.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        out.push_str(field);
        return;
    }
    out.push('"');
    for ch in field.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
}
