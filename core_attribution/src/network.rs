use std::f64::consts::FRAC_PI_2;
use std::fmt;
use std::sync::Arc;

use ahash::AHashSet;
use attribution_schema::LinkRecord;
use geo::{Coord, LineString, Polygon};

use crate::bounds::Bounds;
use crate::error::{AttributionError, Result};

/// Network link identifier. Cheap to clone across worker threads.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(Arc<str>);

impl LinkId {
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LinkId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LinkId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A network link straightened to the segment `from -> to`.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: LinkId,
    pub from: Coord<f64>,
    pub to: Coord<f64>,
    /// Physical length, which may exceed the straight-line distance.
    pub length: f64,
}

impl Link {
    pub fn new(id: impl Into<LinkId>, from: Coord<f64>, to: Coord<f64>, length: f64) -> Self {
        Self {
            id: id.into(),
            from,
            to,
            length,
        }
    }

    pub fn from_record(record: &LinkRecord) -> Result<Self> {
        let link = Self::new(
            record.id.as_str(),
            Coord {
                x: record.from.x,
                y: record.from.y,
            },
            Coord {
                x: record.to.x,
                y: record.to.y,
            },
            record.length,
        );
        link.validate()?;
        Ok(link)
    }

    fn validate(&self) -> Result<()> {
        let coords_finite = [self.from.x, self.from.y, self.to.x, self.to.y]
            .iter()
            .all(|v| v.is_finite());
        if !coords_finite {
            return Err(AttributionError::InvalidLink {
                id: self.id.to_string(),
                reason: "non-finite coordinates".to_string(),
            });
        }
        if !self.length.is_finite() || self.length < 0.0 {
            return Err(AttributionError::InvalidLink {
                id: self.id.to_string(),
                reason: format!("length must be non-negative, got {}", self.length),
            });
        }
        Ok(())
    }

    /// Straight-line distance between the endpoints.
    pub fn segment_length(&self) -> f64 {
        let dx = self.to.x - self.from.x;
        let dy = self.to.y - self.from.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::enclosing(self.from, self.to)
    }

    /// Region within `radius` of the segment, as a polygon with round caps
    /// approximated by `segments` edges per quarter circle.
    pub fn buffer(&self, radius: f64, segments: usize) -> Polygon<f64> {
        buffer_segment(self.from, self.to, radius, segments.max(1))
    }
}

fn buffer_segment(from: Coord<f64>, to: Coord<f64>, radius: f64, segments: usize) -> Polygon<f64> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let heading = if dx == 0.0 && dy == 0.0 {
        0.0
    } else {
        dy.atan2(dx)
    };

    let steps = segments * 2;
    let mut ring = Vec::with_capacity(2 * (steps + 1) + 1);
    // Cap around `to`: sweep from the right-hand side to the left-hand side.
    for step in 0..=steps {
        let angle = heading - FRAC_PI_2 + std::f64::consts::PI * step as f64 / steps as f64;
        ring.push(Coord {
            x: to.x + radius * angle.cos(),
            y: to.y + radius * angle.sin(),
        });
    }
    // Cap around `from`, continuing counter-clockwise.
    for step in 0..=steps {
        let angle = heading + FRAC_PI_2 + std::f64::consts::PI * step as f64 / steps as f64;
        ring.push(Coord {
            x: from.x + radius * angle.cos(),
            y: from.y + radius * angle.sin(),
        });
    }
    Polygon::new(LineString::new(ring), Vec::new())
}

/// Immutable set of candidate links with geometry.
#[derive(Debug, Clone, Default)]
pub struct Network {
    links: Vec<Link>,
}

impl Network {
    /// Link ids must be unique; every attributed amount is keyed by id.
    pub fn new(links: Vec<Link>) -> Result<Self> {
        let mut seen = AHashSet::with_capacity(links.len());
        for link in &links {
            link.validate()?;
            if !seen.insert(&link.id) {
                return Err(AttributionError::InvalidLink {
                    id: link.id.to_string(),
                    reason: "duplicate id".to_string(),
                });
            }
        }
        Ok(Self { links })
    }

    pub fn from_records(records: &[LinkRecord]) -> Result<Self> {
        let links = records
            .iter()
            .map(Link::from_record)
            .collect::<Result<Vec<_>>>()?;
        Self::new(links)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, id: &LinkId) -> Option<&Link> {
        self.links.iter().find(|link| &link.id == id)
    }
}
