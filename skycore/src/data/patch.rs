use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::data::position::SkyPosition;
use crate::data::source::Source;
use crate::geometry::{self, TangentPlane};

/// Estimator used for derived patch positions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum CentroidMode {
    /// Stokes-I-weighted tangent-plane centroid of the members.
    #[default]
    FluxWeighted,
    /// Unweighted tangent-plane centroid.
    Mean,
    /// Center of the tangent-plane bounding box of the members.
    Midpoint,
}

/// Representative position of a patch.
///
/// A pinned position was set explicitly and is never touched by membership
/// changes; a derived position is a lazily filled cache (`None` = stale)
/// recomputed from the members on the next read.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum PatchPosition {
    Pinned(SkyPosition),
    Derived(Option<SkyPosition>),
}

/// A named group of sources calibrated as one direction on the sky.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Patch {
    name: String,
    /// Member source indices into the owning table, in insertion order.
    pub(crate) members: Vec<usize>,
    pub(crate) position: PatchPosition,
}

impl Patch {
    pub(crate) fn new(name: &str) -> Patch {
        Patch {
            name: name.to_string(),
            members: Vec::new(),
            position: PatchPosition::Derived(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self.position, PatchPosition::Pinned(_))
    }

    /// Marks a derived position stale; pinned positions are left alone.
    pub(crate) fn invalidate(&mut self) {
        if let PatchPosition::Derived(_) = self.position {
            self.position = PatchPosition::Derived(None);
        }
    }

    /// Resolves the representative position, recomputing and caching the
    /// derived value if it is stale. `sources` is the owning table's source
    /// slice; the patch must have at least one member.
    pub(crate) fn resolve(&mut self, sources: &[Source], mode: CentroidMode) -> SkyPosition {
        match self.position {
            PatchPosition::Pinned(position) => position,
            PatchPosition::Derived(Some(position)) => position,
            PatchPosition::Derived(None) => {
                let position = self.compute_position(sources, mode);
                self.position = PatchPosition::Derived(Some(position));
                position
            }
        }
    }

    fn compute_position(&self, sources: &[Source], mode: CentroidMode) -> SkyPosition {
        debug_assert!(!self.members.is_empty());
        let positions: Vec<(f64, f64)> = self
            .members
            .iter()
            .map(|&i| (sources[i].position.ra, sources[i].position.dec))
            .collect();
        let (ra, dec) = match mode {
            CentroidMode::FluxWeighted => {
                let weights: Vec<f64> = self
                    .members
                    .iter()
                    .map(|&i| sources[i].flux.weight())
                    .collect();
                geometry::weighted_centroid(&positions, &weights)
            }
            CentroidMode::Mean => {
                let weights = vec![1.0; positions.len()];
                geometry::weighted_centroid(&positions, &weights)
            }
            CentroidMode::Midpoint => {
                let (ra0, dec0) = geometry::spherical_mean(&positions);
                let plane = TangentPlane::new(ra0, dec0);
                let (mut x_lo, mut x_hi) = (f64::INFINITY, f64::NEG_INFINITY);
                let (mut y_lo, mut y_hi) = (f64::INFINITY, f64::NEG_INFINITY);
                for &(ra, dec) in &positions {
                    let (x, y) = plane.project(ra, dec);
                    x_lo = x_lo.min(x);
                    x_hi = x_hi.max(x);
                    y_lo = y_lo.min(y);
                    y_hi = y_hi.max(y);
                }
                plane.deproject((x_lo + x_hi) * 0.5, (y_lo + y_hi) * 0.5)
            }
        };
        SkyPosition::new(ra, dec)
    }
}
