use std::fmt;
use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::data::position::SkyPosition;
use crate::error::{SkyError, SkyResult};

/// Morphology of a catalogued source.
///
/// Point sources carry no size; Gaussian sources carry the usual elliptical
/// shape parameters (axes in arcsec, position angle east of north in
/// degrees).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum SourceShape {
    Point,
    Gaussian {
        major_axis: f64,
        minor_axis: f64,
        position_angle: f64,
    },
}

impl Default for SourceShape {
    fn default() -> Self {
        SourceShape::Point
    }
}

impl Display for SourceShape {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SourceShape::Point => write!(f, "POINT"),
            SourceShape::Gaussian { .. } => write!(f, "GAUSSIAN"),
        }
    }
}

/// Flux densities per polarization, in Jy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct StokesFlux {
    pub i: f64,
    pub q: f64,
    pub u: f64,
    pub v: f64,
}

impl StokesFlux {
    pub fn from_i(i: f64) -> StokesFlux {
        StokesFlux {
            i,
            ..StokesFlux::default()
        }
    }

    /// Weight used for flux-weighted centroids: Stokes I, floored at zero so
    /// negative artifacts contribute nothing.
    pub fn weight(&self) -> f64 {
        self.i.max(0.0)
    }
}

/// Patch membership of a source: an explicit two-state value rather than an
/// optional patch name, so ungrouped is a first-class state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum Membership {
    #[default]
    Ungrouped,
    Grouped(String),
}

impl Membership {
    pub fn patch_name(&self) -> Option<&str> {
        match self {
            Membership::Ungrouped => None,
            Membership::Grouped(name) => Some(name),
        }
    }
}

/// One row of a sky model: a named sky object with position, shape, flux
/// and spectral behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Source {
    pub name: String,
    pub position: SkyPosition,
    pub shape: SourceShape,
    pub flux: StokesFlux,
    /// Log-polynomial spectral index coefficients; may be empty.
    pub spectral_index: Vec<f64>,
    pub reference_frequency: f64,
    pub(crate) membership: Membership,
}

impl Source {
    /// Constructs a source, rejecting negative Stokes I.
    ///
    /// Negative total flux only makes sense for deconvolution artifacts;
    /// those go through [`Source::artifact`] instead.
    pub fn new(
        name: &str,
        position: SkyPosition,
        shape: SourceShape,
        flux: StokesFlux,
    ) -> SkyResult<Source> {
        if flux.i < 0.0 {
            return Err(SkyError::InvalidParameter(format!(
                "source '{}' has negative Stokes I ({} Jy)",
                name, flux.i
            )));
        }
        Ok(Source::artifact(name, position, shape, flux))
    }

    /// Constructs a point source from its position and Stokes I flux.
    pub fn point(name: &str, position: SkyPosition, i_flux: f64) -> SkyResult<Source> {
        Source::new(name, position, SourceShape::Point, StokesFlux::from_i(i_flux))
    }

    /// Constructs a source without the non-negative flux check, for
    /// deconvolution artifacts such as negative clean components.
    pub fn artifact(
        name: &str,
        position: SkyPosition,
        shape: SourceShape,
        flux: StokesFlux,
    ) -> Source {
        Source {
            name: name.to_string(),
            position,
            shape,
            flux,
            spectral_index: Vec::new(),
            reference_frequency: 0.0,
            membership: Membership::Ungrouped,
        }
    }

    pub fn with_spectral_index(mut self, coefficients: Vec<f64>, reference_frequency: f64) -> Source {
        self.spectral_index = coefficients;
        self.reference_frequency = reference_frequency;
        self
    }

    /// Pre-assigns the source to a named patch; honoured when the source is
    /// inserted into a table.
    pub fn with_patch(mut self, patch_name: &str) -> Source {
        self.membership = Membership::Grouped(patch_name.to_string());
        self
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn patch_name(&self) -> Option<&str> {
        self.membership.patch_name()
    }
}
