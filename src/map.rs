//! Opaque lookup interface for convergence and shear maps.
//!
//! Ray-traced simulation maps (and their FITS/plain-text readers and
//! interpolation schemes) live outside this crate; the pipeline only ever
//! asks "what is the map value at this sky position?". Implementations are
//! injected wherever map-based lensing is requested.

use crate::error::Result;

/// Which map plane a lookup addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapComponent {
    /// Convergence.
    Kappa,
    /// First shear component.
    Gamma1,
    /// Second shear component.
    Gamma2,
}

/// Scalar map sampling at a sky position.
///
/// Coordinates are world coordinates in radians. Failures (missing file,
/// position off the map) surface as
/// [`LensingError::External`](crate::error::LensingError::External) so batch
/// drivers can distinguish collaborator faults from pipeline faults.
pub trait MapLookup {
    /// Map value at (ra, dec) for the requested component.
    fn at(&self, ra: f64, dec: f64, component: MapComponent) -> Result<f64>;
}
