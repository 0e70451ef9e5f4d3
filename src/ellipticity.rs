//! Complex-ellipticity composition: intrinsic shape + reduced shear →
//! observed shape.
//!
//! A galaxy image's ellipticity is represented as the complex number
//! `e = e1 + i·e2`; lensing acts on it through the reduced shear
//! `g = (gamma1 + i·gamma2) / (1 − kappa)`. The transformation has two
//! branches:
//!
//! - weak (|g| < 1):   `e_obs = (e_int + g) / (1 + conj(g)·e_int)`
//! - strong (|g| ≥ 1): `e_obs = (1 + g·conj(e_int)) / (conj(e_int) + conj(g))`
//!
//! The two expressions agree exactly on the unit circle |g| = 1, so the
//! branch switch is continuous (a tested property). Sources with |g| above a
//! configurable threshold are flagged as strongly lensed; batch consumers
//! normally exclude them, since the shape estimator loses meaning near the
//! critical curve.

use crate::Complex;

/// Options for shape composition.
#[derive(Debug, Clone)]
pub struct EllipticityConfig {
    /// |g| above which a source is flagged as strongly lensed. Default 0.5.
    pub strong_threshold: f64,
}

impl Default for EllipticityConfig {
    fn default() -> Self {
        Self {
            strong_threshold: 0.5,
        }
    }
}

/// An observed galaxy shape in both Cartesian and polar forms.
#[derive(Debug, Clone, Copy)]
pub struct LensedShape {
    /// Observed complex ellipticity.
    pub e: Complex,
    /// Reduced shear that produced it.
    pub g: Complex,
    /// Flagged as strongly (or near-strongly) lensed.
    pub strong: bool,
}

impl LensedShape {
    /// First Cartesian component.
    pub fn e1(&self) -> f64 {
        self.e.re
    }

    /// Second Cartesian component.
    pub fn e2(&self) -> f64 {
        self.e.im
    }

    /// Ellipticity modulus |e|.
    pub fn modulus(&self) -> f64 {
        self.e.norm()
    }

    /// Position angle of the ellipse, degrees: atan2(e2, e1) / 2.
    pub fn position_angle_deg(&self) -> f64 {
        self.e.im.atan2(self.e.re).to_degrees() / 2.0
    }
}

/// Reduced shear `g = (gamma1 + i·gamma2) / (1 − kappa)`.
pub fn reduced_shear(kappa: f64, gamma1: f64, gamma2: f64) -> Complex {
    Complex::new(gamma1, gamma2) / (1.0 - kappa)
}

/// Observed ellipticity of a source with intrinsic shape `e_int` behind
/// reduced shear `g`.
pub fn observed_ellipticity(e_int: Complex, g: Complex) -> Complex {
    if g.norm() < 1.0 {
        (e_int + g) / (Complex::new(1.0, 0.0) + g.conj() * e_int)
    } else {
        (Complex::new(1.0, 0.0) + g * e_int.conj()) / (e_int.conj() + g.conj())
    }
}

/// Compose a shape and classify it against the strong-lensing threshold.
pub fn lens_shape(e_int: Complex, g: Complex, config: &EllipticityConfig) -> LensedShape {
    LensedShape {
        e: observed_ellipticity(e_int, g),
        g,
        strong: g.norm() > config.strong_threshold,
    }
}
