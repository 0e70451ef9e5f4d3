//! Cone geometry: project absolute sky coordinates into the lightcone-local
//! tangent-plane frame.
//!
//! Right ascension increases westward on the sky, so the local frame is
//! **left-handed**: the x offset carries a minus sign,
//!
//! ```text
//! x = -cos(dec) · (ra - ra0) · ARCMIN_PER_RAD
//! y =  (dec - dec0)          · ARCMIN_PER_RAD
//! r = sqrt(x² + y²),  phi = atan2(y, x)
//! ```
//!
//! This matches the "physical" convention of ray-tracing simulation maps
//! (x = −RA), so per-halo shears decomposed against `phi` line up with map
//! pixels without any axis flip downstream.
//!
//! Selection runs in two passes, coarse to exact: a square prefilter in raw
//! (ra, dec) radians rejects the bulk of a large catalog cheaply, then the
//! exact circular cut `r < radius` runs on the survivors only.

use rkyv::{Archive, Deserialize, Serialize};

use crate::{ARCMIN_PER_RAD, RAD_PER_ARCMIN};

/// A lightcone's footprint on the sky.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct ConeGeometry {
    /// Right ascension of the cone center, radians.
    pub ra0: f64,
    /// Declination of the cone center, radians.
    pub dec0: f64,
    /// Angular radius of the cone, arcminutes.
    pub radius_arcmin: f64,
}

/// Position of an object in the cone-local tangent-plane frame.
///
/// `x`/`y` are arcminute offsets (x left-handed), `r` the angular separation
/// from the cone center in arcminutes, `phi` the polar angle in radians.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct LocalPosition {
    pub x: f64,
    pub y: f64,
    pub r: f64,
    pub phi: f64,
}

impl ConeGeometry {
    pub fn new(ra0: f64, dec0: f64, radius_arcmin: f64) -> Self {
        Self {
            ra0,
            dec0,
            radius_arcmin,
        }
    }

    /// Project an absolute sky position (radians) into the local frame.
    pub fn project(&self, ra: f64, dec: f64) -> LocalPosition {
        let x = -dec.cos() * (ra - self.ra0) * ARCMIN_PER_RAD;
        let y = (dec - self.dec0) * ARCMIN_PER_RAD;
        let r = x.hypot(y);
        let phi = y.atan2(x);
        LocalPosition { x, y, r, phi }
    }

    /// Coarse square prefilter in raw sky coordinates.
    ///
    /// The cone radius is used as a half-width in both axes, in radians,
    /// without the cos(dec) compression applied by [`project`](Self::project).
    pub fn square_prefilter(&self, ra: f64, dec: f64) -> bool {
        let half_width = self.radius_arcmin * RAD_PER_ARCMIN;
        (ra - self.ra0).abs() < half_width && (dec - self.dec0).abs() < half_width
    }

    /// Exact circular cut in the local frame.
    pub fn contains(&self, pos: &LocalPosition) -> bool {
        pos.r < self.radius_arcmin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-12;

    #[test]
    fn object_at_center_projects_to_origin() {
        let geom = ConeGeometry::new(0.02, -0.01, 2.0);
        let p = geom.project(0.02, -0.01);
        assert!(p.x.abs() < TOL);
        assert!(p.y.abs() < TOL);
        assert!(p.r.abs() < TOL);
    }

    #[test]
    fn pure_dec_offset_points_north() {
        let geom = ConeGeometry::new(0.0, 0.0, 5.0);
        let ddec = 2.0 * RAD_PER_ARCMIN;
        let p = geom.project(0.0, ddec);
        assert!(p.x.abs() < TOL);
        assert!((p.y - 2.0).abs() < 1e-9);
        assert!((p.r - 2.0).abs() < 1e-9);
        assert!((p.phi - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn positive_ra_offset_is_negative_x() {
        // Left-handed frame: east (increasing RA) is -x, so phi = pi.
        let geom = ConeGeometry::new(0.0, 0.0, 5.0);
        let dra = 3.0 * RAD_PER_ARCMIN;
        let p = geom.project(dra, 0.0);
        assert!((p.x + 3.0).abs() < 1e-9);
        assert!(p.y.abs() < TOL);
        assert!((p.r - 3.0).abs() < 1e-9);
        assert!((p.phi - std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn diagonal_offset_matches_closed_form() {
        let geom = ConeGeometry::new(0.0, 0.0, 5.0);
        let d = 1.5 * RAD_PER_ARCMIN;
        let p = geom.project(d, d);
        let x = -d.cos() * 1.5;
        let y = 1.5;
        assert!((p.x - x).abs() < 1e-9);
        assert!((p.y - y).abs() < 1e-9);
        assert!((p.r - x.hypot(y)).abs() < 1e-9);
        assert!((p.phi - y.atan2(x)).abs() < 1e-9);
    }

    #[test]
    fn ra_offset_compressed_by_cos_dec() {
        // At dec = 60 deg an RA offset shrinks by a factor cos(60°) = 0.5.
        let dec0 = 60.0_f64.to_radians();
        let geom = ConeGeometry::new(0.0, dec0, 5.0);
        let dra = 2.0 * RAD_PER_ARCMIN;
        let p = geom.project(dra, dec0);
        assert!((p.x + 2.0 * dec0.cos()).abs() < 1e-9);
        assert!(p.r < 2.0);
    }

    #[test]
    fn prefilter_contains_circle() {
        let geom = ConeGeometry::new(0.1, 0.2, 3.0);
        // A point just inside the circular cut must pass the prefilter.
        let dra = 2.9 * RAD_PER_ARCMIN;
        assert!(geom.square_prefilter(0.1 + dra, 0.2));
        // A point well outside must fail it.
        let far = 4.0 * RAD_PER_ARCMIN;
        assert!(!geom.square_prefilter(0.1 + far, 0.2));
    }
}
