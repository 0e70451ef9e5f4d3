//! Truncated halo mass profiles: convergence and shear kernels.
//!
//! A bare NFW halo has logarithmically divergent projected mass, so summing
//! thousands of foreground halos over-counts badly. The Baltz–Marshall–Oguri
//! (BMO) profile multiplies the NFW density by a truncation kernel
//! `(t²/(t² + x²))ⁿ`, giving finite total mass and closed-form lensing
//! functions for both truncation sharpnesses n = 1 ([`HaloProfile::Bmo1`])
//! and n = 2 ([`HaloProfile::Bmo2`]).
//!
//! Each profile exposes two dimensionless kernels of the normalized radius
//! `x = r_phys / r_s` and normalized truncation radius `xt = r_trunc / r_s`:
//!
//! - `f(x, xt)` — convergence kernel: `kappa = kappa_s · f`
//! - `g(x, xt)` — mean convergence inside x: `shear = kappa_s · (g − f)`
//!
//! where `kappa_s = delta_c · rho_crit · r_s / sigma_crit`.
//!
//! Both kernels diverge logarithmically as x → 0 (the NFW cusp) — callers are
//! expected to flag rather than clamp (see `Lightcone::make_kappas`). The
//! removable singularity at x = 1 is handled with a series expansion.
//!
//! Reference: Baltz, Marshall & Oguri 2009, JCAP 1, 15, appendix A.

pub mod table;

use std::f64::consts::PI;
use std::str::FromStr;

use crate::error::LensingError;

pub use table::{ProfileTable, ProfileTableConfig};

/// Truncated halo profile family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HaloProfile {
    /// BMO profile with n = 1 truncation (gentle outer rolloff).
    #[default]
    Bmo1,
    /// BMO profile with n = 2 truncation (sharp outer rolloff).
    Bmo2,
}

impl FromStr for HaloProfile {
    type Err = LensingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bmo1" => Ok(HaloProfile::Bmo1),
            "bmo2" => Ok(HaloProfile::Bmo2),
            other => Err(LensingError::UnknownProfile(other.to_string())),
        }
    }
}

impl HaloProfile {
    /// Convergence kernel at normalized radius `x`, truncation `xt`.
    pub fn f(&self, x: f64, xt: f64) -> f64 {
        match self {
            HaloProfile::Bmo1 => bmo1_f(x, xt),
            HaloProfile::Bmo2 => bmo2_f(x, xt),
        }
    }

    /// Mean-convergence kernel inside normalized radius `x`, truncation `xt`.
    pub fn g(&self, x: f64, xt: f64) -> f64 {
        match self {
            HaloProfile::Bmo1 => bmo1_g(x, xt),
            HaloProfile::Bmo2 => bmo2_g(x, xt),
        }
    }
}

/// NFW characteristic overdensity for concentration `c`.
///
/// `delta_c = (200/3) · c³ / (ln(1+c) − c/(1+c))`
pub fn delta_c(c: f64) -> f64 {
    (200.0 / 3.0) * c.powi(3) / ((1.0 + c).ln() - c / (1.0 + c))
}

// ── NFW kernel pieces ───────────────────────────────────────────────────────

/// The NFW projection kernel F(x): arctanh/arctan branch with F(1) = 1.
fn f_nfw(x: f64) -> f64 {
    if x < 1.0 {
        let u = (1.0 - x * x).sqrt();
        u.atanh() / u
    } else if x > 1.0 {
        let u = (x * x - 1.0).sqrt();
        u.atan() / u
    } else {
        1.0
    }
}

/// (1 − F(x)) / (x² − 1), with its removable singularity at x = 1.
///
/// Series about x = 1: 1/3 − (2/5)(x − 1) + O((x − 1)²).
fn f_ratio(x: f64) -> f64 {
    let eps = x - 1.0;
    if eps.abs() < 1e-6 {
        1.0 / 3.0 - 0.4 * eps
    } else {
        (1.0 - f_nfw(x)) / (x * x - 1.0)
    }
}

/// The truncation log kernel L(x, t) = ln(x / (sqrt(t² + x²) + t)).
fn l_kernel(x: f64, t: f64) -> f64 {
    (x / ((t * t + x * x).sqrt() + t)).ln()
}

// ── BMO n = 1 ───────────────────────────────────────────────────────────────

/// Convergence kernel for the n = 1 truncated profile.
fn bmo1_f(x: f64, t: f64) -> f64 {
    let t2 = t * t;
    let s = (t2 + x * x).sqrt();
    let prefactor = t2 / ((t2 + 1.0) * (t2 + 1.0));
    2.0 * prefactor
        * ((t2 + 1.0) * f_ratio(x) + 2.0 * f_nfw(x) - PI / s
            + (t2 - 1.0) / (t * s) * l_kernel(x, t))
}

/// Mean-convergence kernel for the n = 1 truncated profile.
fn bmo1_g(x: f64, t: f64) -> f64 {
    let t2 = t * t;
    let s = (t2 + x * x).sqrt();
    let prefactor = t2 / ((t2 + 1.0) * (t2 + 1.0));
    4.0 * prefactor / (x * x)
        * ((t2 + 1.0 + 2.0 * (x * x - 1.0)) * f_nfw(x)
            + t * PI
            + (t2 - 1.0) * t.ln()
            + s * (-PI + (t2 - 1.0) / t * l_kernel(x, t)))
}

// ── BMO n = 2 ───────────────────────────────────────────────────────────────

/// Convergence kernel for the n = 2 truncated profile.
fn bmo2_f(x: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t4 = t2 * t2;
    let s2 = t2 + x * x;
    let s = s2.sqrt();
    let prefactor = t4 / ((t2 + 1.0) * (t2 + 1.0) * (t2 + 1.0));
    prefactor
        * (2.0 * (t2 + 1.0) * f_ratio(x) + 8.0 * f_nfw(x) + (t4 - 1.0) / (t2 * s2)
            - PI * (4.0 * s2 + t2 + 1.0) / (s2 * s)
            + (t2 * (t4 - 1.0) + s2 * (3.0 * t4 - 6.0 * t2 - 1.0)) / (t2 * t * s2 * s)
                * l_kernel(x, t))
}

/// Mean-convergence kernel for the n = 2 truncated profile.
///
/// Obtained by integrating the n = 2 surface density term by term; each term
/// has an elementary antiderivative. The same procedure applied to the n = 1
/// profile reproduces `bmo1_g` exactly, which fixes the integration constants.
fn bmo2_g(x: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t4 = t2 * t2;
    let x2 = x * x;
    let s2 = t2 + x2;
    let s = s2.sqrt();
    let lk = l_kernel(x, t);
    let prefactor = t4 / ((t2 + 1.0) * (t2 + 1.0) * (t2 + 1.0));

    // ∫ u L(u,t) / (t²+u²)^(3/2) du and ∫ u L(u,t) / sqrt(t²+u²) du, from 0 to x.
    let d1 = -lk / s + (x / s).ln() / t - std::f64::consts::LN_2 / t;
    let d2 = s * lk - t * (x / (2.0 * t)).ln();

    let half_log = (x / 2.0).ln();
    let sum = 2.0 * (t2 + 1.0) * (half_log + f_nfw(x))
        + 8.0 * ((x2 - 1.0) * f_nfw(x) - half_log)
        + (t4 - 1.0) / (2.0 * t2) * (s2 / t2).ln()
        - 4.0 * PI * s
        + PI * (t2 + 1.0) / s
        + PI * (3.0 * t2 - 1.0) / t
        + (t4 - 1.0) / t * d1
        + (3.0 * t4 - 6.0 * t2 - 1.0) / (t2 * t) * d2;

    2.0 * prefactor / x2 * sum
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Untruncated NFW convergence kernel, for limit checks.
    fn nfw_f(x: f64) -> f64 {
        2.0 * f_ratio(x)
    }

    /// Untruncated NFW mean-convergence kernel.
    fn nfw_g(x: f64) -> f64 {
        4.0 / (x * x) * ((x / 2.0).ln() + f_nfw(x))
    }

    #[test]
    fn f_nfw_known_values() {
        // F(1) = 1 exactly; F(1/2) = atanh(sqrt(3)/2)/(sqrt(3)/2).
        assert_eq!(f_nfw(1.0), 1.0);
        let u: f64 = 0.75_f64.sqrt();
        assert!((f_nfw(0.5) - u.atanh() / u).abs() < 1e-15);
        // F is decreasing: cusp at 0, tail toward 0 at large x.
        assert!(f_nfw(0.01) > f_nfw(0.1));
        assert!(f_nfw(10.0) < f_nfw(2.0));
    }

    #[test]
    fn f_ratio_continuous_at_unity() {
        let below = f_ratio(1.0 - 1e-4);
        let at = f_ratio(1.0);
        let above = f_ratio(1.0 + 1e-4);
        assert!((at - 1.0 / 3.0).abs() < 1e-9);
        assert!((below - at).abs() < 1e-4);
        assert!((above - at).abs() < 1e-4);
    }

    #[test]
    fn bmo1_reduces_to_nfw_at_large_truncation() {
        let t = 1e4;
        for &x in &[0.05, 0.3, 0.7, 1.0, 1.5, 3.0] {
            let rel_f = (bmo1_f(x, t) - nfw_f(x)).abs() / nfw_f(x).abs();
            let rel_g = (bmo1_g(x, t) - nfw_g(x)).abs() / nfw_g(x).abs();
            assert!(rel_f < 1e-5, "f mismatch at x={x}: {rel_f:.2e}");
            assert!(rel_g < 1e-5, "g mismatch at x={x}: {rel_g:.2e}");
        }
    }

    #[test]
    fn bmo2_reduces_to_nfw_at_large_truncation() {
        let t = 1e4;
        for &x in &[0.05, 0.3, 0.7, 1.0, 1.5, 3.0] {
            let rel_f = (bmo2_f(x, t) - nfw_f(x)).abs() / nfw_f(x).abs();
            let rel_g = (bmo2_g(x, t) - nfw_g(x)).abs() / nfw_g(x).abs();
            assert!(rel_f < 1e-5, "f mismatch at x={x}: {rel_f:.2e}");
            assert!(rel_g < 1e-5, "g mismatch at x={x}: {rel_g:.2e}");
        }
    }

    #[test]
    fn kernels_continuous_across_unity() {
        for profile in [HaloProfile::Bmo1, HaloProfile::Bmo2] {
            let t = 20.0;
            let below = profile.f(1.0 - 1e-5, t);
            let above = profile.f(1.0 + 1e-5, t);
            let at = profile.f(1.0, t);
            assert!((below - at).abs() / at < 1e-3);
            assert!((above - at).abs() / at < 1e-3);
        }
    }

    #[test]
    fn mean_exceeds_local_convergence() {
        // g > f everywhere for a centrally concentrated profile, so the
        // shear kappa_s·(g − f) is positive.
        for profile in [HaloProfile::Bmo1, HaloProfile::Bmo2] {
            for &t in &[5.0, 25.0, 100.0] {
                for &x in &[0.1, 0.5, 1.0, 2.0, 10.0] {
                    assert!(
                        profile.g(x, t) > profile.f(x, t),
                        "{profile:?} g <= f at x={x}, t={t}"
                    );
                }
            }
        }
    }

    #[test]
    fn sharper_truncation_carries_less_mass() {
        // At fixed (x, t) beyond the scale radius the n = 2 profile has
        // truncated more of the outer halo, so its mean convergence is lower.
        assert!(bmo2_g(5.0, 10.0) < bmo1_g(5.0, 10.0));
    }

    #[test]
    fn delta_c_known_value() {
        // c = 5: delta_c = (200/3)·125/(ln 6 − 5/6).
        let expected = (200.0 / 3.0) * 125.0 / (6.0_f64.ln() - 5.0 / 6.0);
        assert!((delta_c(5.0) - expected).abs() / expected < 1e-14);
        // Higher concentration packs more overdensity.
        assert!(delta_c(10.0) > delta_c(5.0));
    }

    #[test]
    fn profile_names_parse() {
        assert_eq!("bmo1".parse::<HaloProfile>().unwrap(), HaloProfile::Bmo1);
        assert_eq!("BMO2".parse::<HaloProfile>().unwrap(), HaloProfile::Bmo2);
        assert!(matches!(
            "nfw".parse::<HaloProfile>(),
            Err(LensingError::UnknownProfile(_))
        ));
    }
}
