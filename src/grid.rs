//! Redshift grid: precomputed line-of-sight planes shared by every cone.
//!
//! Distance calculations dominate the cost of a naive per-object pipeline, so
//! the line of sight between observer and source is discretized once into N
//! planes and every object is snapped to its nearest plane. The grid stores,
//! per plane: the plane redshift, the angular diameter distance, the critical
//! density of the universe, the critical surface density for the (zl, zs)
//! system, and the lensing efficiency factor beta that scales a plane's
//! contribution by its position relative to lens and source.
//!
//! The numerical construction of these arrays (cosmological distance
//! integrals) lives in whatever cosmology backend the caller prefers; this
//! module only validates and serves the planes. The grid is read-only shared
//! state — one instance serves all cones and realisations without locking.

use tracing::warn;

use crate::error::{LensingError, Result};

/// Tolerance on |grid z − requested z| before a mismatch warning is logged.
const REDSHIFT_MISMATCH_TOL: f64 = 0.05;

/// Raw per-plane arrays used to build a [`RedshiftGrid`].
#[derive(Debug, Clone, Default)]
pub struct GridPlanes {
    /// Plane redshifts, strictly increasing.
    pub z: Vec<f64>,
    /// Angular diameter distance to each plane, Mpc.
    pub da: Vec<f64>,
    /// Critical density of the universe at each plane, Msun / Mpc³.
    pub rho_crit: Vec<f64>,
    /// Critical surface density for the lens system at each plane, Msun / Mpc².
    pub sigma_crit: Vec<f64>,
    /// Lensing efficiency beta at each plane.
    pub beta: Vec<f64>,
}

/// Discretized line of sight for one (zl, zs) lens system.
#[derive(Debug, Clone)]
pub struct RedshiftGrid {
    zl: f64,
    zs: f64,
    planes: GridPlanes,
}

impl RedshiftGrid {
    /// Build a grid from caller-supplied planes, validating shape and domain.
    pub fn from_planes(zl: f64, zs: f64, planes: GridPlanes) -> Result<Self> {
        let n = planes.z.len();
        if n == 0 {
            return Err(LensingError::Config("redshift grid has no planes".into()));
        }
        if planes.da.len() != n
            || planes.rho_crit.len() != n
            || planes.sigma_crit.len() != n
            || planes.beta.len() != n
        {
            return Err(LensingError::Config(format!(
                "redshift grid arrays disagree in length: z={} da={} rho_crit={} sigma_crit={} beta={}",
                n,
                planes.da.len(),
                planes.rho_crit.len(),
                planes.sigma_crit.len(),
                planes.beta.len()
            )));
        }
        if planes.z.windows(2).any(|w| w[0] >= w[1]) {
            return Err(LensingError::Config(
                "redshift grid planes must be strictly increasing in z".into(),
            ));
        }
        if planes
            .rho_crit
            .iter()
            .chain(planes.sigma_crit.iter())
            .any(|&v| v <= 0.0)
        {
            return Err(LensingError::Config(
                "critical densities must be positive on every plane".into(),
            ));
        }
        Ok(Self { zl, zs, planes })
    }

    /// Number of planes.
    pub fn len(&self) -> usize {
        self.planes.z.len()
    }

    /// `true` for a grid with no planes (never constructed; kept for symmetry).
    pub fn is_empty(&self) -> bool {
        self.planes.z.is_empty()
    }

    /// Lens redshift the grid was built for.
    pub fn zl(&self) -> f64 {
        self.zl
    }

    /// Source redshift the grid was built for.
    pub fn zs(&self) -> f64 {
        self.zs
    }

    /// Snap a redshift to the nearest plane: `(nearest_z, plane_index)`.
    pub fn snap(&self, z: f64) -> (f64, usize) {
        let zs = &self.planes.z;
        let idx = match zs.binary_search_by(|p| p.total_cmp(&z)) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) if i >= zs.len() => zs.len() - 1,
            Err(i) => {
                if (z - zs[i - 1]).abs() <= (zs[i] - z).abs() {
                    i - 1
                } else {
                    i
                }
            }
        };
        (zs[idx], idx)
    }

    /// Angular diameter distance of plane `p`, Mpc.
    pub fn da(&self, p: usize) -> f64 {
        self.planes.da[p]
    }

    /// Critical density at plane `p`, Msun / Mpc³.
    pub fn rho_crit(&self, p: usize) -> f64 {
        self.planes.rho_crit[p]
    }

    /// Critical surface density at plane `p`, Msun / Mpc².
    pub fn sigma_crit(&self, p: usize) -> f64 {
        self.planes.sigma_crit[p]
    }

    /// Lensing efficiency at plane `p`.
    pub fn beta(&self, p: usize) -> f64 {
        self.planes.beta[p]
    }

    /// Warn when the grid was built for a different lens system.
    ///
    /// A mismatch is a data-quality condition, not an error: processing
    /// continues with the grid as given.
    pub fn check_system(&self, zl: f64, zs: f64) {
        if (self.zl - zl).abs() > REDSHIFT_MISMATCH_TOL {
            warn!(
                "grid lens redshift {:.3} differs from requested {:.3}",
                self.zl, zl
            );
        }
        if (self.zs - zs).abs() > REDSHIFT_MISMATCH_TOL {
            warn!(
                "grid source redshift {:.3} differs from requested {:.3}",
                self.zs, zs
            );
        }
    }
}

/// Mean convergence per grid plane, measured from the foreground catalog.
///
/// Used by the `add` combination scheme's void correction: subtracting the
/// mean foreground convergence removes the bias from counting only the halos
/// (overdensities) and never the voids between them.
#[derive(Debug, Clone)]
pub struct ForegroundKappas {
    per_plane: Vec<f64>,
}

impl ForegroundKappas {
    /// Build from a per-plane mean-kappa table aligned with a grid.
    pub fn new(grid: &RedshiftGrid, per_plane: Vec<f64>) -> Result<Self> {
        if per_plane.len() != grid.len() {
            return Err(LensingError::Config(format!(
                "foreground kappa table has {} entries for a {}-plane grid",
                per_plane.len(),
                grid.len()
            )));
        }
        Ok(Self { per_plane })
    }

    /// Mean convergence at plane `p`.
    pub fn at_plane(&self, p: usize) -> f64 {
        self.per_plane[p]
    }

    /// Total mean convergence summed over all planes.
    pub fn total(&self) -> f64 {
        self.per_plane.iter().sum()
    }
}

/// Synthetic uniform grid for unit tests: planes at (i + 0.5)·zs/n.
#[cfg(test)]
pub(crate) fn uniform_test_grid(zl: f64, zs: f64, n: usize) -> RedshiftGrid {
    let z: Vec<f64> = (0..n).map(|i| (i as f64 + 0.5) * zs / n as f64).collect();
    let planes = GridPlanes {
        da: z.iter().map(|z| 1000.0 + 500.0 * z).collect(),
        rho_crit: vec![1.4e11; n],
        sigma_crit: vec![4.0e15; n],
        beta: z.iter().map(|&z| if z < zl { 0.3 } else { 0.5 }).collect(),
        z,
    };
    RedshiftGrid::from_planes(zl, zs, planes).unwrap()
}
