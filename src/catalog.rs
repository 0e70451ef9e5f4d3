//! Foreground galaxy catalogs: the raw table a lightcone is drilled from.
//!
//! A `ForegroundCatalog` owns a flat table of galaxy rows covering one survey
//! field (typically ~1 deg², up to a few million rows). Cone queries run a
//! coarse square prefilter in raw sky coordinates before the exact circular
//! cut, so per-cone cost tracks local galaxy density rather than table size.
//!
//! Survey catalogs arrive in inconsistent conventions — positions in degrees
//! or radians, right ascension sometimes stored negated for the left-handed
//! sky, halo masses in units of 1e10 Msun — so the CSV reader takes a
//! [`CatalogConfig`] describing the file's conventions and normalizes rows on
//! ingest: positions in radians, masses in Msun.

use std::path::Path;

use tracing::info;

use crate::geometry::{ConeGeometry, LocalPosition};

/// Type-flag value marking a central galaxy.
///
/// When drilling a cone around a galaxy's own sight line, the matching central
/// object must not lens itself; rows carrying this flag are excluded.
pub const CENTRAL_TYPE: i32 = 2;

/// One row of a foreground catalog, normalized units.
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundGalaxy {
    /// Right ascension, radians.
    pub ra: f64,
    /// Declination, radians.
    pub dec: f64,
    /// Observed (catalog) redshift.
    pub z_obs: f64,
    /// Observed halo mass, Msun (simulated catalogs).
    pub mhalo_obs: f64,
    /// Observed stellar mass, log10 Msun (real catalogs).
    pub mstar_obs: f64,
    /// Apparent magnitude in the selection band.
    pub mag: f64,
    /// Halo/point type flag; [`CENTRAL_TYPE`] marks centrals.
    pub gtype: i32,
}

/// File conventions for [`ForegroundCatalog::read_csv`].
///
/// Expected columns, in order: ra, dec, z_obs, mhalo_obs, mstar_obs, mag, type.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Positions are in degrees (converted to radians on read). Default false.
    pub positions_in_degrees: bool,
    /// The RA column stores -RA and must be negated back. Default false.
    pub ra_is_negated: bool,
    /// Multiplier taking file halo/stellar masses to Msun (e.g. 1e10 for
    /// simulation catalogs stored in units of 1e10 Msun). Default 1.0.
    pub mass_scale: f64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            positions_in_degrees: false,
            ra_is_negated: false,
            mass_scale: 1.0,
        }
    }
}

/// A foreground catalog and its sky bounds.
#[derive(Debug, Clone)]
pub struct ForegroundCatalog {
    galaxies: Vec<ForegroundGalaxy>,
    ra_min: f64,
    ra_max: f64,
    dec_min: f64,
    dec_max: f64,
}

impl ForegroundCatalog {
    /// Build a catalog from owned rows, computing sky bounds.
    pub fn new(galaxies: Vec<ForegroundGalaxy>) -> Self {
        let mut ra_min = f64::INFINITY;
        let mut ra_max = f64::NEG_INFINITY;
        let mut dec_min = f64::INFINITY;
        let mut dec_max = f64::NEG_INFINITY;
        for g in &galaxies {
            ra_min = ra_min.min(g.ra);
            ra_max = ra_max.max(g.ra);
            dec_min = dec_min.min(g.dec);
            dec_max = dec_max.max(g.dec);
        }
        Self {
            galaxies,
            ra_min,
            ra_max,
            dec_min,
            dec_max,
        }
    }

    /// Read a catalog from a CSV file with a header row.
    pub fn read_csv<P: AsRef<Path>>(file: P, config: &CatalogConfig) -> anyhow::Result<Self> {
        let mut rdr = csv::Reader::from_path(&file)?;
        let angle_scale = if config.positions_in_degrees {
            std::f64::consts::PI / 180.0
        } else {
            1.0
        };
        let ra_sign = if config.ra_is_negated { -1.0 } else { 1.0 };

        let galaxies = rdr
            .records()
            .map(|result| {
                let record = result?;
                let field = |i: usize| -> f64 { record.get(i).unwrap_or("").parse().unwrap_or(0.0) };
                Ok(ForegroundGalaxy {
                    ra: ra_sign * field(0) * angle_scale,
                    dec: field(1) * angle_scale,
                    z_obs: field(2),
                    mhalo_obs: field(3) * config.mass_scale,
                    // Stellar masses are carried in log10; scale inside the log.
                    mstar_obs: field(4) + config.mass_scale.log10(),
                    mag: field(5),
                    gtype: record.get(6).unwrap_or("").trim().parse().unwrap_or(0),
                })
            })
            .collect::<Result<Vec<ForegroundGalaxy>, csv::Error>>()?;

        info!(
            "Read {} foreground galaxies from {}",
            galaxies.len(),
            file.as_ref().display()
        );
        Ok(Self::new(galaxies))
    }

    /// Number of rows in the catalog.
    pub fn len(&self) -> usize {
        self.galaxies.len()
    }

    /// `true` when the catalog holds no rows.
    pub fn is_empty(&self) -> bool {
        self.galaxies.is_empty()
    }

    /// All rows as an immutable slice.
    pub fn galaxies(&self) -> &[ForegroundGalaxy] {
        &self.galaxies
    }

    /// Sky bounds as (ra_min, ra_max, dec_min, dec_max), radians.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (self.ra_min, self.ra_max, self.dec_min, self.dec_max)
    }

    /// Query rows inside a cone, excluding central-type objects.
    ///
    /// Returns each matching row together with its position in the cone-local
    /// frame. Square prefilter first, exact circular cut second.
    pub fn query_cone<'a>(
        &'a self,
        geometry: &ConeGeometry,
    ) -> Vec<(&'a ForegroundGalaxy, LocalPosition)> {
        self.galaxies
            .iter()
            .filter(|g| g.gtype != CENTRAL_TYPE)
            .filter(|g| geometry.square_prefilter(g.ra, g.dec))
            .filter_map(|g| {
                let pos = geometry.project(g.ra, g.dec);
                geometry.contains(&pos).then_some((g, pos))
            })
            .collect()
    }
}
