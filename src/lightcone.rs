//! The lightcone: one cone of foreground galaxies and the staged pipeline
//! that turns it into a convergence and shear estimate.
//!
//! A `Lightcone` owns the galaxy rows inside its footprint. Processing is a
//! strictly ordered sequence of stages, each overwriting the record fields
//! later stages read:
//!
//! 1. [`drill`](Lightcone::drill) — geometric selection into the local frame
//! 2. [`define_system`](Lightcone::define_system) — fix (zl, zs), drop
//!    objects beyond the source
//! 3. [`snap_to_grid`](Lightcone::snap_to_grid) — nearest-plane distances and
//!    critical densities
//! 4. mass stages — photo-z scatter, stellar/halo mass draws (optional)
//! 5. [`draw_concentrations`](Lightcone::draw_concentrations) — r200, c200,
//!    scale radius, normalized radius
//! 6. [`make_kappas`](Lightcone::make_kappas) — per-halo convergence and
//!    shear from the truncated profile
//! 7. [`combine_kappas`](Lightcone::combine_kappas) — cone totals under one
//!    or more combination schemes
//! 8. [`SchemeTotals::magnification`] — magnification of the summed system
//!
//! Stages 4–8 are designed to run many times per cone: one pass per Monte
//! Carlo realisation of the uncertain masses and concentrations. All random
//! draws go through a caller-supplied seeded generator, so a realisation is
//! reproducible from its seed alone.

use std::str::FromStr;

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use rkyv::{Archive, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::ForegroundCatalog;
use crate::error::{LensingError, Result};
use crate::geometry::ConeGeometry;
use crate::grid::{ForegroundKappas, RedshiftGrid};
use crate::profile::{delta_c, HaloProfile, ProfileTable};
use crate::shmr::{MassConcentrationRelation, StellarHaloMassRelation};
use crate::RAD_PER_ARCMIN;

/// Objects this far beyond the source plane in redshift are dropped: their
/// lensing efficiency is negligible and the geometry degenerates.
const SOURCE_REDSHIFT_MARGIN: f64 = 0.2;

/// |denominator| below which the exact magnification is treated as divergent.
const MU_DENOMINATOR_EPS: f64 = 1e-12;

/// Default cosmology triple (Omega_m, Omega_lambda, h).
pub const DEFAULT_COSMOLOGY: [f64; 3] = [0.25, 0.75, 0.73];

// ── Record and cone types ───────────────────────────────────────────────────

/// Catalog variant a cone was drilled from.
///
/// The two variants differ only in which mass columns arrive populated:
/// simulated catalogs carry true halo masses, real catalogs carry observed
/// stellar masses. No behavior hangs off this beyond initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum Flavor {
    /// Observed survey catalog: stellar masses in, halo masses drawn.
    Real,
    /// Ray-traced simulation catalog: halo masses in, truth kappa available.
    Simulated,
}

/// One foreground object inside a cone: the full per-object column set.
///
/// Fields are grouped by the stage that writes them; a stage may assume every
/// field of an earlier group is valid. Mass fields are log10 Msun.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct HaloRecord {
    // Drill stage.
    pub ra: f64,
    pub dec: f64,
    pub mag: f64,
    pub z_obs: f64,
    pub x: f64,
    pub y: f64,
    pub r: f64,
    pub phi: f64,
    pub mh_obs: f64,
    pub mstar_obs: f64,
    /// Object has spectroscopic (rather than photometric) redshift.
    pub spec_flag: bool,

    // Realisation redshift (photo-z stage; starts as z_obs).
    pub z: f64,

    // Mass stages.
    pub mh: f64,
    pub mstar: f64,

    // Grid snap stage.
    pub z_snapped: f64,
    pub plane: u32,
    pub da: f64,
    pub rho_crit: f64,
    pub sigma_crit: f64,
    pub beta: f64,
    pub f_kappa: f64,
    /// Physical transverse distance from the cone axis, Mpc.
    pub rphys: f64,

    // Concentration stage.
    pub r200: f64,
    pub c200: f64,
    pub rs: f64,
    /// Normalized radius X = rphys / rs.
    pub x_norm: f64,

    // Kappa stage.
    pub kappa: f64,
    /// Shear magnitude kappa_s · (G − F).
    pub gamma: f64,
    pub gamma1: f64,
    pub gamma2: f64,
    pub mu: f64,
    /// Set when the kappa stage produced a non-finite value; the record is
    /// excluded from all totals until the next kappa pass.
    pub anomaly: bool,

    // Relevance stage.
    pub relevance: f64,
}

/// A cone of foreground galaxies around one sight line.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct Lightcone {
    /// Cone ID within its background catalog.
    pub id: u32,
    pub flavor: Flavor,
    pub geometry: ConeGeometry,
    /// Lens redshift; 0 until [`define_system`](Lightcone::define_system).
    pub zl: f64,
    /// Source redshift; 0 until [`define_system`](Lightcone::define_system).
    pub zs: f64,
    /// Cosmology triple (Omega_m, Omega_lambda, h).
    pub cosmology: [f64; 3],
    /// Directly ray-traced convergence for simulated sight lines.
    pub kappa_true: Option<f64>,
    pub galaxies: Vec<HaloRecord>,
}

// ── Combination schemes ─────────────────────────────────────────────────────

/// How per-halo contributions collapse into a cone total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain sums of kappa and shear.
    Add,
    /// Keeton multi-plane correction weighted by the lensing efficiency.
    Keeton,
    /// Single-factor (1 − beta) suppression.
    Tom,
}

impl Scheme {
    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Scheme::Add => "add",
            Scheme::Keeton => "keeton",
            Scheme::Tom => "tom",
        }
    }
}

impl FromStr for Scheme {
    type Err = LensingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(Scheme::Add),
            "keeton" => Ok(Scheme::Keeton),
            "tom" => Ok(Scheme::Tom),
            other => Err(LensingError::UnknownScheme(other.to_string())),
        }
    }
}

/// Summed convergence and shear under one combination scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SchemeTotals {
    pub kappa: f64,
    pub gamma1: f64,
    pub gamma2: f64,
}

impl SchemeTotals {
    /// Total shear magnitude.
    pub fn gamma(&self) -> f64 {
        self.gamma1.hypot(self.gamma2)
    }

    /// Magnification of the summed system.
    ///
    /// Weak approximation: `mu = 1 + 2·kappa`. Exact form:
    /// `mu = 1 / ((1 − kappa)² − gamma²)`, which diverges on the critical
    /// curve — a vanishing denominator is surfaced as a recoverable
    /// [`LensingError::Numeric`] rather than returned as infinity.
    pub fn magnification(&self, weak_approx: bool) -> Result<f64> {
        if weak_approx {
            return Ok(1.0 + 2.0 * self.kappa);
        }
        let one_minus_kappa = 1.0 - self.kappa;
        let denom = one_minus_kappa * one_minus_kappa - self.gamma() * self.gamma();
        if !denom.is_finite() || denom.abs() < MU_DENOMINATOR_EPS {
            return Err(LensingError::Numeric(format!(
                "magnification denominator {:.3e} at kappa={:.4}, gamma={:.4}",
                denom,
                self.kappa,
                self.gamma()
            )));
        }
        Ok(1.0 / denom)
    }
}

/// Totals for every scheme requested from one combination pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConeTotals {
    pub add: Option<SchemeTotals>,
    pub keeton: Option<SchemeTotals>,
    pub tom: Option<SchemeTotals>,
}

impl ConeTotals {
    /// Totals for `scheme`, if it was requested.
    pub fn get(&self, scheme: Scheme) -> Option<&SchemeTotals> {
        match scheme {
            Scheme::Add => self.add.as_ref(),
            Scheme::Keeton => self.keeton.as_ref(),
            Scheme::Tom => self.tom.as_ref(),
        }
    }
}

// ── Pipeline configuration ──────────────────────────────────────────────────

/// Parameters for the per-halo kappa stage.
#[derive(Debug, Clone)]
pub struct KappaConfig {
    /// Truncation radius in units of r200. Default 5.
    pub truncation_scale: f64,
    /// Halo profile family. Default BMO1.
    pub profile: HaloProfile,
}

impl Default for KappaConfig {
    fn default() -> Self {
        Self {
            truncation_scale: 5.0,
            profile: HaloProfile::Bmo1,
        }
    }
}

/// Metric ranking a foreground halo's expected lensing importance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelevanceMetric {
    /// `(Mh / 10¹² Msun) · (0.01 Mpc / rphys)³` (McCully et al. 2017).
    Curtis,
    /// Min-max normalized blend of proximity and mass.
    Linear,
}

// ── The pipeline ────────────────────────────────────────────────────────────

impl Lightcone {
    /// Drill a cone out of a foreground catalog.
    ///
    /// Runs the square prefilter, the exact circular cut and the central-type
    /// exclusion, then projects survivors into the local tangent-plane frame.
    /// An empty result is a valid degenerate cone: it is reported with a
    /// warning and every later stage yields zero totals.
    pub fn drill(
        catalog: &ForegroundCatalog,
        flavor: Flavor,
        geometry: ConeGeometry,
        id: u32,
    ) -> Self {
        let galaxies: Vec<HaloRecord> = catalog
            .query_cone(&geometry)
            .into_iter()
            .map(|(g, pos)| {
                // Simulated catalogs carry linear halo masses; take the log
                // once here so every mass stage works in log10 Msun.
                let mh_obs = if g.mhalo_obs > 0.0 {
                    g.mhalo_obs.log10()
                } else {
                    0.0
                };
                HaloRecord {
                    ra: g.ra,
                    dec: g.dec,
                    mag: g.mag,
                    z_obs: g.z_obs,
                    x: pos.x,
                    y: pos.y,
                    r: pos.r,
                    phi: pos.phi,
                    mh_obs,
                    mstar_obs: g.mstar_obs,
                    spec_flag: false,
                    z: g.z_obs,
                    mh: mh_obs,
                    mstar: g.mstar_obs,
                    z_snapped: 0.0,
                    plane: 0,
                    da: 0.0,
                    rho_crit: 0.0,
                    sigma_crit: 0.0,
                    beta: 0.0,
                    f_kappa: 0.0,
                    rphys: 0.0,
                    r200: 0.0,
                    c200: 0.0,
                    rs: 0.0,
                    x_norm: 0.0,
                    kappa: 0.0,
                    gamma: 0.0,
                    gamma1: 0.0,
                    gamma2: 0.0,
                    mu: 1.0,
                    anomaly: false,
                    relevance: 0.0,
                }
            })
            .collect();

        if galaxies.is_empty() {
            warn!("lightcone {}: no galaxies after geometric selection", id);
        } else {
            debug!("lightcone {}: {} galaxies", id, galaxies.len());
        }

        Self {
            id,
            flavor,
            geometry,
            zl: 0.0,
            zs: 0.0,
            cosmology: DEFAULT_COSMOLOGY,
            kappa_true: None,
            galaxies,
        }
    }

    /// Number of galaxies currently in the cone.
    pub fn galaxy_count(&self) -> usize {
        self.galaxies.len()
    }

    /// `true` for a degenerate (empty) cone.
    pub fn is_empty(&self) -> bool {
        self.galaxies.is_empty()
    }

    /// Fix the lens system: lens redshift, source redshift, cosmology.
    ///
    /// Objects with `z_obs >= zs + 0.2` are dropped — beyond the source they
    /// contribute nothing and the lensing efficiency degenerates.
    pub fn define_system(&mut self, zl: f64, zs: f64, cosmology: [f64; 3]) {
        self.zl = zl;
        self.zs = zs;
        self.cosmology = cosmology;
        let before = self.galaxies.len();
        self.galaxies
            .retain(|g| g.z_obs < zs + SOURCE_REDSHIFT_MARGIN);
        if self.galaxies.len() != before {
            debug!(
                "lightcone {}: dropped {} objects beyond zs={}",
                self.id,
                before - self.galaxies.len(),
                zs
            );
        }
    }

    /// Snap every object's realisation redshift to the nearest grid plane and
    /// pull that plane's distances and critical densities.
    ///
    /// When a foreground mean-kappa table is supplied, each object also picks
    /// up its plane's mean convergence for the void correction.
    pub fn snap_to_grid(
        &mut self,
        grid: &RedshiftGrid,
        foreground_kappas: Option<&ForegroundKappas>,
    ) -> Result<()> {
        if self.zs <= 0.0 {
            return Err(LensingError::Config(
                "define_system must run before snap_to_grid".into(),
            ));
        }
        grid.check_system(self.zl, self.zs);

        for g in &mut self.galaxies {
            let (z_snapped, plane) = grid.snap(g.z);
            g.z_snapped = z_snapped;
            g.plane = plane as u32;
            g.da = grid.da(plane);
            g.rho_crit = grid.rho_crit(plane);
            g.sigma_crit = grid.sigma_crit(plane);
            g.beta = grid.beta(plane);
            g.f_kappa = foreground_kappas.map_or(0.0, |fk| fk.at_plane(plane));
            g.rphys = g.r * RAD_PER_ARCMIN * g.da;
        }
        Ok(())
    }

    /// Scatter realisation redshifts around the catalog values:
    /// `z = z_obs + sigma·(1 + z_obs)·N(0,1)` for photometric objects.
    /// Spectroscopic objects keep `z = z_obs`.
    pub fn mimic_photoz_error(&mut self, sigma: f64, rng: &mut StdRng) {
        for g in &mut self.galaxies {
            g.z = if g.spec_flag {
                g.z_obs
            } else {
                g.z_obs + sigma * (1.0 + g.z_obs) * rng.sample::<f64, _>(StandardNormal)
            };
        }
    }

    /// Draw stellar masses from halo masses (simulated cones, which need mock
    /// observed stellar masses before the halo masses can be re-drawn).
    pub fn draw_mstars(&mut self, shmr: &dyn StellarHaloMassRelation, rng: &mut StdRng) {
        for g in &mut self.galaxies {
            g.mstar = shmr.draw_mstar(g.mh, g.z, rng);
            g.mstar_obs = g.mstar;
        }
    }

    /// Scatter stellar masses by the observational uncertainty:
    /// `sigma_phot` dex for photometric objects, `sigma_spec` dex for
    /// spectroscopic ones.
    pub fn mimic_mstar_error(&mut self, sigma_phot: f64, sigma_spec: f64, rng: &mut StdRng) {
        for g in &mut self.galaxies {
            let sigma = if g.spec_flag { sigma_spec } else { sigma_phot };
            g.mstar = g.mstar_obs + sigma * rng.sample::<f64, _>(StandardNormal);
        }
    }

    /// Draw halo masses from stellar masses.
    pub fn draw_mhalos(&mut self, shmr: &dyn StellarHaloMassRelation, rng: &mut StdRng) {
        for g in &mut self.galaxies {
            g.mh = shmr.draw_mhalo(g.mstar, g.z, rng);
        }
    }

    /// Derive each halo's size for this realisation: r200 from the mass and
    /// the critical density, concentration from the mass–concentration
    /// relation, scale radius, and the normalized radius X.
    pub fn draw_concentrations(
        &mut self,
        mc: &MassConcentrationRelation,
        scatter: bool,
        rng: &mut StdRng,
    ) -> Result<()> {
        if self.galaxies.iter().any(|g| g.rho_crit <= 0.0) {
            return Err(LensingError::Config(
                "snap_to_grid must run before draw_concentrations".into(),
            ));
        }
        for g in &mut self.galaxies {
            let m200 = 10f64.powf(g.mh);
            g.r200 = (3.0 * m200 / (800.0 * std::f64::consts::PI * g.rho_crit)).cbrt();
            g.c200 = mc.sample(m200, scatter, rng);
            g.rs = g.r200 / g.c200;
            g.x_norm = g.rphys / g.rs;
        }
        Ok(())
    }

    /// Evaluate each halo's convergence and shear at the cone center.
    ///
    /// Returns the number of records flagged as numeric anomalies (non-finite
    /// profile values, typically an object exactly on the axis hitting the
    /// NFW cusp). Flagged records are zeroed and excluded from totals until
    /// the next kappa pass re-evaluates them.
    pub fn make_kappas(
        &mut self,
        config: &KappaConfig,
        table: Option<&ProfileTable>,
    ) -> Result<usize> {
        if let Some(t) = table {
            if t.profile() != config.profile {
                return Err(LensingError::Config(format!(
                    "lookup table is for {:?} but {:?} was requested",
                    t.profile(),
                    config.profile
                )));
            }
        }
        if self.galaxies.iter().any(|g| g.rs <= 0.0) {
            return Err(LensingError::Config(
                "draw_concentrations must run before make_kappas".into(),
            ));
        }

        let mut anomalies = 0usize;
        for g in &mut self.galaxies {
            let kappa_s = delta_c(g.c200) * g.rho_crit * g.rs / g.sigma_crit;
            let xtrunc = config.truncation_scale * g.r200 / g.rs;
            let (f, gg) = match table {
                Some(t) => (t.f(g.x_norm, xtrunc), t.g(g.x_norm, xtrunc)),
                None => (
                    config.profile.f(g.x_norm, xtrunc),
                    config.profile.g(g.x_norm, xtrunc),
                ),
            };

            let kappa = kappa_s * f;
            let shear = kappa_s * (gg - f);
            let denom = (1.0 - kappa) * (1.0 - kappa) - shear * shear;

            if !kappa.is_finite() || !shear.is_finite() || denom.abs() < MU_DENOMINATOR_EPS {
                g.kappa = 0.0;
                g.gamma = 0.0;
                g.gamma1 = 0.0;
                g.gamma2 = 0.0;
                g.mu = 1.0;
                g.anomaly = true;
                anomalies += 1;
                continue;
            }

            g.kappa = kappa;
            g.gamma = shear;
            // Sign fixed by the left-handed sky frame.
            g.gamma1 = -shear * (2.0 * g.phi).cos();
            g.gamma2 = -shear * (2.0 * g.phi).sin();
            g.mu = 1.0 / denom;
            g.anomaly = false;
        }

        if anomalies > 0 {
            warn!(
                "lightcone {}: {} objects flagged with non-finite lensing values",
                self.id, anomalies
            );
        }
        Ok(anomalies)
    }

    /// Sum per-halo contributions into cone totals under every requested
    /// scheme in one pass.
    ///
    /// `foreground_kappas` enables the void correction on the `add` totals:
    /// the summed per-plane mean convergence of the foreground catalog is
    /// subtracted, removing the halos-only overcounting bias.
    pub fn combine_kappas(
        &self,
        schemes: &[Scheme],
        foreground_kappas: Option<&ForegroundKappas>,
    ) -> Result<ConeTotals> {
        if schemes.is_empty() {
            return Err(LensingError::Config(
                "no combination scheme requested".into(),
            ));
        }

        let mut totals = ConeTotals::default();
        for scheme in schemes {
            let slot = match scheme {
                Scheme::Add => &mut totals.add,
                Scheme::Keeton => &mut totals.keeton,
                Scheme::Tom => &mut totals.tom,
            };
            *slot = Some(SchemeTotals::default());
        }

        for g in self.galaxies.iter().filter(|g| !g.anomaly) {
            if let Some(t) = totals.add.as_mut() {
                t.kappa += g.kappa;
                t.gamma1 += g.gamma1;
                t.gamma2 += g.gamma2;
            }
            if let Some(t) = totals.keeton.as_mut() {
                let b = g.beta;
                let d = g.kappa * g.kappa - g.gamma * g.gamma;
                let denom = (1.0 - b * g.kappa) * (1.0 - b * g.kappa) - b * b * g.gamma * g.gamma;
                t.kappa += (1.0 - b) * (g.kappa - b * d) / denom;
                t.gamma1 += (1.0 - b) * g.gamma1 / denom;
                t.gamma2 += (1.0 - b) * g.gamma2 / denom;
            }
            if let Some(t) = totals.tom.as_mut() {
                let b = g.beta;
                t.kappa += (1.0 - b) * g.kappa;
                t.gamma1 += (1.0 - b) * g.gamma1;
                t.gamma2 += (1.0 - b) * g.gamma2;
            }
        }

        if let (Some(t), Some(fk)) = (totals.add.as_mut(), foreground_kappas) {
            t.kappa -= fk.total();
        }

        for scheme in schemes {
            let t = totals.get(*scheme).expect("slot populated above");
            if !t.kappa.is_finite() || !t.gamma1.is_finite() || !t.gamma2.is_finite() {
                return Err(LensingError::Numeric(format!(
                    "non-finite {} totals for lightcone {}",
                    scheme.name(),
                    self.id
                )));
            }
        }
        Ok(totals)
    }

    /// Score each halo's expected lensing importance.
    pub fn set_relevance(&mut self, metric: RelevanceMetric) -> Result<()> {
        if self.galaxies.iter().any(|g| g.rho_crit <= 0.0) {
            return Err(LensingError::Config(
                "snap_to_grid must run before set_relevance".into(),
            ));
        }
        match metric {
            RelevanceMetric::Curtis => {
                const MASS_PIVOT: f64 = 1e12; // Msun
                const RADIUS_PIVOT: f64 = 0.01; // Mpc
                for g in &mut self.galaxies {
                    g.relevance =
                        10f64.powf(g.mh) / MASS_PIVOT * (RADIUS_PIVOT / g.rphys).powi(3);
                }
            }
            RelevanceMetric::Linear => {
                let r_max = self.galaxies.iter().map(|g| g.rphys).fold(0.0, f64::max);
                let m_min = self
                    .galaxies
                    .iter()
                    .map(|g| g.mh)
                    .fold(f64::INFINITY, f64::min);
                let m_max = self
                    .galaxies
                    .iter()
                    .map(|g| g.mh)
                    .fold(f64::NEG_INFINITY, f64::max);
                let m_span = (m_max - m_min).max(f64::MIN_POSITIVE);
                let mut peak = 0.0f64;
                for g in &mut self.galaxies {
                    let rel_r = (r_max - g.rphys) / r_max;
                    let rel_m = (g.mh - m_min) / m_span;
                    g.relevance = rel_r.hypot(rel_m);
                    peak = peak.max(g.relevance);
                }
                if peak > 0.0 {
                    for g in &mut self.galaxies {
                        g.relevance /= peak;
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop halos whose relevance falls below `limit`.
    pub fn prune_by_relevance(&mut self, limit: f64) {
        let before = self.galaxies.len();
        self.galaxies.retain(|g| g.relevance >= limit);
        if self.galaxies.len() != before {
            debug!(
                "lightcone {}: pruned {} of {} halos below relevance {}",
                self.id,
                before - self.galaxies.len(),
                before,
                limit
            );
        }
    }

    /// Serialize the cone to bytes using rkyv.
    pub fn to_rkyv_bytes(&self) -> Vec<u8> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .expect("rkyv serialization failed")
            .to_vec()
    }

    /// Save the cone to a file using rkyv.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let bytes = self.to_rkyv_bytes();
        std::fs::write(path, &bytes)?;
        info!(
            "Saved lightcone {} ({} galaxies) to {}",
            self.id,
            self.galaxies.len(),
            path
        );
        Ok(())
    }

    /// Load a cone from an rkyv file.
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let cone = rkyv::from_bytes::<Self, rkyv::rancor::Error>(&bytes)
            .map_err(|e| anyhow::anyhow!("rkyv deserialization failed: {}", e))?;
        info!(
            "Loaded lightcone {} ({} galaxies) from {}",
            cone.id,
            cone.galaxies.len(),
            path
        );
        Ok(cone)
    }
}
