//! Background source catalogs: generate synthetic sources and lens them.
//!
//! A `BackgroundCatalog` is a set of source galaxies behind the foreground
//! field, each carrying an intrinsic complex ellipticity. Two lensing paths
//! write the observed shapes:
//!
//! - [`lens_by_map`](BackgroundCatalog::lens_by_map) — sample convergence and
//!   shear maps (an opaque [`MapLookup`] collaborator) at each source
//!   position; this is the "truth" path for simulated fields
//! - [`lens_by_halos`](BackgroundCatalog::lens_by_halos) — drill a lightcone
//!   at each source and run the halo pipeline; this is the model under test
//!
//! Both paths flag sources with |g| above the strong-lensing threshold and
//! drop them from the catalog (shape estimators lose meaning near critical
//! curves); the count of removed sources is kept for bookkeeping. The
//! surviving shape rows can be exported as (position, ellipticity) pairs for
//! an external correlation-function library.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::{debug, info, warn};

use crate::catalog::ForegroundCatalog;
use crate::ellipticity::{lens_shape, reduced_shear, EllipticityConfig};
use crate::error::{LensingError, Result};
use crate::geometry::ConeGeometry;
use crate::grid::{ForegroundKappas, RedshiftGrid};
use crate::lightcone::{Flavor, KappaConfig, Lightcone, RelevanceMetric, Scheme, SchemeTotals};
use crate::map::{MapComponent, MapLookup};
use crate::profile::{HaloProfile, ProfileTable};
use crate::shmr::MassConcentrationRelation;
use crate::{Complex, ARCMIN_PER_RAD};

/// One background source galaxy.
#[derive(Debug, Clone)]
pub struct SourceGalaxy {
    pub id: u32,
    /// Right ascension, radians.
    pub ra: f64,
    /// Declination, radians.
    pub dec: f64,
    pub mag: f64,
    /// Stellar mass, Msun.
    pub mstar: f64,
    pub z: f64,
    /// Intrinsic complex ellipticity.
    pub e_int: Complex,
    /// Reduced shear applied by the last lensing pass.
    pub g: Complex,
    /// Applied convergence.
    pub kappa: f64,
    /// Applied shear components.
    pub gamma1: f64,
    pub gamma2: f64,
    /// Observed complex ellipticity (equals `e_int` until a lensing pass).
    pub e: Complex,
    /// Strongly lensed flag.
    pub strong: bool,
}

impl SourceGalaxy {
    /// Intrinsic ellipticity modulus.
    pub fn emod_int(&self) -> f64 {
        self.e_int.norm()
    }

    /// Intrinsic position angle, degrees.
    pub fn ephi_int(&self) -> f64 {
        self.e_int.im.atan2(self.e_int.re).to_degrees() / 2.0
    }

    /// Observed ellipticity modulus.
    pub fn emod(&self) -> f64 {
        self.e.norm()
    }

    /// Observed position angle, degrees.
    pub fn ephi(&self) -> f64 {
        self.e.im.atan2(self.e.re).to_degrees() / 2.0
    }
}

/// Parameters for synthetic background-catalog generation.
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    /// Sky domain [ra_init, ra_final, dec_init, dec_final], radians.
    /// RA is left-handed, so ra_init > ra_final for a west-to-east sweep.
    pub domain: [f64; 4],
    /// Source density per square arcminute. Default 10.
    pub density_per_arcmin2: f64,
    /// Magnitude range [bright, faint] (order free). Default [24, 0].
    pub mag_lim: [f64; 2],
    /// Stellar mass range, Msun. Default [1e6, 1e12].
    pub mass_lim: [f64; 2],
    /// Redshift range. Default pins all sources to z = 1.3857.
    pub z_lim: [f64; 2],
    /// Intrinsic ellipticity dispersion per component. Default 0.2.
    pub sigma_e: f64,
    /// When set, sources sit on a uniform grid with this spacing (radians)
    /// instead of random positions, and `density_per_arcmin2` is ignored.
    pub spacing: Option<f64>,
    /// Source redshift assigned to the catalog. Default 1.3857.
    pub zs: f64,
    /// Shape-composition options (strong-lensing threshold).
    pub ellipticity: EllipticityConfig,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            domain: [
                2.0_f64.to_radians(),
                1.0_f64.to_radians(),
                -2.0_f64.to_radians(),
                -1.0_f64.to_radians(),
            ],
            density_per_arcmin2: 10.0,
            mag_lim: [24.0, 0.0],
            mass_lim: [1e6, 1e12],
            z_lim: [1.3857, 1.3857],
            sigma_e: 0.2,
            spacing: None,
            zs: 1.3857,
            ellipticity: EllipticityConfig::default(),
        }
    }
}

/// Parameters for lensing a background catalog by foreground halos.
#[derive(Debug, Clone)]
pub struct HaloLensingConfig {
    /// Lightcone radius drilled around each source, arcminutes. Default 2.
    pub cone_radius_arcmin: f64,
    /// Strong-lens redshift of the system (0 when no lens is present).
    pub zl: f64,
    /// Combination schemes to compute. Default `[add]`.
    pub schemes: Vec<Scheme>,
    /// Scheme whose totals drive the shape composition. Default `add`.
    pub use_scheme: Scheme,
    /// Halos below this relevance are pruned before the kappa stage.
    /// Default 0 (keep everything).
    pub relevance_limit: f64,
    /// Relevance metric used for pruning. Default Curtis.
    pub relevance_metric: RelevanceMetric,
    /// Truncation radius in units of r200. Default 10.
    pub truncation_scale: f64,
    /// Halo profile family. Default BMO1.
    pub profile: HaloProfile,
    /// Scatter the mass–concentration relation. Default true.
    pub concentration_scatter: bool,
    /// Mass–concentration relation.
    pub mc: MassConcentrationRelation,
}

impl Default for HaloLensingConfig {
    fn default() -> Self {
        Self {
            cone_radius_arcmin: 2.0,
            zl: 0.0,
            schemes: vec![Scheme::Add],
            use_scheme: Scheme::Add,
            relevance_limit: 0.0,
            relevance_metric: RelevanceMetric::Curtis,
            truncation_scale: 10.0,
            profile: HaloProfile::Bmo1,
            concentration_scatter: true,
            mc: MassConcentrationRelation::default(),
        }
    }
}

/// Which shape column to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeSet {
    /// Intrinsic (pre-lensing) ellipticities.
    Intrinsic,
    /// Observed (post-lensing) ellipticities.
    Observed,
}

/// A (position, ellipticity) row for an external correlation estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShearSample {
    pub ra: f64,
    pub dec: f64,
    pub e1: f64,
    pub e2: f64,
}

/// A catalog of background sources behind the foreground field.
#[derive(Debug, Clone)]
pub struct BackgroundCatalog {
    pub galaxies: Vec<SourceGalaxy>,
    /// Strong-lens redshift (0 when no lens is present).
    pub zl: f64,
    /// Source redshift.
    pub zs: f64,
    /// Number of strongly lensed sources removed by lensing passes.
    pub excluded_strong: usize,
    ellipticity: EllipticityConfig,
}

impl BackgroundCatalog {
    /// Generate a synthetic source catalog over the configured domain.
    pub fn generate(config: &BackgroundConfig, rng: &mut StdRng) -> Result<Self> {
        let [ra_i, ra_f, dec_i, dec_f] = config.domain;
        if ra_i == ra_f || dec_i == dec_f {
            return Err(LensingError::Config(
                "background domain has zero extent".into(),
            ));
        }
        if config.sigma_e < 0.0 {
            return Err(LensingError::Config("sigma_e must be non-negative".into()));
        }

        // Source positions: either uniform-random at the requested density,
        // or a regular grid when a spacing is given.
        let mut positions: Vec<(f64, f64)> = Vec::new();
        match config.spacing {
            None => {
                let area_arcmin2 = (ra_i - ra_f).abs() * (dec_i - dec_f).abs()
                    * ARCMIN_PER_RAD
                    * ARCMIN_PER_RAD;
                let count = (config.density_per_arcmin2 * area_arcmin2).round() as usize;
                for _ in 0..count {
                    positions.push((
                        uniform_between(ra_i, ra_f, rng),
                        uniform_between(dec_i, dec_f, rng),
                    ));
                }
            }
            Some(spacing) => {
                if spacing <= 0.0 {
                    return Err(LensingError::Config("spacing must be positive".into()));
                }
                // Step counts computed once; accumulating floats against an
                // exclusive end bound makes the lattice size roundoff-dependent.
                let ra_start = ra_i.min(ra_f);
                let dec_start = dec_i.min(dec_f);
                let n_ra = lattice_steps((ra_i - ra_f).abs(), spacing);
                let n_dec = lattice_steps((dec_i - dec_f).abs(), spacing);
                for j in 0..n_dec {
                    for i in 0..n_ra {
                        positions.push((
                            ra_start + i as f64 * spacing,
                            dec_start + j as f64 * spacing,
                        ));
                    }
                }
            }
        }

        let galaxies: Vec<SourceGalaxy> = positions
            .into_iter()
            .enumerate()
            .map(|(i, (ra, dec))| {
                let e_int = Complex::new(
                    draw_bounded_component(config.sigma_e, rng),
                    draw_bounded_component(config.sigma_e, rng),
                );
                SourceGalaxy {
                    id: i as u32,
                    ra,
                    dec,
                    mag: uniform_between(config.mag_lim[0], config.mag_lim[1], rng),
                    mstar: uniform_between(config.mass_lim[0], config.mass_lim[1], rng),
                    z: uniform_between(config.z_lim[0], config.z_lim[1], rng),
                    e_int,
                    g: Complex::new(0.0, 0.0),
                    kappa: 0.0,
                    gamma1: 0.0,
                    gamma2: 0.0,
                    e: e_int,
                    strong: false,
                }
            })
            .collect();

        info!("Generated background catalog with {} sources", galaxies.len());
        Ok(Self {
            galaxies,
            zl: 0.0,
            zs: config.zs,
            excluded_strong: 0,
            ellipticity: config.ellipticity.clone(),
        })
    }

    /// Number of sources currently in the catalog.
    pub fn galaxy_count(&self) -> usize {
        self.galaxies.len()
    }

    /// Lens every source by convergence and shear maps.
    ///
    /// Map failures propagate as [`LensingError::External`]; no source is
    /// mutated unless every lookup succeeded.
    pub fn lens_by_map(
        &mut self,
        kappa_map: &dyn MapLookup,
        shear_map: &dyn MapLookup,
    ) -> Result<()> {
        let mut values = Vec::with_capacity(self.galaxies.len());
        for g in &self.galaxies {
            let kappa = kappa_map.at(g.ra, g.dec, MapComponent::Kappa)?;
            let gamma1 = shear_map.at(g.ra, g.dec, MapComponent::Gamma1)?;
            let gamma2 = shear_map.at(g.ra, g.dec, MapComponent::Gamma2)?;
            values.push((kappa, gamma1, gamma2));
        }
        self.apply_lensing(&values);
        Ok(())
    }

    /// Lens every source by the foreground halos along its sight line.
    ///
    /// Drills a lightcone per source and runs the full per-cone pipeline. A
    /// cone that fails mid-pipeline is isolated: its source keeps zero
    /// lensing (observed shape = intrinsic shape) and the batch continues.
    pub fn lens_by_halos(
        &mut self,
        foreground: &ForegroundCatalog,
        grid: &RedshiftGrid,
        config: &HaloLensingConfig,
        foreground_kappas: Option<&ForegroundKappas>,
        table: Option<&ProfileTable>,
        rng: &mut StdRng,
    ) -> Result<()> {
        if !config.schemes.contains(&config.use_scheme) {
            return Err(LensingError::Config(format!(
                "use_scheme `{}` is not among the requested schemes",
                config.use_scheme.name()
            )));
        }
        let kappa_config = KappaConfig {
            truncation_scale: config.truncation_scale,
            profile: config.profile,
        };

        let mut values = Vec::with_capacity(self.galaxies.len());
        let mut failed = 0usize;
        for source in &self.galaxies {
            let geometry =
                ConeGeometry::new(source.ra, source.dec, config.cone_radius_arcmin);
            let totals = lens_one_cone(
                foreground,
                grid,
                geometry,
                source.id,
                self.zl.max(config.zl),
                self.zs,
                config,
                &kappa_config,
                foreground_kappas,
                table,
                rng,
            );
            match totals {
                Ok(t) => values.push((t.kappa, t.gamma1, t.gamma2)),
                Err(e) => {
                    warn!("lightcone {} failed, using zero lensing: {}", source.id, e);
                    failed += 1;
                    values.push((0.0, 0.0, 0.0));
                }
            }
        }
        if failed > 0 {
            warn!("{} of {} lightcones failed", failed, self.galaxies.len());
        }

        self.apply_lensing(&values);
        Ok(())
    }

    /// Compose observed shapes from per-source (kappa, gamma1, gamma2), flag
    /// strong lensing, and drop flagged sources.
    fn apply_lensing(&mut self, values: &[(f64, f64, f64)]) {
        debug_assert_eq!(values.len(), self.galaxies.len());
        for (g, &(kappa, gamma1, gamma2)) in self.galaxies.iter_mut().zip(values) {
            let reduced = reduced_shear(kappa, gamma1, gamma2);
            let shape = lens_shape(g.e_int, reduced, &self.ellipticity);
            g.kappa = kappa;
            g.gamma1 = gamma1;
            g.gamma2 = gamma2;
            g.g = reduced;
            g.e = shape.e;
            g.strong = shape.strong;
        }

        let before = self.galaxies.len();
        self.galaxies.retain(|g| !g.strong);
        let removed = before - self.galaxies.len();
        if removed > 0 {
            info!("Removed {} strongly lensed sources", removed);
        }
        self.excluded_strong += removed;
    }

    /// Add shear-calibration bias and measurement noise to observed shapes:
    /// `e -> m·e + N(0, sigma_obs)` per component, redrawing any component
    /// that lands outside the unit disk.
    pub fn add_noise(&mut self, m: f64, sigma_obs: f64, rng: &mut StdRng) {
        for g in &mut self.galaxies {
            let mut e1 = m * g.e.re + sigma_obs * rng.sample::<f64, _>(StandardNormal);
            let mut e2 = m * g.e.im + sigma_obs * rng.sample::<f64, _>(StandardNormal);
            while e1.abs() > 1.0 {
                e1 = draw_bounded_component(sigma_obs, rng);
            }
            while e2.abs() > 1.0 {
                e2 = draw_bounded_component(sigma_obs, rng);
            }
            g.e = Complex::new(e1, e2);
        }
    }

    /// Export (position, ellipticity) rows for an external correlation
    /// estimator.
    pub fn shear_samples(&self, which: ShapeSet) -> Vec<ShearSample> {
        self.galaxies
            .iter()
            .map(|g| {
                let e = match which {
                    ShapeSet::Intrinsic => g.e_int,
                    ShapeSet::Observed => g.e,
                };
                ShearSample {
                    ra: g.ra,
                    dec: g.dec,
                    e1: e.re,
                    e2: e.im,
                }
            })
            .collect()
    }
}

/// Run the per-cone pipeline for one source and return the chosen totals.
#[allow(clippy::too_many_arguments)]
fn lens_one_cone(
    foreground: &ForegroundCatalog,
    grid: &RedshiftGrid,
    geometry: ConeGeometry,
    id: u32,
    zl: f64,
    zs: f64,
    config: &HaloLensingConfig,
    kappa_config: &KappaConfig,
    foreground_kappas: Option<&ForegroundKappas>,
    table: Option<&ProfileTable>,
    rng: &mut StdRng,
) -> Result<SchemeTotals> {
    let mut cone = Lightcone::drill(foreground, Flavor::Simulated, geometry, id);
    cone.define_system(zl, zs, crate::lightcone::DEFAULT_COSMOLOGY);
    cone.snap_to_grid(grid, foreground_kappas)?;
    if cone.is_empty() {
        return Ok(SchemeTotals::default());
    }

    if config.relevance_limit > 0.0 {
        cone.set_relevance(config.relevance_metric)?;
        cone.prune_by_relevance(config.relevance_limit);
    }

    cone.draw_concentrations(&config.mc, config.concentration_scatter, rng)?;
    cone.make_kappas(kappa_config, table)?;
    let totals = cone.combine_kappas(&config.schemes, foreground_kappas)?;
    debug!(
        "lightcone {}: {} halos, kappa_{} = {:.5}",
        id,
        cone.galaxy_count(),
        config.use_scheme.name(),
        totals.get(config.use_scheme).map_or(0.0, |t| t.kappa)
    );
    totals
        .get(config.use_scheme)
        .copied()
        .ok_or_else(|| LensingError::Config("requested scheme missing from totals".into()))
}

/// Number of lattice points covering `extent` at `spacing`, end-exclusive.
fn lattice_steps(extent: f64, spacing: f64) -> usize {
    ((extent / spacing - 1e-9).ceil().max(0.0)) as usize
}

/// Uniform draw between two bounds given in either order.
fn uniform_between(a: f64, b: f64, rng: &mut StdRng) -> f64 {
    if a == b {
        return a;
    }
    a + (b - a) * rng.random::<f64>()
}

/// Draw a zero-mean Gaussian ellipticity component, redrawing until it lies
/// inside the unit disk.
fn draw_bounded_component(sigma: f64, rng: &mut StdRng) -> f64 {
    loop {
        let v: f64 = sigma * rng.sample::<f64, _>(StandardNormal);
        if v.abs() <= 1.0 {
            return v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ForegroundGalaxy;
    use crate::grid::GridPlanes;
    use crate::RAD_PER_ARCMIN;
    use rand::SeedableRng;

    /// Uniform map stub: the same value everywhere for each component.
    struct UniformMap {
        kappa: f64,
        gamma1: f64,
        gamma2: f64,
    }

    impl MapLookup for UniformMap {
        fn at(&self, _ra: f64, _dec: f64, component: MapComponent) -> Result<f64> {
            Ok(match component {
                MapComponent::Kappa => self.kappa,
                MapComponent::Gamma1 => self.gamma1,
                MapComponent::Gamma2 => self.gamma2,
            })
        }
    }

    /// A map that always fails, for the error path.
    struct BrokenMap;

    impl MapLookup for BrokenMap {
        fn at(&self, _ra: f64, _dec: f64, _component: MapComponent) -> Result<f64> {
            Err(LensingError::External("map file unreadable".into()))
        }
    }

    fn small_config() -> BackgroundConfig {
        BackgroundConfig {
            domain: [
                10.0 * RAD_PER_ARCMIN,
                0.0,
                0.0,
                10.0 * RAD_PER_ARCMIN,
            ],
            density_per_arcmin2: 0.5,
            ..Default::default()
        }
    }

    fn test_grid() -> RedshiftGrid {
        let planes = GridPlanes {
            z: vec![0.2, 0.6, 1.0],
            da: vec![700.0, 1300.0, 1700.0],
            rho_crit: vec![1.4e11; 3],
            sigma_crit: vec![4.0e15; 3],
            beta: vec![0.4, 0.5, 0.3],
        };
        RedshiftGrid::from_planes(0.6, 1.3857, planes).unwrap()
    }

    #[test]
    fn generation_is_seeded_and_bounded() {
        let config = small_config();
        let mut rng_a = StdRng::seed_from_u64(11);
        let mut rng_b = StdRng::seed_from_u64(11);
        let a = BackgroundCatalog::generate(&config, &mut rng_a).unwrap();
        let b = BackgroundCatalog::generate(&config, &mut rng_b).unwrap();

        // Density 0.5 / arcmin² over a 10×10 arcmin field.
        assert_eq!(a.galaxy_count(), 50);
        assert_eq!(a.galaxy_count(), b.galaxy_count());
        for (ga, gb) in a.galaxies.iter().zip(&b.galaxies) {
            assert_eq!(ga.e_int, gb.e_int);
            assert_eq!(ga.ra, gb.ra);
        }
        for g in &a.galaxies {
            assert!(g.e_int.re.abs() <= 1.0 && g.e_int.im.abs() <= 1.0);
            assert!((g.z - 1.3857).abs() < 1e-12);
            assert_eq!(g.e, g.e_int);
        }
    }

    #[test]
    fn grid_spacing_generates_regular_positions() {
        let config = BackgroundConfig {
            spacing: Some(2.0 * RAD_PER_ARCMIN),
            ..small_config()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let cat = BackgroundCatalog::generate(&config, &mut rng).unwrap();
        // 10 arcmin / 2 arcmin spacing = 5 steps per axis.
        assert_eq!(cat.galaxy_count(), 25);
    }

    #[test]
    fn lens_by_map_shears_round_sources() {
        let config = BackgroundConfig {
            sigma_e: 0.0, // perfectly round sources
            ..small_config()
        };
        let mut rng = StdRng::seed_from_u64(5);
        let mut cat = BackgroundCatalog::generate(&config, &mut rng).unwrap();

        let kappa_map = UniformMap { kappa: 0.1, gamma1: 0.0, gamma2: 0.0 };
        let shear_map = UniformMap { kappa: 0.0, gamma1: 0.045, gamma2: -0.027 };
        cat.lens_by_map(&kappa_map, &shear_map).unwrap();

        let expected_g = Complex::new(0.045, -0.027) / 0.9;
        for g in &cat.galaxies {
            assert!((g.g - expected_g).norm() < 1e-15);
            // A round source takes on the reduced shear exactly.
            assert!((g.e - expected_g).norm() < 1e-15);
            assert!((g.kappa - 0.1).abs() < 1e-15);
        }
        assert_eq!(cat.excluded_strong, 0);
    }

    #[test]
    fn strongly_lensed_sources_are_removed_and_counted() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(6);
        let mut cat = BackgroundCatalog::generate(&config, &mut rng).unwrap();
        let n = cat.galaxy_count();

        // |g| = 0.6/(1-0) > 0.5 threshold for every source.
        let kappa_map = UniformMap { kappa: 0.0, gamma1: 0.6, gamma2: 0.0 };
        let shear_map = UniformMap { kappa: 0.0, gamma1: 0.6, gamma2: 0.0 };
        cat.lens_by_map(&kappa_map, &shear_map).unwrap();

        assert_eq!(cat.galaxy_count(), 0);
        assert_eq!(cat.excluded_strong, n);
    }

    #[test]
    fn map_failure_is_external_and_leaves_catalog_unchanged() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(7);
        let mut cat = BackgroundCatalog::generate(&config, &mut rng).unwrap();
        let before = cat.galaxies.clone();

        let err = cat.lens_by_map(&BrokenMap, &BrokenMap).unwrap_err();
        assert!(matches!(err, LensingError::External(_)));
        for (a, b) in cat.galaxies.iter().zip(&before) {
            assert_eq!(a.e, b.e);
            assert_eq!(a.kappa, b.kappa);
        }
    }

    #[test]
    fn lens_by_halos_over_empty_foreground_is_identity() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(8);
        let mut cat = BackgroundCatalog::generate(&config, &mut rng).unwrap();
        let foreground = ForegroundCatalog::new(vec![]);

        cat.lens_by_halos(
            &foreground,
            &test_grid(),
            &HaloLensingConfig::default(),
            None,
            None,
            &mut rng,
        )
        .unwrap();

        for g in &cat.galaxies {
            assert_eq!(g.e, g.e_int);
            assert_eq!(g.kappa, 0.0);
            assert!(!g.strong);
        }
    }

    #[test]
    fn lens_by_halos_picks_up_foreground_mass() {
        // One massive halo in the middle of a small field: every nearby
        // source should acquire nonzero convergence.
        let foreground = ForegroundCatalog::new(vec![ForegroundGalaxy {
            ra: 5.0 * RAD_PER_ARCMIN,
            dec: 5.0 * RAD_PER_ARCMIN,
            z_obs: 0.6,
            mhalo_obs: 3e14,
            mstar_obs: 11.0,
            mag: 19.0,
            gtype: 0,
        }]);
        let config = BackgroundConfig {
            density_per_arcmin2: 0.2,
            ..small_config()
        };
        let mut rng = StdRng::seed_from_u64(9);
        let mut cat = BackgroundCatalog::generate(&config, &mut rng).unwrap();

        let lens_config = HaloLensingConfig {
            cone_radius_arcmin: 8.0,
            concentration_scatter: false,
            ..Default::default()
        };
        cat.lens_by_halos(&foreground, &test_grid(), &lens_config, None, None, &mut rng)
            .unwrap();

        let lensed = cat.galaxies.iter().filter(|g| g.kappa > 0.0).count();
        assert!(lensed > 0, "no source saw the halo");
    }

    #[test]
    fn use_scheme_must_be_requested() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(10);
        let mut cat = BackgroundCatalog::generate(&config, &mut rng).unwrap();
        let bad = HaloLensingConfig {
            schemes: vec![Scheme::Add],
            use_scheme: Scheme::Keeton,
            ..Default::default()
        };
        assert!(matches!(
            cat.lens_by_halos(
                &ForegroundCatalog::new(vec![]),
                &test_grid(),
                &bad,
                None,
                None,
                &mut rng
            ),
            Err(LensingError::Config(_))
        ));
    }

    #[test]
    fn noise_keeps_components_bounded() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(12);
        let mut cat = BackgroundCatalog::generate(&config, &mut rng).unwrap();
        cat.add_noise(0.9, 0.8, &mut rng);
        for g in &cat.galaxies {
            assert!(g.e.re.abs() <= 1.0 && g.e.im.abs() <= 1.0);
        }
    }

    #[test]
    fn shear_sample_export() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(13);
        let cat = BackgroundCatalog::generate(&config, &mut rng).unwrap();
        let rows = cat.shear_samples(ShapeSet::Intrinsic);
        assert_eq!(rows.len(), cat.galaxy_count());
        assert_eq!(rows[0].e1, cat.galaxies[0].e_int.re);
        assert_eq!(rows[0].ra, cat.galaxies[0].ra);
    }
}
