//! Reconstruction: Monte Carlo sampling of Pr(kappa_halo) per sight line.
//!
//! The halo properties of a lightcone are uncertain — masses, concentrations,
//! sometimes the redshifts themselves. Reconstruction characterizes that
//! uncertainty empirically: re-draw the uncertain properties, re-run the
//! kappa pipeline, and record the cone totals, `n_realizations` times.
//!
//! [`sample_cone`] is a pure function of (cone snapshot, seed): realisation
//! `j` draws from `StdRng::seed_from_u64(seed + j)`, so any realisation can
//! be reproduced in isolation and the per-cone loop can be farmed out to a
//! worker pool without changing results. Cones never share mutable state —
//! the grid and foreground tables are read-only.
//!
//! Batch behavior: one failing cone must not sink a long run.
//! [`reconstruct`] isolates per-cone failures, logs them, and moves on;
//! realisations that hit a recoverable numeric anomaly (a near-critical
//! configuration) are skipped and show up as a shortfall in the sample count.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::error::{LensingError, Result};
use crate::grid::RedshiftGrid;
use crate::lightcone::{KappaConfig, Lightcone, Scheme};
use crate::profile::{HaloProfile, ProfileTable};
use crate::samples::SampleSet;
use crate::shmr::MassConcentrationRelation;

/// Parameters for the realisation loop.
#[derive(Debug, Clone)]
pub struct ReconstructConfig {
    /// Realisations drawn per cone. Default 100.
    pub n_realizations: usize,
    /// Truncation radius in units of r200. Default 10.
    pub truncation_scale: f64,
    /// Halo profile family. Default BMO1.
    pub profile: HaloProfile,
    /// Combination schemes computed each realisation. Must include `add`
    /// (the magnification uses the add totals). Default `[add]`.
    pub schemes: Vec<Scheme>,
    /// Scheme whose kappa total is recorded as the sample. Default `add`.
    pub record_scheme: Scheme,
    /// Use the weak-lensing magnification approximation. Default true.
    pub weak_approx: bool,
    /// Scatter the mass–concentration relation. Default true.
    pub concentration_scatter: bool,
    /// Photometric redshift scatter applied each realisation (None = use
    /// catalog redshifts as-is). Default None.
    pub photoz_sigma: Option<f64>,
    /// Mass–concentration relation.
    pub mc: MassConcentrationRelation,
    /// Base seed; cone `id` and realisation index are folded in on top.
    pub seed: u64,
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        Self {
            n_realizations: 100,
            truncation_scale: 10.0,
            profile: HaloProfile::Bmo1,
            schemes: vec![Scheme::Add],
            record_scheme: Scheme::Add,
            weak_approx: true,
            concentration_scatter: true,
            photoz_sigma: None,
            mc: MassConcentrationRelation::default(),
            seed: 0,
        }
    }
}

/// The sampled distributions for one cone.
#[derive(Debug, Clone)]
pub struct ConeSamples {
    pub cone_id: u32,
    /// Pr(kappa_halo) draws under the recorded scheme.
    pub kappa: SampleSet,
    /// Pr(mu_halo) draws from the add totals.
    pub mu: SampleSet,
}

/// Draw `config.n_realizations` samples of (kappa_halo, mu_halo) for one cone.
///
/// The cone must already have [`Lightcone::define_system`] applied. The input
/// snapshot is never mutated: a working copy absorbs the per-realisation
/// column overwrites. Realisations that hit a recoverable numeric anomaly are
/// skipped with a log line, so the returned sets may hold fewer than
/// `n_realizations` draws.
pub fn sample_cone(
    cone: &Lightcone,
    grid: &RedshiftGrid,
    config: &ReconstructConfig,
    table: Option<&ProfileTable>,
    seed: u64,
) -> Result<ConeSamples> {
    if config.n_realizations == 0 {
        return Err(LensingError::Config(
            "n_realizations must be at least 1".into(),
        ));
    }
    if !config.schemes.contains(&config.record_scheme) {
        return Err(LensingError::Config(format!(
            "record_scheme `{}` is not among the requested schemes",
            config.record_scheme.name()
        )));
    }
    if !config.schemes.contains(&Scheme::Add) {
        return Err(LensingError::Config(
            "the add scheme is required for the magnification".into(),
        ));
    }
    if cone.zs <= 0.0 {
        return Err(LensingError::Config(
            "define_system must run before sample_cone".into(),
        ));
    }

    let kappa_config = KappaConfig {
        truncation_scale: config.truncation_scale,
        profile: config.profile,
    };

    let mut work = cone.clone();
    work.snap_to_grid(grid, None)?;

    let mut kappa_set = SampleSet::new("kappa_halo");
    let mut mu_set = SampleSet::new("mu_halo");
    kappa_set.truth = cone.kappa_true;

    let mut skipped = 0usize;
    for j in 0..config.n_realizations {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(j as u64));

        if let Some(sigma) = config.photoz_sigma {
            work.mimic_photoz_error(sigma, &mut rng);
            work.snap_to_grid(grid, None)?;
        }
        work.draw_concentrations(&config.mc, config.concentration_scatter, &mut rng)?;
        work.make_kappas(&kappa_config, table)?;
        let totals = work.combine_kappas(&config.schemes, None)?;

        let add = totals.get(Scheme::Add).expect("add is always requested");
        let mu = match add.magnification(config.weak_approx) {
            Ok(mu) => mu,
            Err(LensingError::Numeric(msg)) => {
                debug!("cone {} realisation {}: skipped ({})", cone.id, j, msg);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        let recorded = totals
            .get(config.record_scheme)
            .expect("membership checked above");
        kappa_set.push(recorded.kappa);
        mu_set.push(mu);
    }

    if skipped > 0 {
        warn!(
            "cone {}: {} of {} realisations skipped on numeric anomalies",
            cone.id, skipped, config.n_realizations
        );
    }
    debug!(
        "cone {}: {} kappa_{} samples drawn",
        cone.id,
        kappa_set.len(),
        config.record_scheme.name()
    );

    Ok(ConeSamples {
        cone_id: cone.id,
        kappa: kappa_set,
        mu: mu_set,
    })
}

/// Sample every cone in a batch, isolating per-cone failures.
///
/// A cone that fails (bad configuration, inconsistent state) is logged and
/// dropped from the output; the rest of the batch continues. Outputs are
/// idempotent per cone: re-running with the same config reproduces the same
/// samples.
pub fn reconstruct(
    cones: &[Lightcone],
    grid: &RedshiftGrid,
    config: &ReconstructConfig,
    table: Option<&ProfileTable>,
) -> Vec<ConeSamples> {
    let mut results = Vec::with_capacity(cones.len());
    for cone in cones {
        let seed = cone_seed(config.seed, cone.id);
        match sample_cone(cone, grid, config, table, seed) {
            Ok(samples) => results.push(samples),
            Err(e) => warn!("cone {}: reconstruction failed: {}", cone.id, e),
        }
    }
    info!(
        "Reconstructed {} of {} cones ({} realisations each)",
        results.len(),
        cones.len(),
        config.n_realizations
    );
    results
}

/// Fold a cone ID into the base seed, keeping per-cone streams disjoint.
fn cone_seed(base: u64, id: u32) -> u64 {
    base.wrapping_add((id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ForegroundCatalog, ForegroundGalaxy};
    use crate::geometry::ConeGeometry;
    use crate::grid::uniform_test_grid;
    use crate::lightcone::{Flavor, DEFAULT_COSMOLOGY};
    use crate::RAD_PER_ARCMIN;

    fn small_catalog() -> ForegroundCatalog {
        let mut galaxies = Vec::new();
        for i in 0..12 {
            let angle = i as f64 * 0.5236;
            let r = 0.3 + 0.12 * i as f64;
            galaxies.push(ForegroundGalaxy {
                ra: r * angle.cos() * RAD_PER_ARCMIN,
                dec: r * angle.sin() * RAD_PER_ARCMIN,
                z_obs: 0.15 + 0.08 * i as f64,
                mhalo_obs: 10f64.powf(11.0 + 0.2 * (i % 5) as f64),
                mstar_obs: 9.5 + 0.1 * i as f64,
                mag: 20.0 + 0.3 * i as f64,
                gtype: 0,
            });
        }
        ForegroundCatalog::new(galaxies)
    }

    fn drilled_cone() -> Lightcone {
        let geometry = ConeGeometry::new(0.0, 0.0, 2.0);
        let mut cone = Lightcone::drill(&small_catalog(), Flavor::Simulated, geometry, 5);
        cone.define_system(0.6, 1.4, DEFAULT_COSMOLOGY);
        cone
    }

    #[test]
    fn fixed_seed_reproduces_samples_exactly() {
        let cone = drilled_cone();
        let grid = uniform_test_grid(0.6, 1.4, 20);
        let config = ReconstructConfig {
            n_realizations: 25,
            ..Default::default()
        };

        let a = sample_cone(&cone, &grid, &config, None, 42).unwrap();
        let b = sample_cone(&cone, &grid, &config, None, 42).unwrap();
        assert_eq!(a.kappa.samples, b.kappa.samples);
        assert_eq!(a.mu.samples, b.mu.samples);
        assert_eq!(a.kappa.len(), 25);

        // A different seed draws different concentrations.
        let c = sample_cone(&cone, &grid, &config, None, 43).unwrap();
        assert_ne!(a.kappa.samples, c.kappa.samples);
    }

    #[test]
    fn scatter_off_collapses_the_distribution() {
        let cone = drilled_cone();
        let grid = uniform_test_grid(0.6, 1.4, 20);
        let config = ReconstructConfig {
            n_realizations: 10,
            concentration_scatter: false,
            ..Default::default()
        };
        let samples = sample_cone(&cone, &grid, &config, None, 1).unwrap();
        // With no random inputs every realisation is identical.
        assert_eq!(samples.kappa.samples[0], samples.kappa.samples[9]);
        assert!(samples.kappa.std_dev().unwrap() < 1e-12);
        assert!(samples.kappa.samples[0] > 0.0);
        // Weak-approximation magnification is 1 + 2·kappa.
        let expected_mu = 1.0 + 2.0 * samples.kappa.samples[0];
        assert!((samples.mu.samples[0] - expected_mu).abs() < 1e-15);
    }

    #[test]
    fn empty_cone_yields_zero_kappa_and_unit_mu() {
        let geometry = ConeGeometry::new(0.5, 0.5, 2.0); // far from the catalog
        let mut cone = Lightcone::drill(&small_catalog(), Flavor::Simulated, geometry, 0);
        cone.define_system(0.6, 1.4, DEFAULT_COSMOLOGY);

        let grid = uniform_test_grid(0.6, 1.4, 20);
        let config = ReconstructConfig {
            n_realizations: 5,
            ..Default::default()
        };
        let samples = sample_cone(&cone, &grid, &config, None, 0).unwrap();
        assert_eq!(samples.kappa.len(), 5);
        assert!(samples.kappa.samples.iter().all(|&k| k == 0.0));
        assert!(samples.mu.samples.iter().all(|&m| m == 1.0));
    }

    #[test]
    fn truth_tag_rides_along() {
        let mut cone = drilled_cone();
        cone.kappa_true = Some(0.021);
        let grid = uniform_test_grid(0.6, 1.4, 20);
        let config = ReconstructConfig {
            n_realizations: 3,
            ..Default::default()
        };
        let samples = sample_cone(&cone, &grid, &config, None, 7).unwrap();
        assert_eq!(samples.kappa.truth, Some(0.021));
        assert_eq!(samples.mu.truth, None);
    }

    #[test]
    fn keeton_can_be_recorded() {
        let cone = drilled_cone();
        let grid = uniform_test_grid(0.6, 1.4, 20);
        let config = ReconstructConfig {
            n_realizations: 8,
            schemes: vec![Scheme::Add, Scheme::Keeton],
            record_scheme: Scheme::Keeton,
            concentration_scatter: false,
            ..Default::default()
        };
        let keeton = sample_cone(&cone, &grid, &config, None, 3).unwrap();

        let add_config = ReconstructConfig {
            schemes: vec![Scheme::Add],
            record_scheme: Scheme::Add,
            ..config
        };
        let add = sample_cone(&cone, &grid, &add_config, None, 3).unwrap();
        // Nonzero betas make the multi-plane correction bite.
        assert_ne!(keeton.kappa.samples[0], add.kappa.samples[0]);
    }

    #[test]
    fn bad_configurations_are_rejected() {
        let cone = drilled_cone();
        let grid = uniform_test_grid(0.6, 1.4, 20);

        let no_add = ReconstructConfig {
            schemes: vec![Scheme::Keeton],
            record_scheme: Scheme::Keeton,
            ..Default::default()
        };
        assert!(matches!(
            sample_cone(&cone, &grid, &no_add, None, 0),
            Err(LensingError::Config(_))
        ));

        let missing_record = ReconstructConfig {
            schemes: vec![Scheme::Add],
            record_scheme: Scheme::Tom,
            ..Default::default()
        };
        assert!(matches!(
            sample_cone(&cone, &grid, &missing_record, None, 0),
            Err(LensingError::Config(_))
        ));
    }

    #[test]
    fn batch_isolates_failing_cones() {
        let good = drilled_cone();
        // This cone never had define_system applied: zs = 0 is invalid.
        let geometry = ConeGeometry::new(0.0, 0.0, 2.0);
        let broken = Lightcone::drill(&small_catalog(), Flavor::Simulated, geometry, 99);

        let grid = uniform_test_grid(0.6, 1.4, 20);
        let config = ReconstructConfig {
            n_realizations: 4,
            ..Default::default()
        };
        let results = reconstruct(&[good, broken], &grid, &config, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].cone_id, 5);
    }

    #[test]
    fn table_path_matches_direct_path_closely() {
        let cone = drilled_cone();
        let grid = uniform_test_grid(0.6, 1.4, 20);
        let config = ReconstructConfig {
            n_realizations: 6,
            concentration_scatter: false,
            ..Default::default()
        };
        let direct = sample_cone(&cone, &grid, &config, None, 0).unwrap();

        let table = ProfileTable::build(
            HaloProfile::Bmo1,
            &crate::profile::ProfileTableConfig::default(),
        )
        .unwrap();
        let tabled = sample_cone(&cone, &grid, &config, Some(&table), 0).unwrap();

        for (a, b) in direct.kappa.samples.iter().zip(&tabled.kappa.samples) {
            assert!((a - b).abs() / a.abs().max(1e-12) < 1e-3);
        }
    }
}
