//! # lenscone
//!
//! A **line-of-sight gravitational lensing engine** written in Rust.
//!
//! Given a catalog of foreground galaxies, `lenscone` drills a conical region
//! (a *lightcone*) around a sight line, assigns a truncated halo mass profile
//! to every foreground object, and accumulates each halo's contribution to the
//! convergence and shear at the cone center. Repeating the calculation over
//! many Monte Carlo realisations of the uncertain halo properties builds an
//! empirical probability distribution Pr(kappa_halo) for the sight line —
//! the quantity needed to correct time-delay and magnification measurements
//! of strong gravitational lenses for mass along the line of sight.
//!
//! ## Features
//!
//! - **Lightcone drilling** — fast cone selection from a foreground catalog,
//!   projected into a local tangent-plane frame with the left-handed sky
//!   convention used by ray-tracing simulations
//! - **Truncated halo profiles** — closed-form convergence and shear for the
//!   Baltz–Marshall–Oguri profile (both truncation sharpnesses), with an
//!   optional precomputed lookup table for batch work
//! - **Multi-plane combination** — `add`, `keeton`, and `tom` schemes for
//!   collapsing per-halo contributions into a single effective convergence
//! - **Shape propagation** — complex-ellipticity composition of intrinsic
//!   source shapes with the reduced shear, including the strong-lensing branch
//! - **Reproducible sampling** — every random draw is seeded; a realisation is
//!   a pure function of (cone snapshot, seed)
//! - **Zero-copy persistence** — lightcones and sample distributions
//!   serialize with [rkyv](https://docs.rs/rkyv) and round-trip exactly
//!
//! ## Example
//!
//! ```no_run
//! use lenscone::{
//!     ConeGeometry, Flavor, ForegroundCatalog, Lightcone, RedshiftGrid,
//!     ReconstructConfig, sample_cone,
//! };
//!
//! // Read a foreground catalog (positions in radians, halo masses in Msun)
//! let catalog = ForegroundCatalog::read_csv("data/foreground.csv", &Default::default()).unwrap();
//!
//! // A redshift grid is supplied by a cosmology backend: per-plane distances,
//! // critical densities and lensing efficiencies for the (zl, zs) system.
//! let grid: RedshiftGrid = unimplemented!("provided by a distance calculator");
//!
//! // Drill a 2-arcmin lightcone around the sight line and fix the system
//! let geometry = ConeGeometry::new(0.0121, -0.0034, 2.0);
//! let mut cone = Lightcone::drill(&catalog, Flavor::Simulated, geometry, 0);
//! cone.define_system(0.62, 2.1, [0.25, 0.75, 0.73]);
//!
//! // Draw 1000 realisations of Pr(kappa_halo | catalog)
//! let config = ReconstructConfig {
//!     n_realizations: 1000,
//!     ..Default::default()
//! };
//! let samples = sample_cone(&cone, &grid, &config, None, 42).unwrap();
//! println!("kappa_halo = {:.4} (median of {} draws)",
//!     samples.kappa.median().unwrap(), samples.kappa.len());
//! ```
//!
//! ## Pipeline overview
//!
//! 1. **Drill** — square prefilter then exact circular cut around the cone
//!    center; project survivors into local polar coordinates (r, phi)
//! 2. **Snap** — snap each object's redshift to the nearest plane of a
//!    precomputed redshift grid, pulling distances and critical densities
//! 3. **Sample** — draw halo mass and concentration for this realisation;
//!    derive r200, the scale radius, and the normalized radius X
//! 4. **Evaluate** — truncated-profile F/G functions give each halo's
//!    convergence and shear at the cone center
//! 5. **Combine** — sum per-halo contributions under one or more combination
//!    schemes; derive the magnification
//! 6. **Compose** — propagate the totals into observed source ellipticities
//!    via the reduced shear
//!
//! ## References
//!
//! - Baltz, Marshall & Oguri 2009, JCAP 1, 15 — truncated NFW profile
//! - Keeton 2003, ApJ 584, 664 — multi-plane convergence correction
//! - Neto et al. 2007, MNRAS 381, 1450 — mass–concentration relation
//! - McCully et al. 2017, ApJ 836, 141 — halo relevance ranking

pub mod background;
pub mod catalog;
pub mod ellipticity;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod lightcone;
pub mod map;
pub mod profile;
pub mod reconstruct;
pub mod samples;
pub mod shmr;

pub use background::{
    BackgroundCatalog, BackgroundConfig, HaloLensingConfig, ShapeSet, ShearSample, SourceGalaxy,
};
pub use catalog::{CatalogConfig, ForegroundCatalog, ForegroundGalaxy, CENTRAL_TYPE};
pub use ellipticity::{
    lens_shape, observed_ellipticity, reduced_shear, EllipticityConfig, LensedShape,
};
pub use error::{LensingError, Result};
pub use geometry::{ConeGeometry, LocalPosition};
pub use grid::{ForegroundKappas, GridPlanes, RedshiftGrid};
pub use lightcone::{
    ConeTotals, Flavor, HaloRecord, KappaConfig, Lightcone, RelevanceMetric, Scheme, SchemeTotals,
};
pub use map::{MapComponent, MapLookup};
pub use profile::{delta_c, HaloProfile, ProfileTable, ProfileTableConfig};
pub use reconstruct::{reconstruct, sample_cone, ConeSamples, ReconstructConfig};
pub use samples::SampleSet;
pub use shmr::{MassConcentrationRelation, StellarHaloMassRelation};

// Commonly used types and constants.
// All lensing math is 64-bit: a single cone sums hundreds of per-halo
// convergences of order 1e-4, and the Keeton correction divides nearly
// equal quantities, so 32-bit floats are not sufficient here.

/// Complex number type used for ellipticities and reduced shear.
pub type Complex = nalgebra::Complex<f64>;

/// Arcminutes per radian.
pub const ARCMIN_PER_RAD: f64 = 10800.0 / std::f64::consts::PI;

/// Radians per arcminute.
pub const RAD_PER_ARCMIN: f64 = std::f64::consts::PI / 10800.0;
