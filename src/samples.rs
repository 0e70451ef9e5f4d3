//! Empirical sample distributions and their persistence.
//!
//! Each Monte Carlo realisation of a lightcone yields one draw of the total
//! convergence and magnification; a [`SampleSet`] accumulates those draws
//! into an empirical Pr(quantity | catalog) for the sight line. For
//! simulated sight lines the directly ray-traced value rides along as the
//! `truth` tag, which is what calibration runs compare the sample median
//! against.
//!
//! Sample sets serialize with rkyv and round-trip exactly — a batch can be
//! interrupted and restarted at cone granularity with no loss.

use rkyv::{Archive, Deserialize, Serialize};
use tracing::info;

/// Empirical distribution of one scalar quantity for one sight line.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct SampleSet {
    /// Name of the sampled quantity, e.g. `kappa_halo` or `mu_halo`.
    pub name: String,
    /// The accumulated draws.
    pub samples: Vec<f64>,
    /// Ray-traced "truth" value, when the sight line is simulated.
    pub truth: Option<f64>,
}

impl SampleSet {
    /// Start an empty distribution for the named quantity.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            samples: Vec::new(),
            truth: None,
        }
    }

    /// Record one draw.
    pub fn push(&mut self, value: f64) {
        self.samples.push(value);
    }

    /// Number of draws recorded.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` when no draws have been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample median, or None for an empty set.
    pub fn median(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        Some(if sorted.len() % 2 == 1 {
            sorted[mid]
        } else {
            0.5 * (sorted[mid - 1] + sorted[mid])
        })
    }

    /// Sample mean, or None for an empty set.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Population standard deviation, or None for an empty set.
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let var = self
            .samples
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f64>()
            / self.samples.len() as f64;
        Some(var.sqrt())
    }

    /// Serialize to bytes using rkyv.
    pub fn to_rkyv_bytes(&self) -> Vec<u8> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .expect("rkyv serialization failed")
            .to_vec()
    }

    /// Save the distribution to a file using rkyv.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let bytes = self.to_rkyv_bytes();
        std::fs::write(path, &bytes)?;
        info!(
            "Saved {} samples of {} to {} ({} bytes)",
            self.samples.len(),
            self.name,
            path,
            bytes.len()
        );
        Ok(())
    }

    /// Load a distribution from an rkyv file.
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let set = rkyv::from_bytes::<Self, rkyv::rancor::Error>(&bytes)
            .map_err(|e| anyhow::anyhow!("rkyv deserialization failed: {}", e))?;
        info!(
            "Loaded {} samples of {} from {}",
            set.samples.len(),
            set.name,
            path
        );
        Ok(set)
    }
}
