//! Error taxonomy for the lensing pipeline.
//!
//! Configuration mistakes (an unknown combination scheme, an unrecognized
//! profile family) are fatal and surfaced immediately — they are never
//! silently defaulted. Numeric anomalies (a NaN from a profile evaluation, a
//! magnification denominator crossing zero) are recoverable: callers may
//! exclude the offending object or re-sample the realisation. External
//! collaborator failures keep their own kind so batch drivers can tell a bad
//! map file from a bad cone.

use thiserror::Error;

/// All the ways the lensing pipeline can fail.
#[derive(Debug, Error)]
pub enum LensingError {
    /// A combination-scheme name that is not `add`, `keeton` or `tom`.
    #[error("unknown combination scheme `{0}` (expected add, keeton or tom)")]
    UnknownScheme(String),

    /// A halo-profile family name that is not recognized.
    #[error("unknown halo profile `{0}` (expected bmo1 or bmo2)")]
    UnknownProfile(String),

    /// A malformed option combination or out-of-range parameter.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A numeric anomaly the caller may recover from by excluding the
    /// offending object or re-drawing the realisation.
    #[error("numeric anomaly: {0}")]
    Numeric(String),

    /// A failure inside an external collaborator (map lookup, mass relation).
    #[error("external collaborator failure: {0}")]
    External(String),

    /// An I/O failure while reading or writing durable state.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LensingError>;
