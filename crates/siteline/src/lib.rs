pub mod aggregate;
pub mod diagnostic;
pub mod fragment;
pub mod ion_series;
pub mod localize;
pub mod mass;
pub mod model;
pub mod ppm;
pub mod quant;
pub mod run;
pub mod settings;
pub mod spectra;
pub mod tmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Input tables disagree with each other or with the configuration.
    /// Aborts the run
    DataInconsistency(String),
    /// A modification's residue pattern does not occur in its peptide segment
    InvalidLocalization { peptide_id: u64, modification: String },
    /// Not enough signal to reach a conclusion
    InsufficientEvidence,
    /// A spectrum or configuration lookup failed
    UpstreamUnavailable(String),
    /// Run aborted by the caller
    Cancelled,
    InvalidPattern(String),
}

impl Error {
    /// Fatal errors stop the run; everything else degrades the affected
    /// identification only
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DataInconsistency(_) | Error::Cancelled | Error::InvalidPattern(_)
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataInconsistency(msg) => write!(f, "data inconsistency: {}", msg),
            Self::InvalidLocalization {
                peptide_id,
                modification,
            } => write!(
                f,
                "peptide {}: no residue can carry modification `{}`",
                peptide_id, modification
            ),
            Self::InsufficientEvidence => f.write_str("insufficient evidence"),
            Self::UpstreamUnavailable(what) => write!(f, "unavailable: {}", what),
            Self::Cancelled => f.write_str("run cancelled"),
            Self::InvalidPattern(msg) => write!(f, "invalid site pattern: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::InvalidPattern(e.to_string())
    }
}
