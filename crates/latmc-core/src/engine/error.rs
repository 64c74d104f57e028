use thiserror::Error;

use super::config::ConfigError;
use super::validation::ValidationIssue;
use crate::core::interop::records::InteropError;
use crate::core::interop::sink::SinkError;
use crate::core::symmetry::SymmetryError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Space group error: {0}")]
    Symmetry(#[from] SymmetryError),

    #[error("The '{requested}' context requires the '{required}' context, which has not been built")]
    MissingContext {
        required: &'static str,
        requested: &'static str,
    },

    #[error("Structural defect during '{stage}': {reason}")]
    StructuralDefect { stage: &'static str, reason: String },

    #[error("Invalid geometry for transition {transition}: {reason}")]
    InvalidGeometry { transition: usize, reason: String },

    #[error("Transition {transition} describes a ring path")]
    RingTransition { transition: usize },

    #[error("Binary contract violation: {0}")]
    Interop(#[from] InteropError),

    #[error("Failed to persist binary output: {0}")]
    Sink(#[from] SinkError),

    #[error("Invalid {domain} {index}: {reason}")]
    InvalidReference {
        domain: &'static str,
        index: usize,
        reason: String,
    },

    #[error("Unresolved conflict: {0}")]
    UnresolvedConflict(String),

    #[error("Internal logic error: {0}")]
    Internal(String),
}

/// The error tier a failed build pass ended in.
///
/// Every tier aborts the pass. Advisory findings never fail a pass; they travel as
/// [`ValidationIssue`] warnings next to the result or the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureTier {
    /// A reference object the pass needs is unusable as authored, so the pass stopped.
    /// Objects that are merely suspicious are reported as warnings instead.
    Validation,
    /// A reference change produced a conflict no handler could resolve.
    Conflict,
    /// Broken preconditions, invariants or binary contracts.
    Fatal,
}

impl EngineError {
    pub fn tier(&self) -> FailureTier {
        match self {
            EngineError::InvalidReference { .. } => FailureTier::Validation,
            EngineError::UnresolvedConflict(_) => FailureTier::Conflict,
            _ => FailureTier::Fatal,
        }
    }
}

/// Caller-facing outcome of a failed build pass.
#[derive(Debug, Error)]
#[error("{tier:?} failure: {error}")]
pub struct BuildReport {
    pub tier: FailureTier,
    #[source]
    pub error: EngineError,
    pub warnings: Vec<ValidationIssue>,
}

impl BuildReport {
    pub fn new(error: EngineError, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            tier: error.tier(),
            error,
            warnings,
        }
    }
}

impl From<EngineError> for BuildReport {
    fn from(error: EngineError) -> Self {
        Self::new(error, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_follow_error_kind() {
        let invalid = EngineError::InvalidReference {
            domain: "site",
            index: 2,
            reason: "unknown particle set".to_string(),
        };
        assert_eq!(invalid.tier(), FailureTier::Validation);
        assert_eq!(
            EngineError::UnresolvedConflict("ring".to_string()).tier(),
            FailureTier::Conflict
        );
        assert_eq!(
            EngineError::RingTransition { transition: 0 }.tier(),
            FailureTier::Fatal
        );
    }

    #[test]
    fn report_takes_tier_from_error() {
        let report = BuildReport::from(EngineError::MissingContext {
            required: "structure",
            requested: "energy",
        });
        assert_eq!(report.tier, FailureTier::Fatal);
        assert!(report.to_string().contains("structure"));
    }

    #[test]
    fn validation_failure_keeps_warnings_apart() {
        let warning = ValidationIssue {
            domain: "simulation",
            index: 0,
            detail: "no seed".to_string(),
        };
        let report = BuildReport::new(
            EngineError::InvalidReference {
                domain: "pair interaction",
                index: 5,
                reason: "stored at position 0".to_string(),
            },
            vec![warning.clone()],
        );
        assert_eq!(report.tier, FailureTier::Validation);
        assert_eq!(report.warnings, vec![warning]);
        assert!(report.to_string().starts_with("Validation failure"));
    }
}
