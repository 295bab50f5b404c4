use crate::solvers::StopReason;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, UniverseError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UniverseError {
    /// Rejected before any solver invocation.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// A direction stopped short of its target time and the caller asked
    /// for a complete trajectory.
    #[error("integration diverged after t = {last_valid_time} ({reason})")]
    IntegrationDiverged {
        last_valid_time: f64,
        reason: StopReason,
    },
}

impl UniverseError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        UniverseError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Fails with `InvalidParameter` unless `value` is finite.
pub(crate) fn ensure_finite(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(UniverseError::invalid(
            name,
            format!("must be finite, got {}", value),
        ))
    }
}
