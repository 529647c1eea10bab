use crate::progress::CancelFlag;
use thiserror::Error;

/// Failure classes of a conversion job.
///
/// A target that cannot be reached is not an error: the search still returns
/// its closest candidate with `target_met = false`.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Missing, unreadable or unsupported input, or an invalid request. No search is attempted.
    #[error("input error: {0}")]
    Input(String),

    /// A render or convert step failed. Iteration 0 is the resolution-independent prepare step.
    #[error("render failed at {dpi} dpi (trial {iteration}): {reason}")]
    Render {
        dpi: u32,
        iteration: u32,
        reason: String,
    },

    #[error("cancelled after {iterations} trial(s)")]
    Cancelled { iterations: u32 },

    #[error("search produced no usable artifact after {iterations} trial(s)")]
    NoArtifact { iterations: u32 },

    #[error("scratch i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    pub fn input(msg: impl Into<String>) -> Self {
        ConvertError::Input(msg.into())
    }

    /// Failure of the render or prepare step of trial `iteration`. A child
    /// killed by the same Ctrl+C that set `cancel` surfaces as `Cancelled`.
    pub(crate) fn step(cancel: &CancelFlag, dpi: u32, iteration: u32, err: &anyhow::Error) -> Self {
        if cancel.is_cancelled() {
            return ConvertError::Cancelled {
                iterations: iteration.saturating_sub(1),
            };
        }
        ConvertError::Render {
            dpi,
            iteration,
            reason: format!("{err:#}"),
        }
    }

    /// True for outcomes that leave no output behind by request rather than by fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConvertError::Cancelled { .. })
    }
}
