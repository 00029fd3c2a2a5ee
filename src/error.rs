use crate::VmlmbSolution;

/// An error type for clear diagnostics.
///
/// The configuration variants are returned before any work is done. The
/// remaining variants are produced by the [`Vmlmb`](crate::Vmlmb) driver when
/// the reverse-communication workspace stops on something other than
/// convergence; they carry the best solution found so far.
#[derive(Debug, thiserror::Error)]
pub enum VmlmbError {
    #[error("The starting point must have at least one coordinate.")]
    EmptyPoint,
    #[error("The number of stored curvature pairs must be at least 1 (got {0}).")]
    InvalidMemory(usize),
    #[error("Invalid value {value} for option `{name}`: expected {expected}.")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },
    #[error("Bound `{name}` has {len} values but the problem has {expected} variables.")]
    BoundLength {
        name: &'static str,
        len: usize,
        expected: usize,
    },
    #[error("Lower bound {lower} exceeds upper bound {upper} at index {index}.")]
    InconsistentBounds { index: usize, lower: f64, upper: f64 },
    #[error(
        "Maximum number of iterations reached without converging. The best solution found is returned."
    )]
    MaxIterationsReached {
        /// The best solution found before the iteration limit was reached.
        last_solution: Box<VmlmbSolution>,
    },
    #[error("The line search stopped with a warning: {reason}")]
    LineSearchWarning {
        reason: String,
        /// The best solution found before the line search gave up.
        last_solution: Box<VmlmbSolution>,
    },
    #[error("The line search failed: {reason}")]
    LineSearchFailed {
        reason: String,
        /// The best solution found before the line search failed.
        last_solution: Box<VmlmbSolution>,
    },
    #[error("The objective returned a non-finite value or gradient: {reason}")]
    NonFiniteObjective {
        reason: String,
        last_solution: Box<VmlmbSolution>,
    },
    #[error("The workspace was driven out of order: {0}")]
    ProtocolViolation(String),
}

impl VmlmbError {
    /// The best solution carried by a run-time failure, if any.
    pub fn last_solution(&self) -> Option<&VmlmbSolution> {
        match self {
            Self::MaxIterationsReached { last_solution }
            | Self::LineSearchWarning { last_solution, .. }
            | Self::LineSearchFailed { last_solution, .. }
            | Self::NonFiniteObjective { last_solution, .. } => Some(&**last_solution),
            _ => None,
        }
    }
}
