use serde::{Deserialize, Serialize};

/// Why an iterative solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// A tolerance or confidence bound was met.
    Converged,
    /// The iteration budget ran out first.
    MaxIterationsReached,
}
