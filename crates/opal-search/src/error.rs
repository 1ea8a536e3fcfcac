use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// BoundError — estimator failures crossing the search boundary
// ---------------------------------------------------------------------------

/// Error from a bound estimator (rollout policy, sub-solver, user callback).
///
/// Wraps `Box<dyn Error + Send + Sync>` so `opal-search` stays decoupled
/// from estimator-specific error types.
#[derive(Debug)]
pub struct BoundError(Box<dyn std::error::Error + Send + Sync>);

impl BoundError {
    /// Wrap any error into a BoundError.
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }

    /// Create from a string message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self(msg.into().into())
    }
}

impl fmt::Display for BoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BoundError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<String> for BoundError {
    fn from(s: String) -> Self {
        Self::msg(s)
    }
}

// ---------------------------------------------------------------------------
// ConfigError — rejected at planner construction
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("particle bounds must satisfy 1 <= m_min <= m_max, got {m_min}..{m_max}")]
    ParticleBounds { m_min: usize, m_max: usize },

    #[error("zeta must lie in (0, 1), got {0}")]
    Zeta(f64),

    #[error("xi must lie in (0, 1], got {0}")]
    Xi(f64),

    #[error("packing radius delta must be non-negative, got {0}")]
    Delta(f64),

    #[error("epsilon_0 must be non-negative, got {0}")]
    Epsilon(f64),

    #[error("time budget must be positive")]
    TimeBudget,

    #[error("design-effect threshold must be at least 1, got {0}")]
    DeffThreshold(f64),

    #[error("constant bound must be finite, got {0}")]
    NonFiniteBound(f64),
}

// ---------------------------------------------------------------------------
// PlanError — surfaced by the planner entry point
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PlanError {
    #[error("bound estimator failed: {0}")]
    Bound(#[from] BoundError),

    #[error("root belief carries no nonterminal particle mass")]
    DegenerateRoot,

    #[error("model offered no actions at the root")]
    NoActions,
}

// ---------------------------------------------------------------------------
// Warning — advisory runtime diagnostics
// ---------------------------------------------------------------------------

/// Runtime sanity warnings. Advisory: the search continues after each.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// A lower bound exceeded its upper bound by more than the consistency
    /// fix threshold.
    BoundInversion { lower: f64, upper: f64, depth: u32 },

    /// An estimator produced a NaN or infinite bound.
    NonFiniteBound { lower: f64, upper: f64, depth: u32 },

    /// The search overran the wall-clock budget beyond the warning fraction.
    Overtime {
        elapsed_secs: f64,
        budget_secs: f64,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::BoundInversion { lower, upper, depth } => write!(
                f,
                "lower bound {lower} exceeds upper bound {upper} at depth {depth}"
            ),
            Warning::NonFiniteBound { lower, upper, depth } => write!(
                f,
                "non-finite bound pair ({lower}, {upper}) at depth {depth}"
            ),
            Warning::Overtime {
                elapsed_secs,
                budget_secs,
            } => write!(
                f,
                "search ran {elapsed_secs:.3}s against a {budget_secs:.3}s budget"
            ),
        }
    }
}
