use std::time::Duration;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use opal_pomdp::{Pomdp, StateGrid, WpfBelief};

use crate::bounds::IndependentBounds;
use crate::error::{ConfigError, PlanError};

/// Fallback action policy consulted when planning fails.
pub type DefaultAction<P> = Box<
    dyn Fn(
        &P,
        &WpfBelief<<P as Pomdp>::State, <P as Pomdp>::Obs>,
        &PlanError,
    ) -> <P as Pomdp>::Action,
>;

// ---------------------------------------------------------------------------
// SolverConfig
// ---------------------------------------------------------------------------

/// Planner configuration. Fields are public and mutated in place after
/// [`new`](Self::new); validation happens once at planner construction.
pub struct SolverConfig<P: Pomdp> {
    /// Root gap at which the search terminates.
    pub epsilon_0: f64,
    /// Excess-uncertainty fraction governing descent tolerance, in `(0, 1]`.
    pub xi: f64,
    /// Wall-clock budget per decision.
    pub t_max: Duration,
    /// Fraction of `t_max` beyond which an overtime warning is emitted.
    pub overtime_warning_threshold: f64,
    pub max_trials: u32,
    pub max_depth: u32,
    /// L1 packing radius; 0 packs only identical posteriors.
    pub delta: f64,
    /// Particle count bounds per belief.
    pub m_min: usize,
    pub m_max: usize,
    /// KLD confidence tail, in `(0, 1)`.
    pub zeta: f64,
    /// Design-effect threshold triggering in-tree resampling.
    pub deff_threshold: f64,
    /// State discretizer for the KLD rule; `None` disables adaptive counts.
    pub grid: Option<Box<dyn StateGrid<P::State>>>,
    /// Leaf value estimators.
    pub bounds: IndependentBounds<P>,
    /// Belief-node arena size hint.
    pub num_b: usize,
    /// Hand the built tree back through the result info. Forces a fresh
    /// tree per decision so the returned tree is never mutated afterwards.
    pub tree_in_info: bool,
    /// Echo warnings to stderr as they are recorded.
    pub bounds_warnings: bool,
    /// Fallback applied to `(pomdp, belief, error)` when planning fails.
    pub default_action: Option<DefaultAction<P>>,
    /// Planner random source. Estimator RNGs are seeded from it once at
    /// construction.
    pub rng: SmallRng,
}

impl<P: Pomdp> SolverConfig<P> {
    pub fn new(bounds: IndependentBounds<P>) -> Self {
        Self {
            epsilon_0: 0.0,
            xi: 0.95,
            t_max: Duration::from_secs(1),
            overtime_warning_threshold: 0.2,
            max_trials: u32::MAX,
            max_depth: 90,
            delta: 0.1,
            m_min: 30,
            m_max: 200,
            zeta: 0.1,
            deff_threshold: 2.0,
            grid: None,
            bounds,
            num_b: 10_000,
            tree_in_info: false,
            bounds_warnings: true,
            default_action: None,
            rng: SmallRng::seed_from_u64(0),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.m_min < 1 || self.m_min > self.m_max {
            return Err(ConfigError::ParticleBounds {
                m_min: self.m_min,
                m_max: self.m_max,
            });
        }
        if !(self.zeta > 0.0 && self.zeta < 1.0) {
            return Err(ConfigError::Zeta(self.zeta));
        }
        if !(self.xi > 0.0 && self.xi <= 1.0) {
            return Err(ConfigError::Xi(self.xi));
        }
        if !(self.delta >= 0.0) {
            return Err(ConfigError::Delta(self.delta));
        }
        if !(self.epsilon_0 >= 0.0) {
            return Err(ConfigError::Epsilon(self.epsilon_0));
        }
        if self.t_max.is_zero() {
            return Err(ConfigError::TimeBudget);
        }
        if !(self.deff_threshold >= 1.0) {
            return Err(ConfigError::DeffThreshold(self.deff_threshold));
        }
        self.bounds.validate()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
