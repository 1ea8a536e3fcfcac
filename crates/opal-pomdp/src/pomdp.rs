use std::hash::Hash;

use rand::rngs::SmallRng;

use crate::belief::BeliefView;

// ---------------------------------------------------------------------------
// Pomdp — the model capability consumed by the planner
// ---------------------------------------------------------------------------

/// The narrow contract a POMDP model exposes to the planner.
///
/// Observations must be hashable so the expansion pipeline can map sampled
/// observations to dense branch indices. Model calls are infallible by
/// contract: a panicking model is a model bug, while recoverable failures
/// enter the planner through the bound-estimator boundary.
pub trait Pomdp {
    type State: Clone;
    type Action: Clone + PartialEq;
    type Obs: Clone + Eq + Hash;

    /// Discount factor `γ ∈ (0, 1]`.
    fn discount(&self) -> f64;

    fn is_terminal(&self, s: &Self::State) -> bool;

    /// Belief-conditioned action set. Most models ignore the belief.
    fn actions(&self, b: &BeliefView<'_, Self::State, Self::Obs>) -> Vec<Self::Action>;

    /// The generative model `G(s, a)`: next state, observation, reward.
    fn step(
        &self,
        s: &Self::State,
        a: &Self::Action,
        rng: &mut SmallRng,
    ) -> (Self::State, Self::Obs, f64);

    /// Density of observing `o` after taking `a` and landing in `next`.
    fn obs_likelihood(&self, a: &Self::Action, next: &Self::State, o: &Self::Obs) -> f64;

    /// Draw from the initial state distribution.
    fn sample_initial(&self, rng: &mut SmallRng) -> Self::State;
}
