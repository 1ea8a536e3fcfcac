use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::SmallRng;
use rand::Rng;

use crate::belief::{BeliefView, ParticleBelief, WpfBelief};
use crate::pomdp::Pomdp;

// ---------------------------------------------------------------------------
// Capability traits consumed by bound estimators
// ---------------------------------------------------------------------------

/// Chooses an action from a single (fully observed) state.
pub trait StatePolicy<P: Pomdp> {
    fn action(&self, pomdp: &P, s: &P::State, rng: &mut SmallRng) -> P::Action;
}

/// State value estimate under some fixed policy.
pub trait StateValue<P: Pomdp> {
    fn value(&self, pomdp: &P, s: &P::State) -> f64;
}

/// Chooses an action from a belief.
pub trait BeliefPolicy<P: Pomdp> {
    fn action(
        &self,
        pomdp: &P,
        b: &BeliefView<'_, P::State, P::Obs>,
        rng: &mut SmallRng,
    ) -> P::Action;
}

/// Belief value estimate under some fixed policy.
pub trait BeliefValue<P: Pomdp> {
    fn value(&self, pomdp: &P, b: &BeliefView<'_, P::State, P::Obs>) -> f64;
}

/// Belief updater applied between simulated decision epochs.
pub trait BeliefUpdater<P: Pomdp> {
    fn update(
        &self,
        pomdp: &P,
        b: &WpfBelief<P::State, P::Obs>,
        a: &P::Action,
        o: &P::Obs,
        rng: &mut SmallRng,
    ) -> WpfBelief<P::State, P::Obs>;
}

// ---------------------------------------------------------------------------
// RandomPolicy
// ---------------------------------------------------------------------------

/// Uniform draw over the model's action set.
pub struct RandomPolicy;

impl<P: Pomdp> StatePolicy<P> for RandomPolicy {
    fn action(&self, pomdp: &P, s: &P::State, rng: &mut SmallRng) -> P::Action {
        let unit = [1.0];
        let view = BeliefView::new(std::slice::from_ref(s), &unit, 0, None);
        let actions = pomdp.actions(&view);
        debug_assert!(!actions.is_empty(), "model offered no actions");
        actions[rng.gen_range(0..actions.len())].clone()
    }
}

impl<P: Pomdp> BeliefPolicy<P> for RandomPolicy {
    fn action(
        &self,
        pomdp: &P,
        b: &BeliefView<'_, P::State, P::Obs>,
        rng: &mut SmallRng,
    ) -> P::Action {
        let actions = pomdp.actions(b);
        debug_assert!(!actions.is_empty(), "model offered no actions");
        actions[rng.gen_range(0..actions.len())].clone()
    }
}

// ---------------------------------------------------------------------------
// Function-backed policies
// ---------------------------------------------------------------------------

/// A state policy backed by a closure.
pub struct FunctionPolicy<F>(pub F);

impl<P: Pomdp, F: Fn(&P, &P::State) -> P::Action> StatePolicy<P> for FunctionPolicy<F> {
    fn action(&self, pomdp: &P, s: &P::State, _rng: &mut SmallRng) -> P::Action {
        (self.0)(pomdp, s)
    }
}

/// A belief policy backed by a closure.
pub struct FunctionBeliefPolicy<F>(pub F);

impl<P: Pomdp, F> BeliefPolicy<P> for FunctionBeliefPolicy<F>
where
    F: Fn(&P, &BeliefView<'_, P::State, P::Obs>) -> P::Action,
{
    fn action(
        &self,
        pomdp: &P,
        b: &BeliefView<'_, P::State, P::Obs>,
        _rng: &mut SmallRng,
    ) -> P::Action {
        (self.0)(pomdp, b)
    }
}

// ---------------------------------------------------------------------------
// BootstrapFilter — SIR particle filter for between-epoch updates
// ---------------------------------------------------------------------------

/// Sampling-importance-resampling filter with a fixed particle count.
///
/// Resamples `m` particles from the prior, propagates each through the
/// generative model with the taken action, and weights by the observation
/// likelihood. A fully degenerate posterior (all likelihoods zero) falls
/// back to uniform weights over the propagated particles.
pub struct BootstrapFilter {
    m: usize,
}

impl BootstrapFilter {
    pub fn new(m: usize) -> Self {
        assert!(m > 0, "need at least one particle");
        Self { m }
    }
}

impl<P: Pomdp> BeliefUpdater<P> for BootstrapFilter {
    fn update(
        &self,
        pomdp: &P,
        b: &WpfBelief<P::State, P::Obs>,
        a: &P::Action,
        o: &P::Obs,
        rng: &mut SmallRng,
    ) -> WpfBelief<P::State, P::Obs> {
        let dist = WeightedIndex::new(b.weights()).expect("update on a zero-weight belief");
        let mut next = WpfBelief::empty();
        for _ in 0..self.m {
            let s = &b.particles()[dist.sample(rng)];
            if pomdp.is_terminal(s) {
                next.push(s.clone(), 0.0);
                continue;
            }
            let (sp, _, _) = pomdp.step(s, a, rng);
            let w = pomdp.obs_likelihood(a, &sp, o);
            next.push(sp, w);
        }
        if next.weight_sum() == 0.0 {
            let n = next.n_particles();
            let particles: Vec<P::State> = next.particles().to_vec();
            next = WpfBelief::with_sum(particles, vec![1.0; n], n as f64);
        }
        next.set_obs(Some(o.clone()));
        next
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
