use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use opal_pomdp::{
    BeliefPolicy, BeliefUpdater, BeliefValue, BeliefView, ParticleBelief, Pomdp, StatePolicy,
    StateValue,
};

use crate::error::{BoundError, ConfigError, Warning};

/// Fallible belief-value callback; the extension point where user code runs.
pub type BoundFn<P> = Box<
    dyn Fn(
        &P,
        &BeliefView<'_, <P as Pomdp>::State, <P as Pomdp>::Obs>,
    ) -> Result<f64, BoundError>,
>;

// ---------------------------------------------------------------------------
// Bound — estimator specifications, resolved once at planner construction
// ---------------------------------------------------------------------------

/// A leaf value estimator, before resolution.
///
/// `solve` turns a specification into its [`SolvedBound`] form, which caches
/// the policy, a dedicated RNG, and scratch buffers sized to the particle
/// cap.
pub enum Bound<P: Pomdp> {
    /// A fixed number.
    Constant(f64),
    /// A user callback over the belief.
    Function(BoundFn<P>),
    /// Simulates the underlying MDP from each particle with a state policy.
    FoRollout(Box<dyn StatePolicy<P>>),
    /// Weighted mean of a state value function.
    FoValue(Box<dyn StateValue<P>>),
    /// Simulates the POMDP from each particle, tracking a belief with the
    /// supplied updater.
    PoRollout {
        policy: Box<dyn BeliefPolicy<P>>,
        updater: Box<dyn BeliefUpdater<P>>,
    },
    /// Evaluates a belief value function directly.
    PoValue(Box<dyn BeliefValue<P>>),
    /// Recursive observation-grouped rollout under a belief policy.
    SemiPoRollout(Box<dyn BeliefPolicy<P>>),
}

impl<P: Pomdp> Bound<P> {
    /// Wrap an infallible belief-value closure.
    pub fn function(
        f: impl Fn(&P, &BeliefView<'_, P::State, P::Obs>) -> f64 + 'static,
    ) -> Self {
        Bound::Function(Box::new(move |pomdp, b| Ok(f(pomdp, b))))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Bound::Constant(c) = self {
            if !c.is_finite() {
                return Err(ConfigError::NonFiniteBound(*c));
            }
        }
        Ok(())
    }

    fn solve(self, m_max: usize, rng: &mut SmallRng) -> SolvedBound<P> {
        let mut seeded = || SmallRng::from_rng(&mut *rng).expect("seeding estimator rng");
        match self {
            Bound::Constant(c) => SolvedBound::Constant(c),
            Bound::Function(f) => SolvedBound::Function(f),
            Bound::FoRollout(policy) => SolvedBound::FoRollout(SolvedFoRollout {
                policy,
                rng: seeded(),
                values: Vec::with_capacity(m_max),
            }),
            Bound::FoValue(value) => SolvedBound::FoValue(SolvedFoValue {
                value,
                values: Vec::with_capacity(m_max),
            }),
            Bound::PoRollout { policy, updater } => SolvedBound::PoRollout(SolvedPoRollout {
                policy,
                updater,
                rng: seeded(),
            }),
            Bound::PoValue(value) => SolvedBound::PoValue(SolvedPoValue { value }),
            Bound::SemiPoRollout(policy) => SolvedBound::SemiPoRollout(SolvedSemiPoRollout {
                policy,
                rng: seeded(),
                scratch: Vec::new(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// SolvedBound — estimator plus cached policy, RNG, and scratch
// ---------------------------------------------------------------------------

pub enum SolvedBound<P: Pomdp> {
    Constant(f64),
    Function(BoundFn<P>),
    FoRollout(SolvedFoRollout<P>),
    FoValue(SolvedFoValue<P>),
    PoRollout(SolvedPoRollout<P>),
    PoValue(SolvedPoValue<P>),
    SemiPoRollout(SolvedSemiPoRollout<P>),
}

impl<P: Pomdp> SolvedBound<P> {
    /// Evaluate the bound for one belief.
    pub fn bound(
        &mut self,
        pomdp: &P,
        b: &BeliefView<'_, P::State, P::Obs>,
        max_depth: u32,
    ) -> Result<f64, BoundError> {
        match self {
            SolvedBound::Constant(c) => Ok(*c),
            SolvedBound::Function(f) => f(pomdp, b),
            SolvedBound::FoRollout(inner) => Ok(inner.bound(pomdp, b, max_depth)),
            SolvedBound::FoValue(inner) => Ok(inner.bound(pomdp, b)),
            SolvedBound::PoRollout(inner) => Ok(inner.bound(pomdp, b, max_depth)),
            SolvedBound::PoValue(inner) => Ok(inner.value.value(pomdp, b)),
            SolvedBound::SemiPoRollout(inner) => Ok(inner.bound(pomdp, b, max_depth)),
        }
    }

    /// Evaluate the bound for sibling beliefs sharing one particle set.
    ///
    /// Estimators whose per-particle value depends only on the state run a
    /// single inner pass over the particles; the rest fall back to one
    /// [`bound`](Self::bound) call per sibling.
    #[allow(clippy::too_many_arguments)]
    pub fn bound_batch(
        &mut self,
        out: &mut Vec<f64>,
        pomdp: &P,
        particles: &[P::State],
        weight_vecs: &[Vec<f64>],
        obs: &[P::Obs],
        depth: u32,
        max_depth: u32,
    ) -> Result<(), BoundError> {
        debug_assert_eq!(weight_vecs.len(), obs.len());
        out.clear();
        match self {
            SolvedBound::Constant(c) => {
                out.resize(weight_vecs.len(), *c);
                Ok(())
            }
            SolvedBound::FoRollout(inner) => {
                inner.fill_values(pomdp, particles, max_depth.saturating_sub(depth));
                for weights in weight_vecs {
                    out.push(weighted_mean(&inner.values, weights));
                }
                Ok(())
            }
            SolvedBound::FoValue(inner) => {
                inner.fill_values(pomdp, particles);
                for weights in weight_vecs {
                    out.push(weighted_mean(&inner.values, weights));
                }
                Ok(())
            }
            _ => {
                for (weights, o) in weight_vecs.iter().zip(obs) {
                    let view = BeliefView::new(particles, weights, depth, Some(o));
                    out.push(self.bound(pomdp, &view, max_depth)?);
                }
                Ok(())
            }
        }
    }
}

/// Weighted mean of `values`; zero when the weights vanish.
fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    debug_assert_eq!(values.len(), weights.len());
    let sum: f64 = weights.iter().sum();
    if sum == 0.0 {
        return 0.0;
    }
    values
        .iter()
        .zip(weights)
        .map(|(v, w)| v * w)
        .sum::<f64>()
        / sum
}

// ---------------------------------------------------------------------------
// SolvedFoRollout / SolvedFoValue — state-only estimators
// ---------------------------------------------------------------------------

pub struct SolvedFoRollout<P: Pomdp> {
    policy: Box<dyn StatePolicy<P>>,
    rng: SmallRng,
    values: Vec<f64>,
}

impl<P: Pomdp> SolvedFoRollout<P> {
    fn bound(&mut self, pomdp: &P, b: &BeliefView<'_, P::State, P::Obs>, max_depth: u32) -> f64 {
        let steps = max_depth.saturating_sub(b.depth());
        let sum = b.weight_sum();
        if sum == 0.0 {
            return 0.0;
        }
        let mut total = 0.0;
        for (s, w) in b.weighted() {
            if w > 0.0 {
                total += w * self.rollout(pomdp, s, steps);
            }
        }
        total / sum
    }

    fn fill_values(&mut self, pomdp: &P, particles: &[P::State], steps: u32) {
        self.values.clear();
        for s in particles {
            let v = self.rollout(pomdp, s, steps);
            self.values.push(v);
        }
    }

    /// Simulate the underlying MDP for `steps` steps, discarding observations.
    fn rollout(&mut self, pomdp: &P, s: &P::State, steps: u32) -> f64 {
        let mut s = s.clone();
        let mut disc = 1.0;
        let mut total = 0.0;
        for _ in 0..steps {
            if pomdp.is_terminal(&s) {
                break;
            }
            let a = self.policy.action(pomdp, &s, &mut self.rng);
            let (next, _, r) = pomdp.step(&s, &a, &mut self.rng);
            total += disc * r;
            disc *= pomdp.discount();
            s = next;
        }
        total
    }
}

pub struct SolvedFoValue<P: Pomdp> {
    value: Box<dyn StateValue<P>>,
    values: Vec<f64>,
}

impl<P: Pomdp> SolvedFoValue<P> {
    fn bound(&mut self, pomdp: &P, b: &BeliefView<'_, P::State, P::Obs>) -> f64 {
        let sum = b.weight_sum();
        if sum == 0.0 {
            return 0.0;
        }
        b.weighted()
            .filter(|(_, w)| *w > 0.0)
            .map(|(s, w)| w * self.value.value(pomdp, s))
            .sum::<f64>()
            / sum
    }

    fn fill_values(&mut self, pomdp: &P, particles: &[P::State]) {
        self.values.clear();
        for s in particles {
            self.values.push(self.value.value(pomdp, s));
        }
    }
}

// ---------------------------------------------------------------------------
// SolvedPoRollout / SolvedPoValue — belief-conditioned estimators
// ---------------------------------------------------------------------------

pub struct SolvedPoRollout<P: Pomdp> {
    policy: Box<dyn BeliefPolicy<P>>,
    updater: Box<dyn BeliefUpdater<P>>,
    rng: SmallRng,
}

impl<P: Pomdp> SolvedPoRollout<P> {
    fn bound(&mut self, pomdp: &P, b: &BeliefView<'_, P::State, P::Obs>, max_depth: u32) -> f64 {
        let steps = max_depth.saturating_sub(b.depth());
        let sum = b.weight_sum();
        if sum == 0.0 {
            return 0.0;
        }
        let mut total = 0.0;
        for (s, w) in b.weighted() {
            if w > 0.0 {
                total += w * self.simulate(pomdp, s, b, steps);
            }
        }
        total / sum
    }

    /// Simulate the POMDP from `s`, acting on the tracked belief.
    fn simulate(
        &mut self,
        pomdp: &P,
        s: &P::State,
        b: &BeliefView<'_, P::State, P::Obs>,
        steps: u32,
    ) -> f64 {
        let mut s = s.clone();
        let mut belief = b.to_owned_belief();
        let mut disc = 1.0;
        let mut total = 0.0;
        for _ in 0..steps {
            if pomdp.is_terminal(&s) {
                break;
            }
            let a = self.policy.action(pomdp, &belief.view(), &mut self.rng);
            let (next, o, r) = pomdp.step(&s, &a, &mut self.rng);
            total += disc * r;
            disc *= pomdp.discount();
            belief = self.updater.update(pomdp, &belief, &a, &o, &mut self.rng);
            s = next;
        }
        total
    }
}

pub struct SolvedPoValue<P: Pomdp> {
    value: Box<dyn BeliefValue<P>>,
}

// ---------------------------------------------------------------------------
// SolvedSemiPoRollout — observation-grouped recursive rollout
// ---------------------------------------------------------------------------

/// Per-depth grouping scratch. Taken out of the solved estimator for the
/// duration of one recursion level so deeper levels can borrow their own.
struct ObsGroups<P: Pomdp> {
    index: HashMap<P::Obs, usize>,
    states: Vec<Vec<P::State>>,
    weights: Vec<Vec<f64>>,
    in_use: usize,
}

impl<P: Pomdp> Default for ObsGroups<P> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            states: Vec::new(),
            weights: Vec::new(),
            in_use: 0,
        }
    }
}

impl<P: Pomdp> ObsGroups<P> {
    fn clear(&mut self) {
        self.index.clear();
        for v in &mut self.states[..self.in_use] {
            v.clear();
        }
        for v in &mut self.weights[..self.in_use] {
            v.clear();
        }
        self.in_use = 0;
    }

    fn group_mut(&mut self, o: P::Obs) -> usize {
        match self.index.get(&o) {
            Some(&g) => g,
            None => {
                let g = self.in_use;
                if g == self.states.len() {
                    self.states.push(Vec::new());
                    self.weights.push(Vec::new());
                }
                self.index.insert(o, g);
                self.in_use += 1;
                g
            }
        }
    }
}

pub struct SolvedSemiPoRollout<P: Pomdp> {
    policy: Box<dyn BeliefPolicy<P>>,
    rng: SmallRng,
    scratch: Vec<ObsGroups<P>>,
}

impl<P: Pomdp> SolvedSemiPoRollout<P> {
    fn bound(&mut self, pomdp: &P, b: &BeliefView<'_, P::State, P::Obs>, max_depth: u32) -> f64 {
        self.recurse(pomdp, b.particles(), b.weights(), b.depth(), max_depth, 0)
    }

    /// One recursion level: act once on the pooled belief, then recurse per
    /// sampled-observation group weighted by the group's share of mass.
    fn recurse(
        &mut self,
        pomdp: &P,
        states: &[P::State],
        weights: &[f64],
        depth: u32,
        max_depth: u32,
        level: usize,
    ) -> f64 {
        if depth >= max_depth {
            return 0.0;
        }
        let sum: f64 = weights.iter().sum();
        if sum == 0.0 {
            return 0.0;
        }

        // Terminal particles keep their share of the denominator but
        // contribute no reward and no continuation.
        let mut live = 0;
        let mut live_idx = 0;
        for (i, (s, w)) in states.iter().zip(weights).enumerate() {
            if *w > 0.0 && !pomdp.is_terminal(s) {
                live += 1;
                live_idx = i;
            }
        }
        if live == 0 {
            return 0.0;
        }
        if live == 1 {
            let share = weights[live_idx] / sum;
            return share * self.single_path(pomdp, &states[live_idx], depth, max_depth);
        }

        let view = BeliefView::with_sum(states, weights, sum, depth, None);
        let a = self.policy.action(pomdp, &view, &mut self.rng);

        if self.scratch.len() <= level {
            self.scratch.resize_with(level + 1, ObsGroups::default);
        }
        let mut groups = std::mem::take(&mut self.scratch[level]);
        groups.clear();

        let mut reward = 0.0;
        for (s, &w) in states.iter().zip(weights) {
            if w <= 0.0 || pomdp.is_terminal(s) {
                continue;
            }
            let (next, o, r) = pomdp.step(s, &a, &mut self.rng);
            reward += w * r;
            if !pomdp.is_terminal(&next) {
                let g = groups.group_mut(o);
                groups.states[g].push(next);
                groups.weights[g].push(w);
            }
        }

        let mut value = reward / sum;
        let gamma = pomdp.discount();
        for g in 0..groups.in_use {
            let group_w: f64 = groups.weights[g].iter().sum();
            let v = self.recurse(
                pomdp,
                &groups.states[g],
                &groups.weights[g],
                depth + 1,
                max_depth,
                level + 1,
            );
            value += gamma * group_w / sum * v;
        }

        self.scratch[level] = groups;
        value
    }

    /// Cheap continuation for a lone particle: simulate a single path under
    /// the policy applied to the singleton belief.
    fn single_path(&mut self, pomdp: &P, s: &P::State, depth: u32, max_depth: u32) -> f64 {
        let mut s = s.clone();
        let mut disc = 1.0;
        let mut total = 0.0;
        let unit = [1.0];
        for d in depth..max_depth {
            if pomdp.is_terminal(&s) {
                break;
            }
            let view = BeliefView::with_sum(std::slice::from_ref(&s), &unit, 1.0, d, None);
            let a = self.policy.action(pomdp, &view, &mut self.rng);
            let (next, _, r) = pomdp.step(&s, &a, &mut self.rng);
            total += disc * r;
            disc *= pomdp.discount();
            s = next;
        }
        total
    }
}

// ---------------------------------------------------------------------------
// IndependentBounds — a lower/upper estimator pair
// ---------------------------------------------------------------------------

/// A lower and upper estimator evaluated together.
///
/// When the estimators disagree by no more than `consistency_fix_thresh`,
/// the upper bound is lifted to the lower silently; larger inversions and
/// non-finite values are reported as warnings and then repaired so the
/// search can continue.
pub struct IndependentBounds<P: Pomdp> {
    pub lower: Bound<P>,
    pub upper: Bound<P>,
    pub consistency_fix_thresh: f64,
}

impl<P: Pomdp> IndependentBounds<P> {
    pub fn new(lower: Bound<P>, upper: Bound<P>) -> Self {
        Self {
            lower,
            upper,
            consistency_fix_thresh: 1e-8,
        }
    }

    pub fn constant(lower: f64, upper: f64) -> Self {
        Self::new(Bound::Constant(lower), Bound::Constant(upper))
    }

    pub fn with_fix_thresh(mut self, thresh: f64) -> Self {
        self.consistency_fix_thresh = thresh;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        self.lower.validate()?;
        self.upper.validate()
    }

    pub(crate) fn solve(self, m_max: usize, rng: &mut SmallRng) -> SolvedBounds<P> {
        SolvedBounds {
            lower: self.lower.solve(m_max, rng),
            upper: self.upper.solve(m_max, rng),
            consistency_fix_thresh: self.consistency_fix_thresh,
            l_buf: Vec::with_capacity(8),
            u_buf: Vec::with_capacity(8),
        }
    }
}

/// Solved lower/upper pair with batch scratch.
pub struct SolvedBounds<P: Pomdp> {
    lower: SolvedBound<P>,
    upper: SolvedBound<P>,
    consistency_fix_thresh: f64,
    l_buf: Vec<f64>,
    u_buf: Vec<f64>,
}

impl<P: Pomdp> SolvedBounds<P> {
    pub(crate) fn bound_pair(
        &mut self,
        pomdp: &P,
        b: &BeliefView<'_, P::State, P::Obs>,
        max_depth: u32,
        warnings: &mut Vec<Warning>,
    ) -> Result<(f64, f64), BoundError> {
        let l = self.lower.bound(pomdp, b, max_depth)?;
        let u = self.upper.bound(pomdp, b, max_depth)?;
        Ok(fix_pair(l, u, self.consistency_fix_thresh, b.depth(), warnings))
    }

    /// Evaluate both estimators for sibling beliefs over one particle set,
    /// writing repaired pairs into `l_out`/`u_out`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn bound_pair_batch(
        &mut self,
        l_out: &mut Vec<f64>,
        u_out: &mut Vec<f64>,
        pomdp: &P,
        particles: &[P::State],
        weight_vecs: &[Vec<f64>],
        obs: &[P::Obs],
        depth: u32,
        max_depth: u32,
        warnings: &mut Vec<Warning>,
    ) -> Result<(), BoundError> {
        let mut l_buf = std::mem::take(&mut self.l_buf);
        let mut u_buf = std::mem::take(&mut self.u_buf);
        let mut result = self.lower.bound_batch(
            &mut l_buf, pomdp, particles, weight_vecs, obs, depth, max_depth,
        );
        if result.is_ok() {
            result = self.upper.bound_batch(
                &mut u_buf, pomdp, particles, weight_vecs, obs, depth, max_depth,
            );
        }

        if result.is_ok() {
            l_out.clear();
            u_out.clear();
            for (&l, &u) in l_buf.iter().zip(&u_buf) {
                let (l, u) = fix_pair(l, u, self.consistency_fix_thresh, depth, warnings);
                l_out.push(l);
                u_out.push(u);
            }
        }
        self.l_buf = l_buf;
        self.u_buf = u_buf;
        result
    }
}

/// Repair a bound pair so `l ≤ u` and both are finite.
fn fix_pair(
    mut l: f64,
    mut u: f64,
    thresh: f64,
    depth: u32,
    warnings: &mut Vec<Warning>,
) -> (f64, f64) {
    if !l.is_finite() || !u.is_finite() {
        warnings.push(Warning::NonFiniteBound {
            lower: l,
            upper: u,
            depth,
        });
        if !l.is_finite() {
            l = if u.is_finite() { u } else { 0.0 };
        }
        if !u.is_finite() {
            u = l;
        }
    }
    if u < l {
        if u < l - thresh {
            warnings.push(Warning::BoundInversion {
                lower: l,
                upper: u,
                depth,
            });
        }
        u = l;
    }
    (l, u)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
