use std::collections::HashMap;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::SmallRng;
use rand::Rng;

use opal_pomdp::{access, kld_sample_size, ParticleBelief, Pomdp, WpfBelief};

use crate::error::{BoundError, PlanError};
use crate::planner::Planner;
use crate::tree::{BeliefIdx, Span, ROOT};

// ---------------------------------------------------------------------------
// Scratch — planner-owned buffers reused across expansions
// ---------------------------------------------------------------------------

/// Expansion scratch. Everything here is cleared (capacity retained) at the
/// start of each action-branch expansion.
pub(crate) struct Scratch<P: Pomdp> {
    /// The materialized belief the current node is expanded from.
    pub(crate) belief: WpfBelief<P::State, P::Obs>,
    /// Grid access counts for the KLD rule.
    pub(crate) counts: Vec<u32>,
    /// In-tree resampling buffer.
    resample: Vec<P::State>,
    /// Raw observations in dense-index order, with accumulated weights.
    obs: Vec<P::Obs>,
    obs_w: Vec<f64>,
    obs_index: HashMap<P::Obs, usize>,
    /// Candidate reweighting prefix and its L1-normalized form.
    prefix: Vec<f64>,
    norm_buf: Vec<f64>,
    /// Accepted packed observations.
    packed_obs: Vec<P::Obs>,
    packed_w: Vec<f64>,
    w: Vec<Vec<f64>>,
    norm_w: Vec<Vec<f64>>,
    /// Child bound caches filled by the batch estimator call.
    l: Vec<f64>,
    u: Vec<f64>,
}

impl<P: Pomdp> Scratch<P> {
    pub(crate) fn new(m_max: usize, n_bins: usize) -> Self {
        Self {
            belief: WpfBelief::empty(),
            counts: vec![0; n_bins],
            resample: Vec::with_capacity(m_max),
            obs: Vec::new(),
            obs_w: Vec::new(),
            obs_index: HashMap::new(),
            prefix: Vec::with_capacity(m_max),
            norm_buf: Vec::with_capacity(m_max),
            packed_obs: Vec::new(),
            packed_w: Vec::new(),
            w: Vec::new(),
            norm_w: Vec::new(),
            l: Vec::new(),
            u: Vec::new(),
        }
    }

    /// `empty_buffer!`: length-zero every per-action buffer.
    fn clear_action(&mut self) {
        self.obs.clear();
        self.obs_w.clear();
        self.obs_index.clear();
        self.prefix.clear();
        self.norm_buf.clear();
        self.packed_obs.clear();
        self.packed_w.clear();
        self.w.clear();
        self.norm_w.clear();
        self.l.clear();
        self.u.clear();
    }
}

/// L1 distance of two equal-length weight vectors.
fn l1_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// Stratified (low-variance) draw of `m` particles from a weighted belief.
fn stratified_resample<S: Clone, O>(
    b: &WpfBelief<S, O>,
    m: usize,
    rng: &mut SmallRng,
    out: &mut Vec<S>,
) {
    debug_assert!(b.weight_sum() > 0.0 && m > 0);
    out.clear();
    let particles = b.particles();
    let weights = b.weights();
    let step = b.weight_sum() / m as f64;
    let mut i = 0;
    let mut acc = weights[0];
    for j in 0..m {
        let target = (j as f64 + rng.gen::<f64>()) * step;
        while acc < target && i + 1 < particles.len() {
            i += 1;
            acc += weights[i];
        }
        while weights[i] == 0.0 && i + 1 < particles.len() {
            i += 1;
            acc += weights[i];
        }
        out.push(particles[i].clone());
    }
}

// ---------------------------------------------------------------------------
// Resampling and expansion
// ---------------------------------------------------------------------------

impl<P: Pomdp> Planner<P> {
    /// Adaptively resample the caller's belief into the tree's root belief.
    ///
    /// Terminal draws are rejected and redrawn. Without a grid the sample
    /// size is exactly `m_max`; with one, the KLD rule grows the target from
    /// `m_min` as new bins become occupied.
    pub(crate) fn resample_root(
        &mut self,
        source: &WpfBelief<P::State, P::Obs>,
    ) -> Result<(), PlanError> {
        let live = source
            .weighted()
            .any(|(s, w)| w > 0.0 && !self.pomdp.is_terminal(s));
        if !live {
            return Err(PlanError::DegenerateRoot);
        }
        let dist = WeightedIndex::new(source.weights()).expect("checked nonterminal mass");

        let root = &mut self.tree.root_belief;
        root.clear();
        root.set_depth(0);
        root.set_obs(None);

        match &self.config.grid {
            None => {
                for _ in 0..self.config.m_max {
                    let s = draw_nonterminal(&self.pomdp, source, &dist, &mut self.rng);
                    root.push(s, 1.0);
                }
            }
            Some(grid) => {
                self.scratch.counts.fill(0);
                let mut occupied = 0;
                let mut target = self.config.m_min;
                while root.n_particles() < target {
                    let s = draw_nonterminal(&self.pomdp, source, &dist, &mut self.rng);
                    occupied += access(grid.as_ref(), &mut self.scratch.counts, &s);
                    root.push(s, 1.0);
                    if root.n_particles() == target {
                        let wanted = kld_sample_size(occupied, self.config.zeta).ceil() as usize;
                        target = wanted.min(self.config.m_max);
                    }
                }
            }
        }
        debug_assert!(
            (self.config.m_min..=self.config.m_max)
                .contains(&self.tree.root_belief.n_particles())
        );
        Ok(())
    }

    /// Materialize the belief node `b` is expanded from into the scratch
    /// belief. Returns `true` for a dead leaf (no remaining weight).
    fn materialize(&mut self, b: BeliefIdx) -> bool {
        let belief = &mut self.scratch.belief;
        belief.clear();
        belief.set_depth(self.tree.depth(b));
        belief.set_obs(self.tree.obs(b).cloned());

        if b == ROOT {
            for (s, w) in self.tree.root_belief.weighted() {
                belief.push(s.clone(), w);
            }
            return false;
        }

        let ba = self.tree.parent(b).expect("non-root node has a parent");
        let particles = self.tree.particles(ba);
        let weights = self.tree.weights(b);
        debug_assert_eq!(particles.len(), weights.len());
        for (s, &w) in particles.iter().zip(weights) {
            let w = if self.pomdp.is_terminal(s) { 0.0 } else { w };
            belief.push(s.clone(), w);
        }
        if belief.weight_sum() == 0.0 {
            return true;
        }

        if belief.design_effect() > self.config.deff_threshold {
            let m = self.in_tree_target();
            let belief = &mut self.scratch.belief;
            stratified_resample(belief, m, &mut self.rng, &mut self.scratch.resample);
            belief.clear();
            for s in self.scratch.resample.drain(..) {
                belief.push(s, 1.0);
            }
        }
        false
    }

    /// KLD target for resampling an existing weighted belief, clamped into
    /// `[m_min, m_max]`. Bin occupancy is counted over the belief's own
    /// positive-weight particles.
    fn in_tree_target(&mut self) -> usize {
        match &self.config.grid {
            None => self.config.m_max,
            Some(grid) => {
                self.scratch.counts.fill(0);
                let mut occupied = 0;
                for (s, w) in self.scratch.belief.weighted() {
                    if w > 0.0 {
                        occupied += access(grid.as_ref(), &mut self.scratch.counts, s);
                    }
                }
                let wanted = kld_sample_size(occupied, self.config.zeta).ceil() as usize;
                wanted.clamp(self.config.m_min, self.config.m_max)
            }
        }
    }

    /// Expand leaf `b`: one action branch per applicable action, each with
    /// packed observation children and initialized bounds.
    ///
    /// Returns the node's bound deltas `(Δl, Δu)`.
    pub(crate) fn expand(&mut self, b: BeliefIdx) -> Result<(f64, f64), BoundError> {
        if self.materialize(b) {
            // Dead leaf: collapse the bound to zero.
            return Ok((-self.tree.lower(b), -self.tree.upper(b)));
        }

        let depth = self.tree.depth(b);
        let child_depth = depth + 1;
        let gamma = self.pomdp.discount();
        let n = self.scratch.belief.n_particles();
        let first_cut = self.config.m_min.min(n);

        let actions = self.pomdp.actions(&self.scratch.belief.view());
        if actions.is_empty() {
            return Ok((-self.tree.lower(b), -self.tree.upper(b)));
        }

        let ba_start = self.tree.n_branches() as u32;
        let mut best_l = f64::NEG_INFINITY;
        let mut best_u = f64::NEG_INFINITY;

        for a in actions {
            self.scratch.clear_action();
            let Scratch {
                belief,
                obs,
                obs_w,
                obs_index,
                prefix,
                norm_buf,
                packed_obs,
                packed_w,
                w,
                norm_w,
                l,
                u,
                ..
            } = &mut self.scratch;

            // Propagate positive-weight particles; terminal particles pass
            // through unchanged and weightless.
            let mut next_states: Vec<P::State> = Vec::with_capacity(n);
            let mut r_sum = 0.0;
            for i in 0..n {
                let wi = belief.weight(i);
                let s = &belief.particles()[i];
                if wi > 0.0 {
                    let (sp, o, r) = self.pomdp.step(s, &a, &mut self.rng);
                    r_sum += wi * r;
                    next_states.push(sp);
                    let oi = match obs_index.get(&o) {
                        Some(&oi) => oi,
                        None => {
                            let oi = obs.len();
                            obs_index.insert(o.clone(), oi);
                            obs.push(o);
                            obs_w.push(0.0);
                            oi
                        }
                    };
                    obs_w[oi] += wi;
                } else {
                    next_states.push(s.clone());
                }
            }

            // Observation packing over length-`first_cut` normalized
            // reweightings.
            for oi in 0..obs.len() {
                let o = &obs[oi];
                prefix.clear();
                for j in 0..first_cut {
                    let wj = belief.weight(j);
                    let v = if wj > 0.0 {
                        wj * self.pomdp.obs_likelihood(&a, &next_states[j], o)
                    } else {
                        0.0
                    };
                    prefix.push(v);
                }
                let prefix_sum: f64 = prefix.iter().sum();
                norm_buf.clear();
                if prefix_sum > 0.0 {
                    norm_buf.extend(prefix.iter().map(|v| v / prefix_sum));
                } else {
                    norm_buf.resize(first_cut, 0.0);
                }

                let merged = norm_w
                    .iter()
                    .position(|prev| l1_distance(norm_buf, prev) <= self.config.delta);
                match merged {
                    Some(k) => packed_w[k] += obs_w[oi],
                    None => {
                        packed_obs.push(o.clone());
                        packed_w.push(obs_w[oi]);
                        w.push(prefix.clone());
                        norm_w.push(norm_buf.clone());
                    }
                }
            }

            // Complete the reweighting of each accepted observation.
            for (k, wk) in w.iter_mut().enumerate() {
                let o = &packed_obs[k];
                for j in first_cut..n {
                    let wj = belief.weight(j);
                    let v = if wj > 0.0 {
                        wj * self.pomdp.obs_likelihood(&a, &next_states[j], o)
                    } else {
                        0.0
                    };
                    wk.push(v);
                }
            }

            // Initialize child bounds through the batch estimator form.
            self.bounds.bound_pair_batch(
                l,
                u,
                &self.pomdp,
                &next_states,
                w,
                packed_obs,
                child_depth,
                self.config.max_depth,
                &mut self.warnings,
            )?;

            let packed_total: f64 = packed_w.iter().sum();
            debug_assert!(packed_total > 0.0, "packed weights vanished");
            let r_bar = r_sum / belief.weight_sum();
            let mut ba_l = r_bar;
            let mut ba_u = r_bar;
            for k in 0..packed_obs.len() {
                let p = packed_w[k] / packed_total;
                ba_l += gamma * p * l[k];
                ba_u += gamma * p * u[k];
            }

            let ba = self
                .tree
                .push_branch(a, r_bar, next_states, ba_l, ba_u, b);
            let child_start = self.tree.n_beliefs() as u32;
            let scratch = &mut self.scratch;
            for k in 0..scratch.packed_obs.len() {
                let weights = std::mem::take(&mut scratch.w[k]);
                self.tree.push_belief(
                    child_depth,
                    scratch.packed_obs[k].clone(),
                    scratch.packed_w[k] / packed_total,
                    weights,
                    scratch.l[k],
                    scratch.u[k],
                    ba,
                );
            }
            self.tree.ba_children[ba.as_usize()] =
                Span::new(child_start, self.tree.n_beliefs() as u32);

            best_l = best_l.max(ba_l);
            best_u = best_u.max(ba_u);
        }

        self.tree.b_children[b.as_usize()] = Span::new(ba_start, self.tree.n_branches() as u32);
        Ok((best_l - self.tree.lower(b), best_u - self.tree.upper(b)))
    }
}

/// Proportional draw from `source` through a prebuilt sampler, rejecting
/// terminal states.
fn draw_nonterminal<P: Pomdp>(
    pomdp: &P,
    source: &WpfBelief<P::State, P::Obs>,
    dist: &WeightedIndex<f64>,
    rng: &mut SmallRng,
) -> P::State {
    loop {
        let s = &source.particles()[dist.sample(rng)];
        if !pomdp.is_terminal(s) {
            return s.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::IndependentBounds;
    use crate::config::SolverConfig;
    use crate::test_util::{noisy_config, ChainPomdp, NoisyRingPomdp};
    use opal_pomdp::IntervalGrid;
    use rand::SeedableRng;

    fn chain_planner(mut config: SolverConfig<ChainPomdp>) -> Planner<ChainPomdp> {
        config.rng = SmallRng::seed_from_u64(42);
        Planner::new(ChainPomdp::default(), config).unwrap()
    }

    fn chain_config() -> SolverConfig<ChainPomdp> {
        let mut config = SolverConfig::new(IndependentBounds::constant(-1.0, 2.0));
        config.m_min = 10;
        config.m_max = 50;
        config
    }

    // ---- root resampling ----

    #[test]
    fn root_resample_without_grid_draws_m_max() {
        let mut planner = chain_planner(chain_config());
        let source = WpfBelief::uniform(vec![0, 1, 2]);
        planner.resample_root(&source).unwrap();
        assert_eq!(planner.tree.root_belief().n_particles(), 50);
        assert!(planner
            .tree
            .root_belief()
            .weights()
            .iter()
            .all(|w| *w == 1.0));
    }

    #[test]
    fn root_resample_rejects_terminal_draws() {
        let mut planner = chain_planner(chain_config());
        // State 4 is terminal on the chain.
        let source = WpfBelief::new(vec![1, 4], vec![0.5, 0.5]);
        planner.resample_root(&source).unwrap();
        assert!(planner
            .tree
            .root_belief()
            .particles()
            .iter()
            .all(|s| *s != 4));
    }

    #[test]
    fn root_resample_degenerate_errors() {
        let mut planner = chain_planner(chain_config());
        let source = WpfBelief::new(vec![4], vec![1.0]);
        assert!(matches!(
            planner.resample_root(&source),
            Err(PlanError::DegenerateRoot)
        ));
    }

    #[test]
    fn root_resample_with_grid_adapts_count() {
        let mut config = chain_config();
        config.grid = Some(Box::new(IntervalGrid::new(0.0, 5.0, 5, |s: &i32| {
            *s as f64
        })));
        let mut planner = chain_planner(config);

        // Single-support source: one occupied bin, so the target never grows
        // beyond m_min.
        let source = WpfBelief::uniform(vec![2]);
        planner.resample_root(&source).unwrap();
        assert_eq!(planner.tree.root_belief().n_particles(), 10);

        // Spread source: more occupied bins, more particles.
        let source = WpfBelief::uniform(vec![0, 1, 2, 3]);
        planner.resample_root(&source).unwrap();
        let n = planner.tree.root_belief().n_particles();
        assert!(n > 10 && n <= 50, "adaptive count {n}");
    }

    // ---- stratified resampling ----

    #[test]
    fn stratified_preserves_proportions() {
        let b = WpfBelief::<i32, i32>::new(vec![0, 1], vec![0.25, 0.75]);
        let mut rng = SmallRng::seed_from_u64(3);
        let mut out = Vec::new();
        stratified_resample(&b, 400, &mut rng, &mut out);
        let ones = out.iter().filter(|s| **s == 1).count();
        // Low-variance resampler: within one slot of exact.
        assert!((299..=301).contains(&ones), "ones={ones}");
    }

    #[test]
    fn stratified_never_picks_zero_weight() {
        let b = WpfBelief::<i32, i32>::new(vec![0, 1, 2], vec![0.0, 1.0, 0.0]);
        let mut rng = SmallRng::seed_from_u64(4);
        let mut out = Vec::new();
        stratified_resample(&b, 64, &mut rng, &mut out);
        assert!(out.iter().all(|s| *s == 1));
    }

    // ---- expansion ----

    #[test]
    fn expand_root_creates_branch_per_action() {
        let mut planner = chain_planner(chain_config());
        let source = WpfBelief::uniform(vec![0, 1]);
        planner.resample_root(&source).unwrap();
        planner.tree.set_root_bounds(-1.0, 2.0);

        planner.expand(ROOT).unwrap();
        // Chain has two actions: stay and right.
        assert_eq!(planner.tree.n_branches(), 2);
        for ba in planner.tree.children(ROOT).collect::<Vec<_>>() {
            assert!(planner.tree.branch_children(ba).count() >= 1);
            let p_sum: f64 = planner
                .tree
                .branch_children(ba)
                .map(|c| planner.tree.obs_prob(c))
                .sum();
            assert!((p_sum - 1.0).abs() < 1e-12, "obs probs sum to {p_sum}");
        }
    }

    #[test]
    fn expand_branch_bound_identity() {
        // Freshly expanded: ba_l = r̄ + γ·Σ p_c·l_c (constant child bounds).
        let mut planner = chain_planner(chain_config());
        let source = WpfBelief::uniform(vec![0]);
        planner.resample_root(&source).unwrap();
        planner.tree.set_root_bounds(-1.0, 2.0);
        planner.expand(ROOT).unwrap();

        let gamma = 0.5;
        for ba in planner.tree.children(ROOT).collect::<Vec<_>>() {
            let r = planner.tree.reward(ba);
            let expect_l: f64 = r + gamma
                * planner
                    .tree
                    .branch_children(ba)
                    .map(|c| planner.tree.obs_prob(c) * planner.tree.lower(c))
                    .sum::<f64>();
            assert!((planner.tree.branch_lower(ba) - expect_l).abs() < 1e-12);
        }
    }

    #[test]
    fn expand_returns_max_deltas() {
        let mut planner = chain_planner(chain_config());
        let source = WpfBelief::uniform(vec![3]);
        planner.resample_root(&source).unwrap();
        planner.tree.set_root_bounds(-1.0, 2.0);

        let (dl, du) = planner.expand(ROOT).unwrap();
        let best_l = planner
            .tree
            .children(ROOT)
            .map(|ba| planner.tree.branch_lower(ba))
            .fold(f64::NEG_INFINITY, f64::max);
        let best_u = planner
            .tree
            .children(ROOT)
            .map(|ba| planner.tree.branch_upper(ba))
            .fold(f64::NEG_INFINITY, f64::max);
        assert!((dl - (best_l - (-1.0))).abs() < 1e-12);
        assert!((du - (best_u - 2.0)).abs() < 1e-12);
    }

    #[test]
    fn expand_terminal_particles_pass_through_weightless() {
        // From state 3, `right` reaches the terminal state 4. Expanding the
        // child again must find zero live weight and collapse its bounds.
        let mut planner = chain_planner(chain_config());
        let source = WpfBelief::uniform(vec![3]);
        planner.resample_root(&source).unwrap();
        planner.tree.set_root_bounds(-1.0, 2.0);
        planner.expand(ROOT).unwrap();

        let right = planner
            .tree
            .children(ROOT)
            .find(|ba| *planner.tree.action(*ba) == 1)
            .unwrap();
        let child = planner.tree.branch_children(right).next().unwrap();
        assert!(planner
            .tree
            .particles(right)
            .iter()
            .all(|s| *s == 4));

        let (dl, du) = planner.expand(child).unwrap();
        assert!((dl - (-planner.tree.lower(child))).abs() < 1e-12);
        assert!((du - (-planner.tree.upper(child))).abs() < 1e-12);
        assert!(planner.tree.is_leaf(child));
    }

    // ---- packing ----

    #[test]
    fn packing_merges_close_posteriors() {
        // The ring model's two observations are uninformative: both induce
        // the same normalized posterior, so a wide radius packs them into a
        // single child.
        let mut config = noisy_config(0.5);
        config.delta = 0.5;
        let mut planner = Planner::new(NoisyRingPomdp::uninformative(), config).unwrap();
        let source = WpfBelief::uniform(vec![0, 1, 2, 3]);
        planner.resample_root(&source).unwrap();
        planner.tree.set_root_bounds(-1.0, 1.0);
        planner.expand(ROOT).unwrap();

        for ba in planner.tree.children(ROOT).collect::<Vec<_>>() {
            assert_eq!(
                planner.tree.branch_children(ba).count(),
                1,
                "uninformative observations should pack together"
            );
            let child = planner.tree.branch_children(ba).next().unwrap();
            assert!((planner.tree.obs_prob(child) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn packing_keeps_distant_posteriors_apart() {
        // Perfectly informative observations: posteriors are disjoint, so
        // nothing packs even with a generous radius below 2.
        let mut config = noisy_config(0.5);
        config.delta = 1.0;
        let mut planner = Planner::new(NoisyRingPomdp::informative(), config).unwrap();
        let source = WpfBelief::uniform(vec![0, 1, 2, 3]);
        planner.resample_root(&source).unwrap();
        planner.tree.set_root_bounds(-1.0, 1.0);
        planner.expand(ROOT).unwrap();

        for ba in planner.tree.children(ROOT).collect::<Vec<_>>() {
            let kept: Vec<_> = planner.tree.branch_children(ba).collect();
            assert_eq!(kept.len(), 2, "informative observations must not pack");
            // Pairwise packed posteriors stay separated by more than delta.
            let w0 = planner.tree.weights(kept[0]);
            let w1 = planner.tree.weights(kept[1]);
            let n0: f64 = w0.iter().sum();
            let n1: f64 = w1.iter().sum();
            let dist: f64 = w0
                .iter()
                .zip(w1)
                .map(|(a, b)| (a / n0 - b / n1).abs())
                .sum();
            assert!(dist > 1.0, "kept posteriors are only {dist} apart");
        }
    }

    #[test]
    fn l1_distance_basic() {
        assert_eq!(l1_distance(&[0.5, 0.5], &[0.5, 0.5]), 0.0);
        assert!((l1_distance(&[1.0, 0.0], &[0.0, 1.0]) - 2.0).abs() < 1e-12);
    }
}
