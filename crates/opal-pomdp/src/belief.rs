use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::SmallRng;

// ---------------------------------------------------------------------------
// ParticleBelief — shared read surface of owned beliefs and tree views
// ---------------------------------------------------------------------------

/// Read access to a weighted particle set.
///
/// Implemented by [`WpfBelief`] (owning) and [`BeliefView`] (borrowing tree
/// arenas). Bound estimators and rollout policies are written against this
/// trait so the planner can hand them short-lived views without copying.
pub trait ParticleBelief<S, O> {
    fn particles(&self) -> &[S];
    fn weights(&self) -> &[f64];
    /// Cached total weight. The cache is authoritative: mutators refresh it.
    fn weight_sum(&self) -> f64;
    /// Tree depth of the belief (0 at the root of a decision epoch).
    fn depth(&self) -> u32;
    /// The observation that led to this belief, if any.
    fn current_obs(&self) -> Option<&O>;

    fn n_particles(&self) -> usize {
        self.particles().len()
    }

    fn weight(&self, i: usize) -> f64 {
        self.weights()[i]
    }

    /// Iterate `(state, weight)` pairs.
    fn weighted(&self) -> std::iter::Zip<std::slice::Iter<'_, S>, std::iter::Copied<std::slice::Iter<'_, f64>>> {
        self.particles().iter().zip(self.weights().iter().copied())
    }

    /// Draw a particle with probability proportional to its weight.
    ///
    /// Zero-weight particles are never drawn. The weight sum must be
    /// positive. Callers drawing repeatedly from one fixed belief should
    /// build a [`WeightedIndex`] over [`weights`](Self::weights) once and
    /// sample that instead.
    fn rand<'s>(&'s self, rng: &mut SmallRng) -> &'s S {
        let particles = self.particles();
        debug_assert_eq!(particles.len(), self.weights().len());
        let dist = WeightedIndex::new(self.weights()).expect("rand on a zero-weight belief");
        &particles[dist.sample(rng)]
    }

    /// Effective sample size `(Σw)² / Σw²`.
    fn ess(&self) -> f64 {
        let sq: f64 = self.weights().iter().map(|w| w * w).sum();
        if sq == 0.0 {
            0.0
        } else {
            let sum = self.weight_sum();
            sum * sum / sq
        }
    }

    /// Design effect `n / ESS`: variance inflation relative to i.i.d.
    fn design_effect(&self) -> f64 {
        let sum = self.weight_sum();
        if sum == 0.0 {
            return f64::INFINITY;
        }
        let sq: f64 = self.weights().iter().map(|w| w * w).sum();
        self.n_particles() as f64 * sq / (sum * sum)
    }

    /// Weighted mean of a scalar projection of the state.
    fn mean_by(&self, f: impl Fn(&S) -> f64) -> f64 {
        let sum = self.weight_sum();
        if sum == 0.0 {
            return 0.0;
        }
        self.weighted().map(|(s, w)| w * f(s)).sum::<f64>() / sum
    }

    /// The support state with the largest cumulative weight.
    fn mode(&self) -> Option<&S>
    where
        S: PartialEq,
    {
        let particles = self.particles();
        let weights = self.weights();
        let mut best: Option<(&S, f64)> = None;
        for (i, s) in particles.iter().enumerate() {
            // Count each support state once, at its first occurrence.
            if particles[..i].iter().any(|p| p == s) {
                continue;
            }
            let total: f64 = particles
                .iter()
                .zip(weights)
                .filter(|(p, _)| *p == s)
                .map(|(_, w)| w)
                .sum();
            if best.map_or(true, |(_, bw)| total > bw) {
                best = Some((s, total));
            }
        }
        best.map(|(s, _)| s)
    }
}

// ---------------------------------------------------------------------------
// WpfBelief — owning weighted particle belief
// ---------------------------------------------------------------------------

/// A weighted particle belief: an ordered particle sequence, a weight vector
/// of equal length, and a cached weight sum.
///
/// Terminal states carry weight zero by convention during tree operations.
pub struct WpfBelief<S, O> {
    particles: Vec<S>,
    weights: Vec<f64>,
    weight_sum: f64,
    depth: u32,
    obs: Option<O>,
    // Lazily aggregated (state, cumulative weight) support table for
    // pdf/support queries; dropped on any mutation.
    support: Option<Vec<(S, f64)>>,
}

impl<S, O> WpfBelief<S, O> {
    pub fn new(particles: Vec<S>, weights: Vec<f64>) -> Self {
        assert_eq!(
            particles.len(),
            weights.len(),
            "particle/weight length mismatch"
        );
        let weight_sum = weights.iter().sum();
        Self {
            particles,
            weights,
            weight_sum,
            depth: 0,
            obs: None,
            support: None,
        }
    }

    /// Construct with a precomputed weight sum, skipping the summation.
    pub fn with_sum(particles: Vec<S>, weights: Vec<f64>, weight_sum: f64) -> Self {
        assert_eq!(
            particles.len(),
            weights.len(),
            "particle/weight length mismatch"
        );
        debug_assert!(
            (weights.iter().sum::<f64>() - weight_sum).abs() <= 1e-9 * weight_sum.abs().max(1.0),
            "stale weight sum"
        );
        Self {
            particles,
            weights,
            weight_sum,
            depth: 0,
            obs: None,
            support: None,
        }
    }

    /// Unit weight per particle.
    pub fn uniform(particles: Vec<S>) -> Self {
        let n = particles.len();
        Self {
            particles,
            weights: vec![1.0; n],
            weight_sum: n as f64,
            depth: 0,
            obs: None,
            support: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            particles: Vec::new(),
            weights: Vec::new(),
            weight_sum: 0.0,
            depth: 0,
            obs: None,
            support: None,
        }
    }

    pub fn at_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_obs(mut self, obs: O) -> Self {
        self.obs = Some(obs);
        self
    }

    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
    }

    pub fn set_obs(&mut self, obs: Option<O>) {
        self.obs = obs;
    }

    /// Drop all particles; capacity is retained.
    pub fn clear(&mut self) {
        self.particles.clear();
        self.weights.clear();
        self.weight_sum = 0.0;
        self.support = None;
    }

    pub fn push(&mut self, state: S, weight: f64) {
        self.particles.push(state);
        self.weights.push(weight);
        self.weight_sum += weight;
        self.support = None;
    }

    pub fn set_weight(&mut self, i: usize, weight: f64) {
        self.weight_sum += weight - self.weights[i];
        self.weights[i] = weight;
        self.support = None;
    }

    /// Borrow as a view, keeping depth and observation metadata.
    pub fn view(&self) -> BeliefView<'_, S, O> {
        BeliefView {
            particles: &self.particles,
            weights: &self.weights,
            weight_sum: self.weight_sum,
            depth: self.depth,
            obs: self.obs.as_ref(),
        }
    }
}

impl<S: Clone + PartialEq, O> WpfBelief<S, O> {
    /// Probability mass on states equal to `s`: cumulative weight divided by
    /// the weight sum. The support table is built lazily and invalidated by
    /// mutation.
    pub fn pdf(&mut self, s: &S) -> f64 {
        if self.weight_sum == 0.0 {
            return 0.0;
        }
        let sum = self.weight_sum;
        self.support()
            .iter()
            .find(|(p, _)| p == s)
            .map_or(0.0, |(_, w)| w / sum)
    }

    /// Distinct states with their cumulative weights.
    pub fn support(&mut self) -> &[(S, f64)] {
        if self.support.is_none() {
            let mut table: Vec<(S, f64)> = Vec::new();
            for (s, w) in self.particles.iter().zip(&self.weights) {
                match table.iter_mut().find(|(p, _)| p == s) {
                    Some((_, acc)) => *acc += w,
                    None => table.push((s.clone(), *w)),
                }
            }
            self.support = Some(table);
        }
        self.support.as_deref().expect("support table just built")
    }
}

impl<S, O> ParticleBelief<S, O> for WpfBelief<S, O> {
    fn particles(&self) -> &[S] {
        &self.particles
    }

    fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn weight_sum(&self) -> f64 {
        self.weight_sum
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    fn current_obs(&self) -> Option<&O> {
        self.obs.as_ref()
    }
}

// ---------------------------------------------------------------------------
// BeliefView — borrowed belief over tree arenas
// ---------------------------------------------------------------------------

/// A non-owning belief over externally stored particles and weights, with an
/// overridden depth and incoming observation.
///
/// Views are constructed for the duration of a bound or policy call; the
/// underlying storage must not be mutated while a view is live, which the
/// borrow checker enforces.
pub struct BeliefView<'a, S, O> {
    particles: &'a [S],
    weights: &'a [f64],
    weight_sum: f64,
    depth: u32,
    obs: Option<&'a O>,
}

impl<'a, S, O> BeliefView<'a, S, O> {
    pub fn new(
        particles: &'a [S],
        weights: &'a [f64],
        depth: u32,
        obs: Option<&'a O>,
    ) -> Self {
        debug_assert_eq!(
            particles.len(),
            weights.len(),
            "particle/weight length mismatch"
        );
        Self {
            particles,
            weights,
            weight_sum: weights.iter().sum(),
            depth,
            obs,
        }
    }

    /// As [`new`](Self::new) with a precomputed weight sum.
    pub fn with_sum(
        particles: &'a [S],
        weights: &'a [f64],
        weight_sum: f64,
        depth: u32,
        obs: Option<&'a O>,
    ) -> Self {
        debug_assert_eq!(
            particles.len(),
            weights.len(),
            "particle/weight length mismatch"
        );
        Self {
            particles,
            weights,
            weight_sum,
            depth,
            obs,
        }
    }

    /// Copy into an owning belief, cloning particles and the observation.
    pub fn to_owned_belief(&self) -> WpfBelief<S, O>
    where
        S: Clone,
        O: Clone,
    {
        let mut b = WpfBelief::with_sum(
            self.particles.to_vec(),
            self.weights.to_vec(),
            self.weight_sum,
        );
        b.set_depth(self.depth);
        b.set_obs(self.obs.cloned());
        b
    }
}

impl<S, O> ParticleBelief<S, O> for BeliefView<'_, S, O> {
    fn particles(&self) -> &[S] {
        self.particles
    }

    fn weights(&self) -> &[f64] {
        self.weights
    }

    fn weight_sum(&self) -> f64 {
        self.weight_sum
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    fn current_obs(&self) -> Option<&O> {
        self.obs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
