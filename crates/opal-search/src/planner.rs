use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::Rng;

use opal_pomdp::{Pomdp, WpfBelief};

use crate::bounds::{IndependentBounds, SolvedBounds};
use crate::config::SolverConfig;
use crate::error::{ConfigError, PlanError, Warning};
use crate::expand::Scratch;
use crate::tree::{BeliefTree, BranchIdx, ROOT};

// ---------------------------------------------------------------------------
// SearchInfo — per-decision result metadata
// ---------------------------------------------------------------------------

pub struct SearchInfo<P: Pomdp> {
    /// Depth each trial terminated at, in trial order.
    pub trial_depths: Vec<u32>,
    pub n_trials: u32,
    pub elapsed: Duration,
    pub warnings: Vec<Warning>,
    /// The built tree, present only when `tree_in_info` is set.
    pub tree: Option<BeliefTree<P>>,
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// The anytime online planner.
///
/// Owns the model, the solved bound estimators, the belief tree, and all
/// expansion scratch. One planner serves many decision epochs; the tree and
/// scratch are cleared in place between them.
pub struct Planner<P: Pomdp> {
    pub(crate) pomdp: P,
    pub(crate) config: SolverConfig<P>,
    pub(crate) bounds: SolvedBounds<P>,
    pub(crate) tree: BeliefTree<P>,
    pub(crate) rng: SmallRng,
    pub(crate) scratch: Scratch<P>,
    pub(crate) warnings: Vec<Warning>,
}

impl<P: Pomdp> Planner<P> {
    /// Validate the configuration and resolve the bound estimators.
    pub fn new(pomdp: P, mut config: SolverConfig<P>) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut rng = config.rng.clone();
        // The estimator pair lives on only in solved form; the placeholder
        // left in the config is never consulted again.
        let spec = std::mem::replace(&mut config.bounds, IndependentBounds::constant(0.0, 0.0));
        let bounds = spec.solve(config.m_max, &mut rng);
        let n_bins = config.grid.as_ref().map_or(0, |g| g.n_bins());
        let scratch = Scratch::new(config.m_max, n_bins);
        let tree = BeliefTree::with_capacity(config.num_b);
        Ok(Self {
            pomdp,
            config,
            bounds,
            tree,
            rng,
            scratch,
            warnings: Vec::new(),
        })
    }

    pub fn pomdp(&self) -> &P {
        &self.pomdp
    }

    /// Plan one decision from the given root belief.
    ///
    /// On failure, the configured `default_action` policy is applied to
    /// `(pomdp, belief, error)` if present; otherwise the error surfaces.
    pub fn plan(
        &mut self,
        belief: &WpfBelief<P::State, P::Obs>,
    ) -> Result<(P::Action, SearchInfo<P>), PlanError> {
        let start = Instant::now();
        self.warnings.clear();
        match self.plan_inner(belief, start) {
            Ok(result) => Ok(result),
            Err(err) => match &self.config.default_action {
                Some(fallback) => {
                    let action = fallback(&self.pomdp, belief, &err);
                    let info = self.drain_info(start, Vec::new());
                    Ok((action, info))
                }
                None => Err(err),
            },
        }
    }

    fn plan_inner(
        &mut self,
        belief: &WpfBelief<P::State, P::Obs>,
        start: Instant,
    ) -> Result<(P::Action, SearchInfo<P>), PlanError> {
        if self.config.tree_in_info {
            // The previous tree may have been handed out; never touch it.
            self.tree = BeliefTree::with_capacity(self.config.num_b);
        } else {
            self.tree.reset();
        }

        self.resample_root(belief)?;
        let view = self.tree.root_belief.view();
        let (l0, u0) = self.bounds.bound_pair(
            &self.pomdp,
            &view,
            self.config.max_depth,
            &mut self.warnings,
        )?;
        self.tree.set_root_bounds(l0, u0);

        let depths = self.build_tree(start)?;

        // The gap can be closed before the first trial (e.g. equal constant
        // bounds); the decision still needs the root's action branches.
        if self.tree.is_leaf(ROOT) {
            let (dl, du) = self.expand(ROOT)?;
            self.backup(ROOT, dl, du);
        }

        let action = self.best_action()?;
        let info = self.drain_info(start, depths);
        Ok((action, info))
    }

    /// The root action branch with the maximal lower bound; exact ties are
    /// broken uniformly with reservoir sampling.
    fn best_action(&mut self) -> Result<P::Action, PlanError> {
        let mut best: Option<BranchIdx> = None;
        let mut best_l = f64::NEG_INFINITY;
        let mut tie_count = 0u32;
        for ba in self.tree.children(ROOT) {
            let l = self.tree.branch_lower(ba);
            if l > best_l {
                best_l = l;
                best = Some(ba);
                tie_count = 1;
            } else if (l - best_l).abs() < 1e-12 {
                tie_count += 1;
                // Reservoir sampling: replace with probability 1/tie_count.
                if self.rng.gen_range(0..tie_count) == 0 {
                    best = Some(ba);
                }
            }
        }
        match best {
            Some(ba) => Ok(self.tree.action(ba).clone()),
            None => Err(PlanError::NoActions),
        }
    }

    fn drain_info(&mut self, start: Instant, depths: Vec<u32>) -> SearchInfo<P> {
        let elapsed = start.elapsed();
        let budget = self.config.t_max.as_secs_f64();
        if elapsed.as_secs_f64() > budget * (1.0 + self.config.overtime_warning_threshold) {
            self.warnings.push(Warning::Overtime {
                elapsed_secs: elapsed.as_secs_f64(),
                budget_secs: budget,
            });
        }
        if self.config.bounds_warnings {
            for w in &self.warnings {
                eprintln!("opal: {w}");
            }
        }
        let tree = if self.config.tree_in_info {
            Some(std::mem::replace(&mut self.tree, BeliefTree::with_capacity(1)))
        } else {
            None
        };
        SearchInfo {
            n_trials: depths.len() as u32,
            trial_depths: depths,
            elapsed,
            warnings: std::mem::take(&mut self.warnings),
            tree,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
