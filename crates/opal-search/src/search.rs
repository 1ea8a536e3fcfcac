use std::time::Instant;

use opal_pomdp::Pomdp;

use crate::error::BoundError;
use crate::planner::Planner;
use crate::tree::{BeliefIdx, ROOT};

impl<P: Pomdp> Planner<P> {
    // -----------------------------------------------------------------------
    // backup — bound-delta propagation along the ancestry
    // -----------------------------------------------------------------------

    /// Apply `(Δl, Δu)` at `leaf` and propagate toward the root.
    ///
    /// The upper bound always propagates: each ancestor branch absorbs the
    /// discounted, observation-weighted delta and the parent takes the new
    /// sibling maximum. The lower bound is monotone: it propagates only
    /// while it keeps raising ancestors.
    ///
    /// Returns whether any ancestor's best action was relabeled.
    pub(crate) fn backup(&mut self, leaf: BeliefIdx, mut dl: f64, mut du: f64) -> bool {
        let gamma = self.pomdp.discount();
        let tree = &mut self.tree;
        tree.b_lower[leaf.as_usize()] += dl;
        tree.b_upper[leaf.as_usize()] += du;

        let mut relabeled = false;
        let mut b = leaf;
        while let Some(ba) = tree.b_parent[b.as_usize()] {
            let bp = tree.ba_parent[ba.as_usize()];
            let p_obs = tree.b_obs_prob[b.as_usize()];

            let prev_best = tree.best_branch_by_upper(bp);
            tree.ba_upper[ba.as_usize()] += gamma * p_obs * du;
            let new_best = tree
                .best_branch_by_upper(bp)
                .expect("interior node has branches");
            if prev_best != Some(new_best) {
                relabeled = true;
            }
            let largest_u = tree.ba_upper[new_best.as_usize()];
            du = largest_u - tree.b_upper[bp.as_usize()];
            tree.b_upper[bp.as_usize()] = largest_u;

            if dl != 0.0 {
                tree.ba_lower[ba.as_usize()] += gamma * p_obs * dl;
                let raised = tree.ba_lower[ba.as_usize()];
                if raised > tree.b_lower[bp.as_usize()] {
                    dl = raised - tree.b_lower[bp.as_usize()];
                    tree.b_lower[bp.as_usize()] = raised;
                } else {
                    dl = 0.0;
                }
            }

            b = bp;
        }
        relabeled
    }

    // -----------------------------------------------------------------------
    // next-best descent
    // -----------------------------------------------------------------------

    /// Depth-scaled gap surplus of an observation child.
    ///
    /// `EU(bp) = p_obs · (u − l − ξ·max(gap_root, 0)/γ^Δ)`; the subtracted
    /// term is the gap tolerated at this depth.
    fn excess_uncertainty(&self, bp: BeliefIdx, root_gap: f64, gamma: f64) -> f64 {
        let depth = self.tree.depth(bp) as i32;
        let tolerated = self.config.xi * root_gap / gamma.powi(depth);
        self.tree.obs_prob(bp) * (self.tree.upper(bp) - self.tree.lower(bp) - tolerated)
    }

    /// Descend one level: the branch with the largest upper bound, then its
    /// observation child with the largest excess uncertainty. `None` when no
    /// child is worth exploring (all gaps within tolerance).
    fn next_best(&self, b: BeliefIdx) -> Option<BeliefIdx> {
        let ba = self.tree.best_branch_by_upper(b)?;
        let root_gap = self.tree.gap().max(0.0);
        let gamma = self.pomdp.discount();

        let mut best: Option<(BeliefIdx, f64)> = None;
        for bp in self.tree.branch_children(ba) {
            let eu = self.excess_uncertainty(bp, root_gap, gamma);
            if best.map_or(true, |(_, prev)| eu > prev) {
                best = Some((bp, eu));
            }
        }
        match best {
            Some((bp, eu)) if eu > 0.0 => Some(bp),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // trials
    // -----------------------------------------------------------------------

    /// One trial: descend by next-best, expanding and backing up each leaf
    /// encountered; force-collapse bounds at the depth limit.
    ///
    /// Returns the depth the trial terminated at.
    fn do_trial(&mut self) -> Result<u32, BoundError> {
        let mut b = ROOT;
        loop {
            if self.tree.depth(b) >= self.config.max_depth {
                let dl = -self.tree.lower(b);
                let du = -self.tree.upper(b);
                self.backup(b, dl, du);
                return Ok(self.tree.depth(b));
            }
            if self.tree.is_leaf(b) {
                let (dl, du) = self.expand(b)?;
                self.backup(b, dl, du);
            }
            match self.next_best(b) {
                Some(child) => b = child,
                None => return Ok(self.tree.depth(b)),
            }
        }
    }

    /// The anytime loop: trials until the root gap closes, the clock runs
    /// out, the trial cap is reached, or a trial stops making progress.
    pub(crate) fn build_tree(&mut self, start: Instant) -> Result<Vec<u32>, BoundError> {
        let mut depths = Vec::new();
        while self.tree.gap() > self.config.epsilon_0
            && start.elapsed() < self.config.t_max
            && (depths.len() as u32) < self.config.max_trials
        {
            let before = (self.tree.n_beliefs(), self.tree.gap());
            let depth = self.do_trial()?;
            depths.push(depth);
            if (self.tree.n_beliefs(), self.tree.gap()) == before {
                // Every reachable gap is inside tolerance; more trials
                // cannot move the root.
                break;
            }
        }
        Ok(depths)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
