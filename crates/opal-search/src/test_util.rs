use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use opal_pomdp::{BeliefView, Pomdp};

use crate::bounds::IndependentBounds;
use crate::config::SolverConfig;

// ---------------------------------------------------------------------------
// ChainPomdp — deterministic chain with a rewarding goal
// ---------------------------------------------------------------------------

/// Positions `0..=len`; `right` advances and pays 1.0 on reaching `len`,
/// `stay` does nothing. Observations reveal the next state exactly, and
/// `len` is terminal, so every quantity is computable by hand.
pub(crate) struct ChainPomdp {
    pub len: i32,
    pub discount: f64,
}

impl Default for ChainPomdp {
    fn default() -> Self {
        Self {
            len: 4,
            discount: 0.5,
        }
    }
}

impl Pomdp for ChainPomdp {
    type State = i32;
    type Action = u8;
    type Obs = i32;

    fn discount(&self) -> f64 {
        self.discount
    }

    fn is_terminal(&self, s: &i32) -> bool {
        *s >= self.len
    }

    fn actions(&self, _b: &BeliefView<'_, i32, i32>) -> Vec<u8> {
        vec![0, 1]
    }

    fn step(&self, s: &i32, a: &u8, _rng: &mut SmallRng) -> (i32, i32, f64) {
        if *a == 1 {
            let next = s + 1;
            let r = if next == self.len { 1.0 } else { 0.0 };
            (next, next, r)
        } else {
            (*s, *s, 0.0)
        }
    }

    fn obs_likelihood(&self, _a: &u8, next: &i32, o: &i32) -> f64 {
        if next == o {
            1.0
        } else {
            0.0
        }
    }

    fn sample_initial(&self, _rng: &mut SmallRng) -> i32 {
        0
    }
}

pub(crate) fn chain_view<'a>(
    particles: &'a [i32],
    weights: &'a [f64],
    depth: u32,
) -> BeliefView<'a, i32, i32> {
    BeliefView::new(particles, weights, depth, None)
}

// ---------------------------------------------------------------------------
// SymmetricPomdp — two indistinguishable actions
// ---------------------------------------------------------------------------

/// One state, one observation, two rewardless actions. Every statistic the
/// planner computes is identical across actions, forcing exact ties.
pub(crate) struct SymmetricPomdp;

impl Pomdp for SymmetricPomdp {
    type State = ();
    type Action = u8;
    type Obs = ();

    fn discount(&self) -> f64 {
        0.9
    }

    fn is_terminal(&self, _s: &()) -> bool {
        false
    }

    fn actions(&self, _b: &BeliefView<'_, (), ()>) -> Vec<u8> {
        vec![0, 1]
    }

    fn step(&self, _s: &(), _a: &u8, _rng: &mut SmallRng) -> ((), (), f64) {
        ((), (), 0.0)
    }

    fn obs_likelihood(&self, _a: &u8, _next: &(), _o: &()) -> f64 {
        1.0
    }

    fn sample_initial(&self, _rng: &mut SmallRng) {}
}

// ---------------------------------------------------------------------------
// NoisyRingPomdp — observation channels for packing tests
// ---------------------------------------------------------------------------

/// Four states on a ring. The observation channel is either perfectly
/// informative (state parity) or pure noise; packing behavior differs
/// sharply between the two.
pub(crate) struct NoisyRingPomdp {
    informative: bool,
}

impl NoisyRingPomdp {
    pub fn informative() -> Self {
        Self { informative: true }
    }

    pub fn uninformative() -> Self {
        Self { informative: false }
    }
}

impl Pomdp for NoisyRingPomdp {
    type State = i32;
    type Action = u8;
    type Obs = u8;

    fn discount(&self) -> f64 {
        0.9
    }

    fn is_terminal(&self, _s: &i32) -> bool {
        false
    }

    fn actions(&self, _b: &BeliefView<'_, i32, u8>) -> Vec<u8> {
        vec![0, 1]
    }

    fn step(&self, s: &i32, a: &u8, rng: &mut SmallRng) -> (i32, u8, f64) {
        let next = if *a == 1 { (s + 1) % 4 } else { *s };
        let obs = if self.informative {
            (next % 2) as u8
        } else {
            u8::from(rng.gen_bool(0.5))
        };
        (next, obs, 0.0)
    }

    fn obs_likelihood(&self, _a: &u8, next: &i32, o: &u8) -> f64 {
        if self.informative {
            if (next % 2) as u8 == *o {
                1.0
            } else {
                0.0
            }
        } else {
            0.5
        }
    }

    fn sample_initial(&self, rng: &mut SmallRng) -> i32 {
        rng.gen_range(0..4)
    }
}

pub(crate) fn noisy_config(delta: f64) -> SolverConfig<NoisyRingPomdp> {
    let mut config = SolverConfig::new(IndependentBounds::constant(-1.0, 1.0));
    config.m_min = 32;
    config.m_max = 32;
    config.delta = delta;
    config.rng = SmallRng::seed_from_u64(42);
    config
}
