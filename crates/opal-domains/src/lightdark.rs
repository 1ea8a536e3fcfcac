use rand::distributions::Distribution;
use rand::rngs::SmallRng;
use statrs::distribution::{Continuous, Normal};

use opal_pomdp::{BeliefView, Pomdp};

// ---------------------------------------------------------------------------
// LightDark1d
// ---------------------------------------------------------------------------

/// One-dimensional localize-then-stop problem. The agent walks on a line
/// with a bright region around `light_loc` where position readings are
/// sharp; far from it they are noisy. Declaring `stop` pays off only near
/// the origin.
pub struct LightDark1d {
    pub light_loc: f64,
    pub r_correct: f64,
    pub r_incorrect: f64,
    pub movement_cost: f64,
    pub goal_radius: f64,
    pub discount: f64,
}

impl Default for LightDark1d {
    fn default() -> Self {
        Self {
            light_loc: 10.0,
            r_correct: 100.0,
            r_incorrect: -100.0,
            movement_cost: 1.0,
            goal_radius: 1.0,
            discount: 0.95,
        }
    }
}

impl LightDark1d {
    /// Reading noise: sharp near the light, diffuse away from it.
    pub fn sigma(&self, y: f64) -> f64 {
        0.5 + 0.5 * (y - self.light_loc).abs()
    }
}

/// Walker state: position plus a latched done flag set by `stop`.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct LdState {
    pub y: f64,
    pub done: bool,
}

impl LdState {
    pub fn new(y: f64) -> Self {
        Self { y, done: false }
    }
}

/// `-1`/`+1` move; `0` stops and scores.
pub type LdAction = i8;

/// Position reading rounded to the nearest integer.
pub type LdObs = i64;

impl Pomdp for LightDark1d {
    type State = LdState;
    type Action = LdAction;
    type Obs = LdObs;

    fn discount(&self) -> f64 {
        self.discount
    }

    fn is_terminal(&self, s: &LdState) -> bool {
        s.done
    }

    fn actions(&self, _b: &BeliefView<'_, LdState, LdObs>) -> Vec<LdAction> {
        vec![-1, 0, 1]
    }

    fn step(&self, s: &LdState, a: &LdAction, rng: &mut SmallRng) -> (LdState, LdObs, f64) {
        if *a == 0 {
            let r = if s.y.abs() <= self.goal_radius {
                self.r_correct
            } else {
                self.r_incorrect
            };
            let next = LdState { y: s.y, done: true };
            let obs = self.reading(next.y, rng);
            return (next, obs, r);
        }
        let next = LdState::new(s.y + f64::from(*a));
        let obs = self.reading(next.y, rng);
        (next, obs, -self.movement_cost)
    }

    fn obs_likelihood(&self, _a: &LdAction, next: &LdState, o: &LdObs) -> f64 {
        let sigma = self.sigma(next.y);
        Normal::new(next.y, sigma)
            .expect("positive sigma")
            .pdf(*o as f64)
    }

    fn sample_initial(&self, rng: &mut SmallRng) -> LdState {
        let dist = Normal::new(2.0, 3.0).expect("valid initial spread");
        LdState::new(dist.sample(rng))
    }
}

impl LightDark1d {
    fn reading(&self, y: f64, rng: &mut SmallRng) -> LdObs {
        let dist = Normal::new(y, self.sigma(y)).expect("positive sigma");
        dist.sample(rng).round() as LdObs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
