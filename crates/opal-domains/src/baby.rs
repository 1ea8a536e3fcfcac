use rand::rngs::SmallRng;
use rand::Rng;

use opal_pomdp::{BeliefView, Pomdp};

// ---------------------------------------------------------------------------
// BabyPomdp
// ---------------------------------------------------------------------------

/// The crying-baby problem. The baby is hungry or full; feeding always
/// satisfies it, ignoring a full baby risks hunger, and crying is a noisy
/// hunger signal.
pub struct BabyPomdp {
    pub r_feed: f64,
    pub r_hungry: f64,
    pub p_become_hungry: f64,
    pub p_cry_when_hungry: f64,
    pub p_cry_when_full: f64,
    pub discount: f64,
}

impl Default for BabyPomdp {
    fn default() -> Self {
        Self {
            r_feed: -5.0,
            r_hungry: -10.0,
            p_become_hungry: 0.1,
            p_cry_when_hungry: 0.8,
            p_cry_when_full: 0.1,
            discount: 0.9,
        }
    }
}

impl BabyPomdp {
    pub fn with_discount(discount: f64) -> Self {
        Self {
            discount,
            ..Self::default()
        }
    }

    fn p_cry(&self, hungry: bool) -> f64 {
        if hungry {
            self.p_cry_when_hungry
        } else {
            self.p_cry_when_full
        }
    }
}

/// `true` iff the baby is hungry.
pub type BabyState = bool;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BabyAction {
    Feed,
    Ignore,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BabyObs {
    Cry,
    Quiet,
}

impl Pomdp for BabyPomdp {
    type State = BabyState;
    type Action = BabyAction;
    type Obs = BabyObs;

    fn discount(&self) -> f64 {
        self.discount
    }

    fn is_terminal(&self, _s: &BabyState) -> bool {
        false
    }

    fn actions(&self, _b: &BeliefView<'_, BabyState, BabyObs>) -> Vec<BabyAction> {
        vec![BabyAction::Feed, BabyAction::Ignore]
    }

    fn step(&self, s: &BabyState, a: &BabyAction, rng: &mut SmallRng) -> (BabyState, BabyObs, f64) {
        // Reward accrues on the current state and action.
        let mut r = 0.0;
        if *s {
            r += self.r_hungry;
        }
        if *a == BabyAction::Feed {
            r += self.r_feed;
        }

        let next = match a {
            BabyAction::Feed => false,
            BabyAction::Ignore => *s || rng.gen_bool(self.p_become_hungry),
        };
        let obs = if rng.gen_bool(self.p_cry(next)) {
            BabyObs::Cry
        } else {
            BabyObs::Quiet
        };
        (next, obs, r)
    }

    fn obs_likelihood(&self, _a: &BabyAction, next: &BabyState, o: &BabyObs) -> f64 {
        let p_cry = self.p_cry(*next);
        match o {
            BabyObs::Cry => p_cry,
            BabyObs::Quiet => 1.0 - p_cry,
        }
    }

    fn sample_initial(&self, _rng: &mut SmallRng) -> BabyState {
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
