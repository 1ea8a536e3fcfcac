use rand::rngs::SmallRng;
use rand::Rng;

use opal_pomdp::{BeliefView, Pomdp};

// ---------------------------------------------------------------------------
// TigerPomdp
// ---------------------------------------------------------------------------

/// The classic tiger problem: a tiger waits behind one of two doors.
/// Listening is cheap but noisy; opening a door ends the round and resets
/// the tiger uniformly at random.
pub struct TigerPomdp {
    pub r_listen: f64,
    pub r_find_tiger: f64,
    pub r_escape: f64,
    pub p_listen_correctly: f64,
    pub discount: f64,
}

impl Default for TigerPomdp {
    fn default() -> Self {
        Self {
            r_listen: -1.0,
            r_find_tiger: -100.0,
            r_escape: 10.0,
            p_listen_correctly: 0.85,
            discount: 0.95,
        }
    }
}

/// `true` iff the tiger is behind the left door.
pub type TigerState = bool;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TigerAction {
    Listen,
    OpenLeft,
    OpenRight,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TigerObs {
    HearLeft,
    HearRight,
}

impl Pomdp for TigerPomdp {
    type State = TigerState;
    type Action = TigerAction;
    type Obs = TigerObs;

    fn discount(&self) -> f64 {
        self.discount
    }

    fn is_terminal(&self, _s: &TigerState) -> bool {
        false
    }

    fn actions(&self, _b: &BeliefView<'_, TigerState, TigerObs>) -> Vec<TigerAction> {
        vec![TigerAction::Listen, TigerAction::OpenLeft, TigerAction::OpenRight]
    }

    fn step(
        &self,
        s: &TigerState,
        a: &TigerAction,
        rng: &mut SmallRng,
    ) -> (TigerState, TigerObs, f64) {
        match a {
            TigerAction::Listen => {
                let correct = rng.gen_bool(self.p_listen_correctly);
                let obs = if *s == correct {
                    TigerObs::HearLeft
                } else {
                    TigerObs::HearRight
                };
                (*s, obs, self.r_listen)
            }
            TigerAction::OpenLeft | TigerAction::OpenRight => {
                let opened_left = *a == TigerAction::OpenLeft;
                let r = if opened_left == *s {
                    self.r_find_tiger
                } else {
                    self.r_escape
                };
                // The round resets: new tiger position, uninformative noise.
                let next = rng.gen_bool(0.5);
                let obs = if rng.gen_bool(0.5) {
                    TigerObs::HearLeft
                } else {
                    TigerObs::HearRight
                };
                (next, obs, r)
            }
        }
    }

    fn obs_likelihood(&self, a: &TigerAction, next: &TigerState, o: &TigerObs) -> f64 {
        match a {
            TigerAction::Listen => {
                let hears_left = *o == TigerObs::HearLeft;
                if hears_left == *next {
                    self.p_listen_correctly
                } else {
                    1.0 - self.p_listen_correctly
                }
            }
            _ => 0.5,
        }
    }

    fn sample_initial(&self, rng: &mut SmallRng) -> TigerState {
        rng.gen_bool(0.5)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(17)
    }

    #[test]
    fn listening_keeps_the_tiger_put() {
        let pomdp = TigerPomdp::default();
        let mut r = rng();
        for _ in 0..50 {
            let (next, _, reward) = pomdp.step(&true, &TigerAction::Listen, &mut r);
            assert!(next);
            assert_eq!(reward, -1.0);
        }
    }

    #[test]
    fn listening_is_mostly_correct() {
        let pomdp = TigerPomdp::default();
        let mut r = rng();
        let mut correct = 0;
        for _ in 0..2000 {
            let (_, obs, _) = pomdp.step(&true, &TigerAction::Listen, &mut r);
            if obs == TigerObs::HearLeft {
                correct += 1;
            }
        }
        // ~1700 expected at 0.85 accuracy.
        assert!((1600..1800).contains(&correct), "correct={correct}");
    }

    #[test]
    fn opening_pays_and_resets() {
        let pomdp = TigerPomdp::default();
        let mut r = rng();
        let (_, _, reward) = pomdp.step(&true, &TigerAction::OpenLeft, &mut r);
        assert_eq!(reward, -100.0);
        let (_, _, reward) = pomdp.step(&true, &TigerAction::OpenRight, &mut r);
        assert_eq!(reward, 10.0);

        let mut lefts = 0;
        for _ in 0..2000 {
            let (next, _, _) = pomdp.step(&true, &TigerAction::OpenLeft, &mut r);
            if next {
                lefts += 1;
            }
        }
        assert!((900..1100).contains(&lefts), "reset is not uniform: {lefts}");
    }

    #[test]
    fn listen_likelihoods_are_a_distribution() {
        let pomdp = TigerPomdp::default();
        for s in [true, false] {
            let total = pomdp.obs_likelihood(&TigerAction::Listen, &s, &TigerObs::HearLeft)
                + pomdp.obs_likelihood(&TigerAction::Listen, &s, &TigerObs::HearRight);
            assert!((total - 1.0).abs() < 1e-12);
        }
        assert_eq!(
            pomdp.obs_likelihood(&TigerAction::Listen, &true, &TigerObs::HearLeft),
            0.85
        );
    }
}
