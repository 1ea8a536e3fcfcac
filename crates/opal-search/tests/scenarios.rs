//! End-to-end planner runs against the reference domains.

use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::SeedableRng;

use opal_domains::{
    BabyAction, BabyPomdp, LdState, LightDark1d, TigerAction, TigerPomdp,
};
use opal_pomdp::{
    BeliefUpdater, BootstrapFilter, FunctionPolicy, IntervalGrid, ParticleBelief, Pomdp,
    WpfBelief,
};
use opal_search::{Bound, IndependentBounds, Planner, SolverConfig, ROOT};

// ---------------------------------------------------------------------------
// Simulation harness
// ---------------------------------------------------------------------------

/// Run one episode: plan, act on the true state, filter the belief.
/// Returns the discounted return and the action sequence.
fn run_episode<P: Pomdp>(
    pomdp: &P,
    planner: &mut Planner<P>,
    filter: &BootstrapFilter,
    mut belief: WpfBelief<P::State, P::Obs>,
    mut state: P::State,
    steps: usize,
    sim_rng: &mut SmallRng,
) -> (f64, Vec<P::Action>) {
    let mut ret = 0.0;
    let mut disc = 1.0;
    let mut actions = Vec::with_capacity(steps);
    for _ in 0..steps {
        if pomdp.is_terminal(&state) {
            break;
        }
        let (action, _info) = planner.plan(&belief).expect("planning succeeds");
        let (next, obs, reward) = pomdp.step(&state, &action, sim_rng);
        ret += disc * reward;
        disc *= pomdp.discount();
        belief = filter.update(pomdp, &belief, &action, &obs, sim_rng);
        actions.push(action);
        state = next;
    }
    (ret, actions)
}

fn hungry_mass(belief: &WpfBelief<bool, opal_domains::BabyObs>) -> f64 {
    if belief.weight_sum() == 0.0 {
        return 0.0;
    }
    belief
        .weighted()
        .filter(|(hungry, _)| **hungry)
        .map(|(_, w)| w)
        .sum::<f64>()
        / belief.weight_sum()
}

// ---------------------------------------------------------------------------
// Scenario: Tiger
// ---------------------------------------------------------------------------

fn tiger_config(seed: u64) -> SolverConfig<TigerPomdp> {
    let mut config = SolverConfig::new(IndependentBounds::constant(-20.0, 0.0));
    config.t_max = Duration::from_millis(30);
    config.max_depth = 20;
    config.m_min = 30;
    config.m_max = 100;
    config.rng = SmallRng::seed_from_u64(seed);
    config
}

#[test]
fn tiger_earns_positive_return_and_listens_first() {
    let pomdp = TigerPomdp::default();
    let filter = BootstrapFilter::new(500);
    // Wrong-door openings swing an episode by -110; average enough episodes
    // that the expected surplus dominates.
    let episodes = 20;
    let mut total = 0.0;

    for ep in 0..episodes {
        let mut planner = Planner::new(TigerPomdp::default(), tiger_config(100 + ep)).unwrap();
        let mut sim_rng = SmallRng::seed_from_u64(900 + ep);
        let belief = WpfBelief::uniform(vec![true, false]);
        let state = ep % 2 == 0;
        let (ret, actions) =
            run_episode(&pomdp, &mut planner, &filter, belief, state, 10, &mut sim_rng);
        total += ret;
        assert_eq!(
            actions[0],
            TigerAction::Listen,
            "uniform belief must be probed before opening"
        );
    }

    let mean = total / episodes as f64;
    assert!(mean > 0.0, "mean discounted return {mean}");
}

// ---------------------------------------------------------------------------
// Scenarios: Baby
// ---------------------------------------------------------------------------

fn baby_config(
    seed: u64,
    bounds: IndependentBounds<BabyPomdp>,
) -> SolverConfig<BabyPomdp> {
    let mut config = SolverConfig::new(bounds);
    config.t_max = Duration::from_millis(20);
    config.max_depth = 10;
    config.m_min = 200;
    config.m_max = 400;
    config.rng = SmallRng::seed_from_u64(seed);
    config
}

/// 20 steps of the undiscounted baby under constant bounds. Returns the
/// undiscounted return, asserting feed-on-likely-hunger along the way.
fn run_baby(bounds_for: impl Fn() -> IndependentBounds<BabyPomdp>, seed: u64) -> f64 {
    let pomdp = BabyPomdp::with_discount(1.0);
    let filter = BootstrapFilter::new(400);
    let mut planner =
        Planner::new(BabyPomdp::with_discount(1.0), baby_config(seed, bounds_for())).unwrap();
    let mut sim_rng = SmallRng::seed_from_u64(7000 + seed);

    let mut belief = WpfBelief::uniform(vec![false]);
    let mut state = false;
    let mut ret = 0.0;
    for _ in 0..20 {
        let mass = hungry_mass(&belief);
        let (action, _) = planner.plan(&belief).expect("planning succeeds");
        if mass > 0.5 {
            assert_eq!(action, BabyAction::Feed, "hungry mass {mass} but no feed");
        }
        let (next, obs, reward) = pomdp.step(&state, &action, &mut sim_rng);
        ret += reward;
        belief = filter.update(&pomdp, &belief, &action, &obs, &mut sim_rng);
        state = next;
    }
    ret
}

fn baby_constant_bounds() -> IndependentBounds<BabyPomdp> {
    // r_bad / (1 - gamma) with the nominal discount 0.9.
    IndependentBounds::constant(-15.0 / (1.0 - 0.9), 0.0)
}

#[test]
fn baby_feeds_when_probably_hungry() {
    let episodes = 5;
    let mut total = 0.0;
    for ep in 0..episodes {
        total += run_baby(baby_constant_bounds, ep);
    }
    // Feeding costs 5 per step at worst; 20 steps can never do better than 0.
    let mean = total / episodes as f64;
    assert!(mean <= 0.0 && mean > -15.0 * 20.0, "mean return {mean}");
}

/// Feed whenever the believed hungry mass exceeds one half.
struct FeedWhenLikelyHungry;

impl opal_pomdp::BeliefPolicy<BabyPomdp> for FeedWhenLikelyHungry {
    fn action(
        &self,
        _pomdp: &BabyPomdp,
        b: &opal_pomdp::BeliefView<'_, bool, opal_domains::BabyObs>,
        _rng: &mut SmallRng,
    ) -> BabyAction {
        let mass: f64 = b
            .weighted()
            .filter(|(hungry, _)| **hungry)
            .map(|(_, w)| w)
            .sum();
        if mass > 0.5 * b.weight_sum() {
            BabyAction::Feed
        } else {
            BabyAction::Ignore
        }
    }
}

#[test]
fn baby_semi_po_rollout_tracks_constant_bounds() {
    let semi_bounds = || {
        IndependentBounds::new(
            Bound::SemiPoRollout(Box::new(FeedWhenLikelyHungry)),
            Bound::Constant(0.0),
        )
    };

    let episodes = 10;
    let mut constant_total = 0.0;
    let mut semi_total = 0.0;
    for ep in 0..episodes {
        constant_total += run_baby(baby_constant_bounds, ep);
        semi_total += run_baby(&semi_bounds, ep);
    }
    let constant_mean = constant_total / episodes as f64;
    let semi_mean = semi_total / episodes as f64;
    assert!(
        (semi_mean - constant_mean).abs() <= 0.05 * constant_mean.abs(),
        "semi-PO mean {semi_mean} strays from constant-bound mean {constant_mean}"
    );
}

// ---------------------------------------------------------------------------
// Scenario: LightDark1D
// ---------------------------------------------------------------------------

#[test]
fn lightdark_plans_and_survives_a_long_run() {
    let pomdp = LightDark1d::default();
    let toward_origin = FunctionPolicy(|p: &LightDark1d, s: &LdState| -> i8 {
        if s.y.abs() <= p.goal_radius {
            0
        } else if s.y > 0.0 {
            -1
        } else {
            1
        }
    });
    let dispersion_penalized: Bound<LightDark1d> = Bound::function(|p: &LightDark1d, b| {
        let mean = b.mean_by(|s: &LdState| s.y);
        let var = b.mean_by(|s| (s.y - mean) * (s.y - mean));
        p.r_correct - 5.0 * var.sqrt()
    });

    let mut config = SolverConfig::new(IndependentBounds::new(
        Bound::FoRollout(Box::new(toward_origin)),
        dispersion_penalized,
    ));
    config.grid = Some(Box::new(IntervalGrid::new(-10.0, 15.0, 26, |s: &LdState| {
        s.y
    })));
    config.delta = 1.0;
    config.t_max = Duration::from_millis(50);
    config.max_depth = 30;
    config.m_min = 30;
    config.m_max = 200;
    config.rng = SmallRng::seed_from_u64(5);
    let mut planner = Planner::new(LightDark1d::default(), config).unwrap();

    let mut sim_rng = SmallRng::seed_from_u64(55);
    let particles: Vec<LdState> = (0..200)
        .map(|_| pomdp.sample_initial(&mut sim_rng))
        .collect();
    let belief = WpfBelief::uniform(particles.clone());

    let (action, _info) = planner.plan(&belief).expect("finite plan");
    assert!([-1i8, 0, 1].contains(&action));

    let filter = BootstrapFilter::new(300);
    let state = pomdp.sample_initial(&mut sim_rng);
    let (_ret, actions) = run_episode(
        &pomdp,
        &mut planner,
        &filter,
        WpfBelief::uniform(particles),
        state,
        50,
        &mut sim_rng,
    );
    assert!(!actions.is_empty());
}

// ---------------------------------------------------------------------------
// Scenario: expansion type check
// ---------------------------------------------------------------------------

#[test]
fn baby_root_expansion_shape() {
    let mut config = baby_config(11, baby_constant_bounds());
    config.max_depth = 1;
    config.max_trials = 1;
    config.tree_in_info = true;
    let mut planner = Planner::new(BabyPomdp::with_discount(1.0), config).unwrap();

    let belief = WpfBelief::uniform(vec![true, false]);
    let (_, info) = planner.plan(&belief).unwrap();
    let tree = info.tree.expect("tree requested");

    // One branch per action, each with one or two packed observations.
    let branches: Vec<_> = tree.children(ROOT).collect();
    assert_eq!(branches.len(), 2);
    for ba in branches {
        let kids = tree.branch_children(ba).count();
        assert!((1..=2).contains(&kids), "got {kids} observation children");
        let p_sum: f64 = tree
            .branch_children(ba)
            .map(|c| tree.obs_prob(c))
            .sum();
        assert!((p_sum - 1.0).abs() < 1e-12, "obs probs sum to {p_sum}");
    }
}

// ---------------------------------------------------------------------------
// Scenario: time budget
// ---------------------------------------------------------------------------

#[test]
fn time_budget_is_respected() {
    let mut config = baby_config(13, baby_constant_bounds());
    config.t_max = Duration::from_millis(10);
    config.overtime_warning_threshold = 5.0;
    config.max_trials = u32::MAX;
    config.max_depth = 20;
    config.bounds_warnings = false;
    let mut planner = Planner::new(BabyPomdp::default(), config).unwrap();

    let belief = WpfBelief::uniform(vec![true, false]);
    let start = Instant::now();
    let (_, info) = planner.plan(&belief).unwrap();
    let elapsed = start.elapsed();

    let cap = 0.010 * (1.0 + 5.0);
    assert!(
        elapsed.as_secs_f64() <= cap,
        "planning took {elapsed:?} against a 10ms budget"
    );

    let overtime = info
        .warnings
        .iter()
        .filter(|w| matches!(w, opal_search::Warning::Overtime { .. }))
        .count();
    if info.elapsed.as_secs_f64() > cap {
        assert_eq!(overtime, 1, "exactly one overtime warning when exceeded");
    } else {
        assert_eq!(overtime, 0);
    }
}
