pub mod belief;
pub mod grid;
pub mod policy;
pub mod pomdp;

pub use belief::{BeliefView, ParticleBelief, WpfBelief};
pub use grid::{access, kld_sample_size, IntervalGrid, StateGrid};
pub use policy::{
    BeliefPolicy, BeliefUpdater, BeliefValue, BootstrapFilter, FunctionBeliefPolicy,
    FunctionPolicy, RandomPolicy, StatePolicy, StateValue,
};
pub use pomdp::Pomdp;
