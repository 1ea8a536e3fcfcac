pub mod baby;
pub mod lightdark;
pub mod tiger;

pub use baby::{BabyAction, BabyObs, BabyPomdp, BabyState};
pub use lightdark::{LdAction, LdObs, LdState, LightDark1d};
pub use tiger::{TigerAction, TigerObs, TigerPomdp, TigerState};
