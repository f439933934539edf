pub mod affect;
pub mod store;

pub use affect::{derive_primary_emotion, Affect, AffectDelta};
pub use store::AffectStore;
