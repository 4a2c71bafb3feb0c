// Thin re-export module: implementation is split across `chain/` to keep
// the tree store, per-tip state derivation and validation separable.

pub mod state;
pub mod store;
pub mod validation;

pub use state::*;
pub use store::*;
pub use validation::*;
