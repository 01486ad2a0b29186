//! Cost/Optimization Engine
//!
//! Pure functions over the provider's token-cost model:
//! - `estimate`: token cost of `(duration, fps, resolution)`
//! - `search`: grid search for parameters near a token target
//! - `validate`: hard/soft limit check gating every remote request
//!
//! Nothing here fails; results describe problems instead.

mod model;
mod search;
mod validate;

pub use model::*;
pub use search::*;
pub use validate::*;
