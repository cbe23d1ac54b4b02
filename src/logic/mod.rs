pub mod filter_eval;
pub mod forest;
pub mod reconcile;

pub use filter_eval::*;
pub use forest::*;
pub use reconcile::*;
