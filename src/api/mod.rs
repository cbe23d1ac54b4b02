pub mod operations;
pub mod provider;
pub mod schema;
pub mod standard;
pub mod tree;

pub use operations::*;
pub use provider::*;
pub use schema::*;
pub use standard::StandardResolver;
pub use tree::*;
