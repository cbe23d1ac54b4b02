pub mod attribute;
pub mod common;
pub mod entity;
pub mod filter;
pub mod path;
pub mod payload;
pub mod user;

pub use attribute::*;
pub use common::*;
pub use entity::*;
pub use filter::*;
pub use path::*;
pub use payload::*;
pub use user::*;
