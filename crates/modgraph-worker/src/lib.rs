pub mod errors;
pub mod farm;
pub mod routing;
pub mod unit;
pub mod worker;

pub use errors::*;
pub use farm::*;
pub use routing::*;
pub use worker::*;
