pub mod assembly;
pub mod bundler;
pub mod counting_set;
pub mod delta_calculator;
pub mod graph;
pub mod loader;
pub mod module;
pub mod queue;
pub mod traversal;

pub use assembly::*;
pub use bundler::*;
pub use counting_set::*;
pub use delta_calculator::*;
pub use graph::*;
pub use loader::*;
pub use module::*;
pub use queue::*;
pub use traversal::*;
