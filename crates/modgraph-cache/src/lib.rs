pub mod cache;
pub mod metrics;
pub mod stores;
pub mod transform_cache;

pub use cache::*;
pub use metrics::*;
pub use stores::*;
pub use transform_cache::*;
