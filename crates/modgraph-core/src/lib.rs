pub mod config_manager;
pub mod error;
pub mod hash;
pub mod logging;
pub mod traits;
pub mod types;
pub mod watch;

pub use config_manager::*;
pub use error::*;
pub use hash::*;
pub use logging::*;
pub use traits::*;
pub use types::*;
pub use watch::*;
