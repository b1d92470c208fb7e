//! L2 FIB configurator.

mod configurator;
mod types;

pub use configurator::{FibConfigurator, FibError};
pub use types::{FibMeta, FIB_BRIDGE_KEY, FIB_INTERFACE_KEY};
