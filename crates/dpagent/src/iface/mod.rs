//! Interface configurator.

mod configurator;
mod types;

pub use configurator::{IfaceError, InterfaceConfigurator};
pub use types::InterfaceMeta;
