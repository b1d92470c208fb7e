//! Bridge-domain configurator.

mod configurator;
mod types;

pub use configurator::{BridgeDomainConfigurator, BridgeError};
pub use types::{BridgeDomainMeta, MEMBER_INTERFACE_KEY};
