//! Cross-connect configurator.

mod configurator;
mod types;

pub use configurator::{XConnectConfigurator, XcError};
pub use types::{XConnectMeta, XC_TRANSMIT_KEY};
