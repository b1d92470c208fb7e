//! Route configurator.

mod configurator;
mod types;

pub use configurator::{RouteConfigurator, RouteError};
pub use types::{RouteMeta, ROUTE_INTERFACE_KEY};
