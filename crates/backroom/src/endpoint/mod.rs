pub mod model;
pub mod registry;

pub use model::{Endpoint, EndpointStatus, MetricsUpdate};
pub use registry::{EndpointRegistry, RegistryOverview};
