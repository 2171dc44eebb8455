mod base;
mod errors;
pub mod mock;

pub use base::{DiscoveredProvider, ProviderConnection, ProviderDiscovery};
pub use errors::ProviderError;
