//! Payment provider plumbing shared by the concrete adapters.
//!
//! - `http` - shared reqwest client and response mapping
//! - `registry` - the set of configured providers
//! - `mock` - scriptable provider for tests and local development

pub mod http;
mod mock;
mod registry;

pub use mock::{MethodCall, MockPaymentProvider};
pub use registry::ProviderRegistry;
