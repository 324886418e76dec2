//! Provisioner drivers.
//!
//! Each cloud provider is one [`Provider`] implementation. Shared
//! validation and plan building look drivers up in a [`ProviderRegistry`],
//! so adding a provider means adding a driver and registering it.

pub mod aws;
pub mod registry;
pub mod trait_def;

pub use aws::AwsProvider;
pub use registry::ProviderRegistry;
pub use trait_def::{Provider, ProviderSettings};
