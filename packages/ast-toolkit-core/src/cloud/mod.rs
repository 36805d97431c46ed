//! Platform API access.
//!
//! Provides the authenticated HTTP client, endpoint configuration, and the
//! project and custom-state maintenance calls.

pub(crate) mod client;
pub mod config;
mod custom_states;
mod projects;

pub use client::PlatformClient;
pub use custom_states::CustomState;
pub use projects::{ConfigurationEntry, NewProject, Project, pick_random};
pub use config::{ConfigSource, EndpointConfig, ToolkitConfig, load_config};
