//! AST Toolkit Core Library
//!
//! This crate provides the core functionality for the AST toolkit:
//! - Credential management (keyring with file fallback) and bearer tokens
//! - Audit trail aggregation across the primary page and its linked pages
//! - SBOM export jobs (submit, poll with backoff, download)
//! - Project creation and scan configuration, random scan-target selection
//!   and tenant custom states
//! - CSV and spreadsheet sinks for the audit trail
//!
//! # Features
//!
//! - `keyring-storage` (default): Use platform keyring for credential storage
//! - `file-storage`: Use file-based credential storage (for headless Linux)
//!
//! # Example
//!
//! ```no_run
//! use ast_toolkit_core::{audit, auth, cloud, writer};
//!
//! #[tokio::main]
//! async fn main() -> ast_toolkit_core::Result<()> {
//!     let credential = auth::Credential::new("acme", "eu", "api-key")?;
//!     let config = cloud::load_config(&credential.region);
//!     let client = cloud::PlatformClient::connect(credential, &config)?;
//!
//!     let collector = audit::AuditCollector::new(client, config.audit_workers);
//!     let collection = collector.collect_all(&audit::DateRange::default()).await?;
//!     println!("Collected {} events", collection.events.len());
//!
//!     writer::write(
//!         &collection.events,
//!         std::path::Path::new("audit_trail"),
//!         writer::SinkFormat::Csv,
//!     )?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod auth;
pub mod cloud;
pub mod error;
pub mod export;
pub mod writer;

// Re-export commonly used types
pub use audit::{AuditCollection, AuditCollector, AuditEvent, DateRange};
pub use auth::{AuthStatus, Credential, TokenManager};
pub use cloud::{ConfigSource, PlatformClient, Project, ToolkitConfig};
pub use error::{Error, Result};
pub use export::{BackoffPolicy, ExportPoller, ExportRequest, TerminalResult};
pub use writer::SinkFormat;
