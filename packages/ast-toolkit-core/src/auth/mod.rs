//! Authentication for the platform API.
//!
//! Provides API key storage and the bearer token lifecycle built on it.

mod credentials;
pub mod token;

pub use credentials::{
    AuthStatus, Credential, delete_credentials, get_credential_storage_info, load_credentials,
    save_credentials,
};
pub use token::{Token, TokenManager};
