//! Error taxonomy shared by every component of the core library.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The identity endpoint refused the refresh secret. Never retried.
    #[error(
        "authentication failed{}: {body}",
        .status.map(|s| format!(" (status {})", s)).unwrap_or_default()
    )]
    Authentication { status: Option<u16>, body: String },

    /// Credential is missing a tenant or secret.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The platform itself reported the export job as failed.
    #[error("export job {job_id} reported {status}: {detail}")]
    RemoteJobFailure {
        job_id: String,
        status: String,
        detail: String,
    },

    /// We stopped waiting; the job may still finish on the platform side.
    #[error("export job {job_id} still not finished after {attempts} attempts (last status: {last_status})")]
    PollExhausted {
        job_id: String,
        attempts: u32,
        last_status: String,
    },

    #[error("credential store: {0}")]
    CredentialStore(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Rejected before any request was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

impl Error {
    /// Authentication problems abort the whole run; everything else may be
    /// absorbed by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Authentication { .. } | Error::InvalidCredential(_)
        )
    }
}
