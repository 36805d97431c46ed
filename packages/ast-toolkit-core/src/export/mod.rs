//! SBOM and report exports.
//!
//! Exports are asynchronous on the platform side: a request is submitted,
//! the job is polled until it reaches a terminal status, and the finished
//! artifact is downloaded from the URL the final status carries.

mod poller;

pub use poller::{BackoffPolicy, ExportBackend, ExportPoller, ExportReport, TerminalResult};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of an export job as seen by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStatus {
    Submitted,
    Pending,
    Completed,
    Failed,
    Expired,
}

impl ExportStatus {
    /// Map the platform's status text. Anything unrecognised is still running.
    pub fn from_remote(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" => ExportStatus::Completed,
            "failed" | "error" => ExportStatus::Failed,
            "expired" => ExportStatus::Expired,
            _ => ExportStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportStatus::Completed | ExportStatus::Failed | ExportStatus::Expired
        )
    }
}

impl std::fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportStatus::Submitted => write!(f, "Submitted"),
            ExportStatus::Pending => write!(f, "Pending"),
            ExportStatus::Completed => write!(f, "Completed"),
            ExportStatus::Failed => write!(f, "Failed"),
            ExportStatus::Expired => write!(f, "Expired"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportParameters {
    pub hide_dev_and_test_dependencies: bool,
    pub show_only_effective_licenses: bool,
}

/// Body of `POST /api/sca/export/requests`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub scan_id: String,
    /// e.g. `CycloneDxJson`, `CycloneDxXml`, `SpdxJson`
    pub file_format: String,
    pub export_parameters: ExportParameters,
}

/// One poll response. The raw payload is kept for failure reporting.
#[derive(Debug, Clone)]
pub struct ExportStatusPayload {
    pub status: String,
    pub file_url: Option<String>,
    pub raw: Value,
}

impl ExportStatusPayload {
    /// Read `exportStatus` (or `status`) and `fileUrl` from a response body.
    pub fn from_value(raw: Value) -> Self {
        let text = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let status = text("exportStatus")
            .or_else(|| text("status"))
            .unwrap_or_default();
        let file_url = text("fileUrl");
        Self {
            status,
            file_url,
            raw,
        }
    }

    pub fn export_status(&self) -> ExportStatus {
        ExportStatus::from_remote(&self.status)
    }

    /// Failure detail reported by the platform, or the whole payload.
    pub fn detail(&self) -> String {
        ["errorMessage", "error", "message"]
            .iter()
            .find_map(|key| self.raw.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| self.raw.to_string())
    }
}

/// A submitted export, updated as polling progresses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: String,
    pub scan_id: String,
    pub file_format: String,
    pub parameters: ExportParameters,
    pub status: ExportStatus,
    pub file_url: Option<String>,
}

/// File extension for an artifact in `file_format`.
pub fn artifact_extension(file_format: &str) -> &'static str {
    let format = file_format.to_ascii_lowercase();
    if format.ends_with("xml") {
        "xml"
    } else if format.ends_with("json") {
        "json"
    } else if format.contains("csv") {
        "csv"
    } else if format.contains("pdf") {
        "pdf"
    } else {
        "bin"
    }
}
