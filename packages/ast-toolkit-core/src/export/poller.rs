//! Submit-and-poll driver for export jobs.

use super::{ExportJob, ExportRequest, ExportStatus, ExportStatusPayload};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Poll schedule: attempt `k` is followed by a `base_delay * 2^k` pause,
/// capped at `max_delay` when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Some(Duration::from_secs(60)),
        }
    }
}

impl BackoffPolicy {
    /// Pause between attempt `attempt` (0-indexed) and the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let uncapped = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => uncapped.min(cap),
            None => uncapped,
        }
    }
}

/// Remote side of an export: the platform client in production, a scripted
/// stub in tests.
#[async_trait]
pub trait ExportBackend: Send + Sync {
    /// Submit a request and return the job id assigned by the platform.
    async fn submit_export(&self, request: &ExportRequest) -> Result<String>;

    async fn export_status(&self, export_id: &str) -> Result<ExportStatusPayload>;

    async fn download_artifact(&self, file_url: &str) -> Result<Vec<u8>>;
}

/// How polling ended. Exhaustion is an outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalResult {
    Completed {
        file_url: String,
        attempts: u32,
    },
    /// `Failed`, `Error` or `Expired`, with the status text as reported.
    Failed {
        status: String,
        detail: String,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        last_status: String,
    },
}

impl TerminalResult {
    pub fn attempts(&self) -> u32 {
        match self {
            TerminalResult::Completed { attempts, .. }
            | TerminalResult::Failed { attempts, .. }
            | TerminalResult::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The artifact URL on success, otherwise the matching error.
    pub fn into_result(self, job_id: &str) -> Result<String> {
        match self {
            TerminalResult::Completed { file_url, .. } => Ok(file_url),
            TerminalResult::Failed { status, detail, .. } => Err(Error::RemoteJobFailure {
                job_id: job_id.to_string(),
                status,
                detail,
            }),
            TerminalResult::Exhausted {
                attempts,
                last_status,
            } => Err(Error::PollExhausted {
                job_id: job_id.to_string(),
                attempts,
                last_status,
            }),
        }
    }
}

/// Everything known after a full submit, poll and download run.
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub job: ExportJob,
    pub outcome: TerminalResult,
    /// Where the artifact was written, if it was
    pub artifact: Option<PathBuf>,
    pub download_error: Option<String>,
}

pub struct ExportPoller<B> {
    backend: B,
}

impl<B: ExportBackend> ExportPoller<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn submit(&self, request: ExportRequest) -> Result<ExportJob> {
        let id = self.backend.submit_export(&request).await?;
        tracing::info!(
            "Submitted {} export for scan {} (job {})",
            request.file_format,
            request.scan_id,
            id
        );
        Ok(ExportJob {
            id,
            scan_id: request.scan_id,
            file_format: request.file_format,
            parameters: request.export_parameters,
            status: ExportStatus::Submitted,
            file_url: None,
        })
    }

    /// Poll `job_id` until it reaches a terminal status or the attempt budget
    /// runs out. Poll errors count as pending; only authentication errors
    /// abort.
    pub async fn await_completion(
        &self,
        job_id: &str,
        policy: &BackoffPolicy,
    ) -> Result<TerminalResult> {
        let mut last_status = ExportStatus::Submitted.to_string();

        for attempt in 0..policy.max_attempts {
            let attempts = attempt + 1;
            match self.backend.export_status(job_id).await {
                Ok(payload) => {
                    let status = payload.export_status();
                    last_status = if payload.status.is_empty() {
                        status.to_string()
                    } else {
                        payload.status.clone()
                    };

                    match status {
                        ExportStatus::Completed => match payload.file_url {
                            Some(file_url) => {
                                tracing::info!(
                                    "Export job {} completed after {} polls",
                                    job_id,
                                    attempts
                                );
                                return Ok(TerminalResult::Completed { file_url, attempts });
                            }
                            None => {
                                tracing::debug!(
                                    "Export job {} reports completed without a file URL",
                                    job_id
                                );
                            }
                        },
                        ExportStatus::Failed | ExportStatus::Expired => {
                            let detail = payload.detail();
                            tracing::warn!(
                                "Export job {} ended as {}: {}",
                                job_id,
                                last_status,
                                detail
                            );
                            return Ok(TerminalResult::Failed {
                                status: last_status,
                                detail,
                                attempts,
                            });
                        }
                        ExportStatus::Submitted | ExportStatus::Pending => {
                            tracing::debug!("Export job {} is {}", job_id, last_status);
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Polling export job {} failed: {}", job_id, e);
                }
            }

            if attempts < policy.max_attempts {
                let delay = policy.delay_after(attempt);
                tracing::debug!(
                    "Attempt {}/{}: next poll in {:?}",
                    attempts,
                    policy.max_attempts,
                    delay
                );
                sleep(delay).await;
            }
        }

        tracing::warn!(
            "Gave up on export job {} after {} attempts (last status: {})",
            job_id,
            policy.max_attempts,
            last_status
        );
        Ok(TerminalResult::Exhausted {
            attempts: policy.max_attempts,
            last_status,
        })
    }

    /// Fetch the finished artifact and write it to `destination`.
    pub async fn download_to(&self, file_url: &str, destination: &Path) -> Result<PathBuf> {
        let bytes = self.backend.download_artifact(file_url).await?;
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, &bytes).await?;
        tracing::info!(
            "Wrote {} bytes to {}",
            bytes.len(),
            destination.display()
        );
        Ok(destination.to_path_buf())
    }

    /// Submit, wait for a terminal status, then download on success.
    ///
    /// A failed download is recorded in the report rather than returned, so
    /// the caller still sees the job outcome.
    pub async fn run(
        &self,
        request: ExportRequest,
        policy: &BackoffPolicy,
        destination: &Path,
    ) -> Result<ExportReport> {
        let started = Instant::now();
        let mut job = self.submit(request).await?;
        let outcome = self.await_completion(&job.id, policy).await?;

        let mut artifact = None;
        let mut download_error = None;

        match &outcome {
            TerminalResult::Completed { file_url, .. } => {
                job.status = ExportStatus::Completed;
                job.file_url = Some(file_url.clone());
                match self.download_to(file_url, destination).await {
                    Ok(path) => artifact = Some(path),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::error!("Failed to download artifact for job {}: {}", job.id, e);
                        download_error = Some(e.to_string());
                    }
                }
            }
            TerminalResult::Failed { status, .. } => {
                job.status = ExportStatus::from_remote(status);
            }
            TerminalResult::Exhausted { .. } => {
                job.status = ExportStatus::Pending;
            }
        }

        tracing::debug!(
            "Export job {} finished as {} in {:.1}s",
            job.id,
            job.status,
            started.elapsed().as_secs_f64()
        );

        Ok(ExportReport {
            job,
            outcome,
            artifact,
            download_error,
        })
    }
}
