//! AST Toolkit CLI - audit trail and SBOM export for headless runners
//!
//! This binary provides a scriptable front end to the platform API that can:
//! - Store an API key for a tenant and validate it against the identity service
//! - Export the tenant audit trail to CSV and/or XLSX
//! - Request an SBOM export for a scan and download it once ready
//! - List projects, pick a random scan target, create and configure projects
//! - Maintain the tenant's custom result states

use anyhow::{Context, Result, bail};
use ast_toolkit_core::audit::{AuditCollector, DateRange};
use ast_toolkit_core::export::{
    BackoffPolicy, ExportParameters, ExportPoller, ExportRequest, TerminalResult,
    artifact_extension,
};
use ast_toolkit_core::{PlatformClient, SinkFormat, auth, cloud, writer};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ast-toolkit")]
#[command(author = "AST Toolkit Team")]
#[command(version)]
#[command(about = "Audit trail, SBOM export and project upkeep for the AST platform")]
#[command(long_about = "
AST Toolkit exports data from a tenant of the AST platform. It exchanges a
stored API key for short-lived bearer tokens and refreshes them as needed.

Quick start:
  1. Store an API key:    ast-toolkit connect --tenant acme --region eu --api-key <KEY>
  2. Export audit trail:  ast-toolkit audit --start-date 2024-05-01 --sink csv --sink xlsx
  3. Export an SBOM:      ast-toolkit sbom --scan-id <SCAN_ID>
  4. Create a project:    ast-toolkit project create --name web --repo-url <URL> --branch main

Flags --tenant, --region and --api-key override the stored credential for a
single run.
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Tenant region (e.g. us, eu, anz); empty for the global hosts
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Tenant name
    #[arg(long, global = true)]
    pub tenant: Option<String>,

    /// API key (refresh token) issued by the platform
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SinkArg {
    Csv,
    Xlsx,
}

impl From<SinkArg> for SinkFormat {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Csv => SinkFormat::Csv,
            SinkArg::Xlsx => SinkFormat::Xlsx,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate an API key and store it for later runs
    #[command(alias = "login")]
    Connect,

    /// Remove the stored credential
    #[command(alias = "logout")]
    Disconnect,

    /// Show the stored credential and whether it still authenticates
    Status,

    /// Show configuration paths and settings
    Config,

    /// List projects visible to the API key
    Projects {
        /// Print one project chosen at random as the next scan target
        #[arg(long)]
        random: bool,
    },

    /// Create or change a project
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Manage the tenant's custom result states
    #[command(subcommand)]
    CustomStates(CustomStateCommand),

    /// Export the audit trail
    Audit {
        /// First day to include (YYYY-MM-DD, UTC)
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD, UTC)
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// Output path without extension
        #[arg(short, long, default_value = "audit_trail")]
        output: PathBuf,

        /// Output format; repeat for several (default: csv)
        #[arg(long, value_enum)]
        sink: Vec<SinkArg>,

        /// Maximum concurrent page fetches
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Request an SBOM export for a scan and download it
    Sbom {
        #[arg(long)]
        scan_id: String,

        /// Export format (CycloneDxJson, CycloneDxXml, SpdxJson)
        #[arg(long, default_value = "CycloneDxJson")]
        file_format: String,

        /// Where to write the artifact (default: sbom_<scan-id>.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Leave out development and test dependencies
        #[arg(long)]
        hide_dev_dependencies: bool,

        /// Report only effective licenses
        #[arg(long)]
        effective_licenses_only: bool,

        /// Poll attempts before giving up
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Delay after the first poll, in seconds
        #[arg(long)]
        base_delay: Option<u64>,

        /// Upper bound on a single delay, in seconds
        #[arg(long, conflicts_with = "no_delay_cap")]
        max_delay: Option<u64>,

        /// Let delays keep doubling without an upper bound
        #[arg(long)]
        no_delay_cap: bool,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommand {
    /// Create a project, optionally pointing it at a repository
    Create {
        #[arg(long)]
        name: String,

        /// Repository the project scans
        #[arg(long)]
        repo_url: Option<String>,

        /// Branch the project scans
        #[arg(long)]
        branch: Option<String>,
    },

    /// Rename a project and/or change its repository settings
    Update {
        #[arg(long)]
        id: String,

        /// New project name (replaces the project record, clearing tags and groups)
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        repo_url: Option<String>,

        #[arg(long)]
        branch: Option<String>,
    },

    /// Show a project's configuration
    Config {
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
pub enum CustomStateCommand {
    /// List custom states
    List,

    /// Create a custom state
    Create {
        #[arg(long)]
        name: String,
    },

    /// Delete a custom state
    Delete {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ast_toolkit={},ast_toolkit_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Connect => cmd_connect(&cli).await,
        Commands::Disconnect => cmd_disconnect(&cli),
        Commands::Status => cmd_status(&cli).await,
        Commands::Config => cmd_config(&cli),
        Commands::Projects { random } => cmd_projects(&cli, *random).await,
        Commands::Project(command) => cmd_project(&cli, command).await,
        Commands::CustomStates(command) => cmd_custom_states(&cli, command).await,
        Commands::Audit {
            start_date,
            end_date,
            output,
            sink,
            workers,
        } => cmd_audit(&cli, *start_date, *end_date, output, sink, *workers).await,
        Commands::Sbom {
            scan_id,
            file_format,
            output,
            hide_dev_dependencies,
            effective_licenses_only,
            max_attempts,
            base_delay,
            max_delay,
            no_delay_cap,
        } => {
            let request = ExportRequest {
                scan_id: scan_id.clone(),
                file_format: file_format.clone(),
                export_parameters: ExportParameters {
                    hide_dev_and_test_dependencies: *hide_dev_dependencies,
                    show_only_effective_licenses: *effective_licenses_only,
                },
            };
            let overrides = PollOverrides {
                max_attempts: *max_attempts,
                base_delay: *base_delay,
                max_delay: *max_delay,
                no_delay_cap: *no_delay_cap,
            };
            cmd_sbom(&cli, request, output.clone(), overrides).await
        }
    }
}

/// Credential for this run: flags win over the stored credential, field by
/// field.
fn resolve_credential(cli: &Cli) -> Result<auth::Credential> {
    let stored = auth::load_credentials().context("Failed to load stored credential")?;

    let tenant = cli
        .tenant
        .clone()
        .or_else(|| stored.as_ref().map(|c| c.tenant.clone()));
    let region = cli
        .region
        .clone()
        .or_else(|| stored.as_ref().map(|c| c.region.clone()))
        .unwrap_or_default();
    let api_key = cli
        .api_key
        .clone()
        .or_else(|| stored.as_ref().map(|c| c.api_key().to_string()));

    match (tenant, api_key) {
        (Some(tenant), Some(api_key)) => Ok(auth::Credential::new(tenant, region, api_key)?),
        _ => bail!(
            "Not connected. Run 'ast-toolkit connect --tenant <TENANT> --api-key <KEY>' first."
        ),
    }
}

fn connect_client(cli: &Cli) -> Result<(PlatformClient, cloud::ToolkitConfig)> {
    let credential = resolve_credential(cli)?;
    let config = cloud::load_config(&credential.region);
    let client = PlatformClient::connect(credential, &config)?;
    Ok((client, config))
}

async fn cmd_connect(cli: &Cli) -> Result<()> {
    if cli.tenant.is_none() || cli.api_key.is_none() {
        bail!("connect requires --tenant and --api-key");
    }

    let (client, _) = connect_client(cli)?;
    let token = client
        .tokens()
        .ensure_valid_token()
        .await
        .context("The API key was rejected")?;

    let credential = client.tokens().credential();
    auth::save_credentials(credential)?;

    match cli.format {
        OutputFormat::Text => {
            println!(
                "Connected to tenant '{}' ({})",
                credential.tenant,
                region_label(&credential.region)
            );
            println!("Credential stored in: {}", auth::get_credential_storage_info());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": "connected",
                    "tenant": credential.tenant,
                    "region": credential.region,
                    "token_expires_at": token.expires_at().to_rfc3339(),
                })
            );
        }
    }

    Ok(())
}

fn cmd_disconnect(cli: &Cli) -> Result<()> {
    let stored = auth::load_credentials()?;

    let Some(credential) = stored else {
        match cli.format {
            OutputFormat::Text => println!("Not connected."),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "not_connected",
                    })
                );
            }
        }
        return Ok(());
    };

    auth::delete_credentials()?;

    match cli.format {
        OutputFormat::Text => println!("Disconnected from tenant '{}'", credential.tenant),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": "disconnected",
                    "tenant": credential.tenant,
                })
            );
        }
    }

    Ok(())
}

async fn cmd_status(cli: &Cli) -> Result<()> {
    let status = match resolve_credential(cli) {
        Ok(credential) => {
            let tenant = credential.tenant.clone();
            let region = credential.region.clone();
            let config = cloud::load_config(&region);
            let client = PlatformClient::connect(credential, &config)?;
            match client.tokens().ensure_valid_token().await {
                Ok(token) => auth::AuthStatus {
                    authenticated: true,
                    tenant: Some(tenant),
                    region: Some(region),
                    token_expires_in: Some(
                        (token.expires_at() - chrono::Utc::now()).num_seconds(),
                    ),
                },
                Err(e) => {
                    tracing::warn!("Stored credential did not authenticate: {}", e);
                    auth::AuthStatus {
                        authenticated: false,
                        tenant: Some(tenant),
                        region: Some(region),
                        token_expires_in: None,
                    }
                }
            }
        }
        Err(_) => auth::AuthStatus {
            authenticated: false,
            tenant: None,
            region: None,
            token_expires_in: None,
        },
    };

    match cli.format {
        OutputFormat::Text => match &status.tenant {
            Some(tenant) => {
                let state = if status.authenticated {
                    "Connected"
                } else {
                    "Credential rejected"
                };
                println!("Status: {}", state);
                println!("Tenant: {}", tenant);
                println!(
                    "Region: {}",
                    region_label(status.region.as_deref().unwrap_or_default())
                );
                if let Some(secs) = status.token_expires_in {
                    println!("Token:  valid for {}s", secs);
                }
                println!();
                println!("Storage: {}", auth::get_credential_storage_info());
            }
            None => {
                println!("Status: Not connected");
                println!();
                println!("Run 'ast-toolkit connect --tenant <TENANT> --api-key <KEY>' to authenticate.");
            }
        },
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "authenticated": status.authenticated,
                    "tenant": status.tenant,
                    "region": status.region,
                    "token_expires_in": status.token_expires_in,
                    "storage_info": auth::get_credential_storage_info(),
                })
            );
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let region = match (&cli.region, auth::load_credentials()) {
        (Some(region), _) => region.clone(),
        (None, Ok(Some(credential))) => credential.region,
        _ => String::new(),
    };
    let config = cloud::load_config(&region);
    let config_path = cloud::config::get_config_file_path_string();
    let max_delay = config
        .poll
        .max_delay
        .map(|d| format!("{}s", d.as_secs()))
        .unwrap_or_else(|| "none".to_string());

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:       {}", config_path);
            println!(
                "Identity endpoint: {} (from {})",
                config.endpoints.identity_url, config.endpoints.source
            );
            println!("API endpoint:      {}", config.endpoints.api_url);
            println!("Audit workers:     {}", config.audit_workers);
            println!(
                "Export polling:    {} attempts, {}s base delay, cap {}",
                config.poll.max_attempts,
                config.poll.base_delay.as_secs(),
                max_delay
            );
            println!("HTTP timeout:      {}s", config.http_timeout.as_secs());
            println!("Credential store:  {}", auth::get_credential_storage_info());
            println!();
            println!("Environment variables:");
            println!("  AST_TOOLKIT_IAM_URL - Override identity endpoint");
            println!("  AST_TOOLKIT_API_URL - Override API endpoint");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", cloud::config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "identity_url": config.endpoints.identity_url,
                    "api_url": config.endpoints.api_url,
                    "endpoint_source": format!("{}", config.endpoints.source),
                    "audit_workers": config.audit_workers,
                    "poll_max_attempts": config.poll.max_attempts,
                    "poll_base_delay_secs": config.poll.base_delay.as_secs(),
                    "poll_max_delay_secs": config.poll.max_delay.map(|d| d.as_secs()),
                    "http_timeout_secs": config.http_timeout.as_secs(),
                    "credential_storage": auth::get_credential_storage_info(),
                })
            );
        }
    }

    Ok(())
}

async fn cmd_projects(cli: &Cli, random: bool) -> Result<()> {
    let (client, _) = connect_client(cli)?;
    let projects = client.list_projects().await.context("Failed to list projects")?;

    if random {
        let Some(project) = cloud::pick_random(&projects) else {
            bail!("No projects found in the tenant's account");
        };
        match cli.format {
            OutputFormat::Text => println!("Selected project: {} ({})", project.name, project.id),
            OutputFormat::Json => println!("{}", serde_json::json!({ "project": project })),
        }
        return Ok(());
    }

    match cli.format {
        OutputFormat::Text => {
            println!("Found {} projects:", projects.len());
            println!();
            for project in &projects {
                let branch = project.main_branch.as_deref().unwrap_or("-");
                println!("  {:36}  {:10}  {}", project.id, branch, project.name);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "projects": projects }));
        }
    }

    Ok(())
}

async fn cmd_project(cli: &Cli, command: &ProjectCommand) -> Result<()> {
    let (client, _) = connect_client(cli)?;

    match command {
        ProjectCommand::Create {
            name,
            repo_url,
            branch,
        } => {
            let project = cloud::NewProject {
                name: name.clone(),
                repo_url: repo_url.clone(),
                main_branch: branch.clone(),
            };
            let id = client
                .create_project(&project)
                .await
                .with_context(|| format!("Failed to create project '{}'", name))?;
            match cli.format {
                OutputFormat::Text => println!("Created project '{}' with id {}", name, id),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "id": id, "name": name }))
                }
            }
        }
        ProjectCommand::Update {
            id,
            name,
            repo_url,
            branch,
        } => {
            if name.is_none() && repo_url.is_none() && branch.is_none() {
                bail!("Nothing to update: give --name, --repo-url or --branch");
            }
            if let Some(name) = name {
                client
                    .rename_project(id, name)
                    .await
                    .with_context(|| format!("Failed to rename project {}", id))?;
            }
            if repo_url.is_some() || branch.is_some() {
                client
                    .configure_repository(id, repo_url.as_deref(), branch.as_deref())
                    .await
                    .with_context(|| format!("Failed to configure project {}", id))?;
            }
            match cli.format {
                OutputFormat::Text => println!("Updated project {}", id),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "id": id, "status": "updated" }))
                }
            }
        }
        ProjectCommand::Config { id } => {
            let entries = client
                .project_configuration(id)
                .await
                .with_context(|| format!("Failed to read configuration of project {}", id))?;
            match cli.format {
                OutputFormat::Text => {
                    for entry in &entries {
                        println!("  {:45}  {}", entry.key, entry.value);
                    }
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "id": id, "configuration": entries }))
                }
            }
        }
    }

    Ok(())
}

async fn cmd_custom_states(cli: &Cli, command: &CustomStateCommand) -> Result<()> {
    let (client, _) = connect_client(cli)?;

    match command {
        CustomStateCommand::List => {
            let states = client
                .list_custom_states()
                .await
                .context("Failed to list custom states")?;
            match cli.format {
                OutputFormat::Text if states.is_empty() => println!("No custom states found."),
                OutputFormat::Text => {
                    for state in &states {
                        let allowed = match state.is_allowed {
                            Some(true) => "allowed",
                            Some(false) => "disallowed",
                            None => "-",
                        };
                        println!(
                            "  {:8}  {:10}  {:10}  {}",
                            state.id,
                            state.state_type.as_deref().unwrap_or("-"),
                            allowed,
                            state.name
                        );
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::json!({ "states": states })),
            }
        }
        CustomStateCommand::Create { name } => {
            let created = client
                .create_custom_state(name)
                .await
                .with_context(|| format!("Failed to create custom state '{}'", name))?;
            match cli.format {
                OutputFormat::Text => match &created {
                    Some(state) => println!("Created custom state '{}' ({})", state.name, state.id),
                    None => println!("Created custom state '{}'", name.trim()),
                },
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "name": name.trim(), "state": created }))
                }
            }
        }
        CustomStateCommand::Delete { id } => {
            client
                .delete_custom_state(id)
                .await
                .with_context(|| format!("Failed to delete custom state {}", id))?;
            match cli.format {
                OutputFormat::Text => println!("Deleted custom state {}", id),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "id": id, "status": "deleted" }))
                }
            }
        }
    }

    Ok(())
}

async fn cmd_audit(
    cli: &Cli,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    output: &Path,
    sinks: &[SinkArg],
    workers: Option<usize>,
) -> Result<()> {
    let range = DateRange::from_dates(start_date, end_date)?;
    let formats: Vec<SinkFormat> = if sinks.is_empty() {
        vec![SinkFormat::Csv]
    } else {
        sinks.iter().map(|s| SinkFormat::from(*s)).collect()
    };

    let (client, config) = connect_client(cli)?;
    let collector = AuditCollector::new(client, workers.unwrap_or(config.audit_workers));

    if let OutputFormat::Text = cli.format {
        println!("Collecting audit trail...");
    }

    let collection = collector
        .collect_all(&range)
        .await
        .context("Failed to collect the audit trail")?;
    let written = writer::write_all(&collection.events, output, &formats)
        .context("Failed to write the audit trail")?;

    match cli.format {
        OutputFormat::Text => {
            println!();
            println!(
                "Exported {} events ({} of {} linked pages failed)",
                collection.events.len(),
                collection.failed_links(),
                collection.links_total
            );
            for failure in &collection.failures {
                println!("  skipped {}: {}", failure.url, failure.reason);
            }
            for path in &written {
                println!("  wrote {}", path.display());
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "events": collection.events.len(),
                    "links_total": collection.links_total,
                    "links_failed": collection.failed_links(),
                    "failures": collection.failures.iter().map(|f| serde_json::json!({
                        "url": f.url,
                        "reason": f.reason,
                    })).collect::<Vec<_>>(),
                    "files": written,
                })
            );
        }
    }

    Ok(())
}

/// Poll tuning from the command line, applied over the configured policy.
struct PollOverrides {
    max_attempts: Option<u32>,
    base_delay: Option<u64>,
    max_delay: Option<u64>,
    no_delay_cap: bool,
}

impl PollOverrides {
    fn apply(&self, mut policy: BackoffPolicy) -> BackoffPolicy {
        if let Some(n) = self.max_attempts {
            policy.max_attempts = n;
        }
        if let Some(secs) = self.base_delay {
            policy.base_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = self.max_delay {
            policy.max_delay = Some(Duration::from_secs(secs));
        }
        if self.no_delay_cap {
            policy.max_delay = None;
        }
        policy
    }
}

async fn cmd_sbom(
    cli: &Cli,
    request: ExportRequest,
    output: Option<PathBuf>,
    overrides: PollOverrides,
) -> Result<()> {
    let (client, config) = connect_client(cli)?;
    let policy = overrides.apply(config.poll);
    let destination = output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "sbom_{}.{}",
            request.scan_id,
            artifact_extension(&request.file_format)
        ))
    });

    if let OutputFormat::Text = cli.format {
        println!(
            "Requesting {} export for scan {}...",
            request.file_format, request.scan_id
        );
    }

    let poller = ExportPoller::new(client);
    let report = tokio::select! {
        report = poller.run(request, &policy, &destination) => report.context("Export failed")?,
        _ = tokio::signal::ctrl_c() => {
            bail!("Interrupted; the export job may still complete on the platform");
        }
    };

    let job_id = report.job.id.clone();

    match cli.format {
        OutputFormat::Text => {
            println!();
            println!("Job {}: {}", job_id, report.job.status);
            println!("Polls: {}", report.outcome.attempts());
            if let Some(path) = &report.artifact {
                println!("Saved to {}", path.display());
            }
        }
        OutputFormat::Json => {
            let (outcome, detail) = match &report.outcome {
                TerminalResult::Completed { .. } => ("completed", None),
                TerminalResult::Failed { detail, .. } => ("failed", Some(detail.clone())),
                TerminalResult::Exhausted { last_status, .. } => {
                    ("exhausted", Some(last_status.clone()))
                }
            };
            println!(
                "{}",
                serde_json::json!({
                    "job": report.job,
                    "outcome": outcome,
                    "detail": detail,
                    "attempts": report.outcome.attempts(),
                    "artifact": report.artifact,
                    "download_error": report.download_error,
                })
            );
        }
    }

    report.outcome.into_result(&job_id)?;
    if let Some(e) = report.download_error {
        bail!("Export {} completed but the artifact download failed: {}", job_id, e);
    }

    Ok(())
}

fn region_label(region: &str) -> &str {
    if region.is_empty() { "global" } else { region }
}
