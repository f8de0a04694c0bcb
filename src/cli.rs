// CLI layer shared by the `revenue_api_upload` and `revenue_api_fetch`
// binaries: argument definitions, credential lookup and the two command
// runners. Output meant for the user goes to stdout, everything else
// (logs, spinner, errors) to stderr.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser};
use crossterm::style::Stylize;
use dialoguer::Password;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::api::{PollSettings, RevenueApiClient, DEFAULT_API_URL, DEFAULT_API_VERSION};

const TOKEN_FILE_NAME: &str = ".revenue_api_token";

const UPLOAD_USAGE: &str = "\
To upload data without checking job status (job status should be checked by separate command):
  revenue_api_upload --upload-only --user your_username --token your_api_token --csv-path path/to/revenue.csv
To check job status:
  revenue_api_upload --job-status --user your_username --token your_api_token --job-id job_id_from_previous_step
To execute upload synchronously and wait for job to finish:
  revenue_api_upload --user your_username --token your_api_token --csv-path path/to/revenue.csv";

/// Connection flags common to both binaries.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    #[arg(long, env = "REVENUE_API_USER")]
    pub user: String,
    /// API token. Falls back to ~/.revenue_api_token, then to a prompt.
    #[arg(long, env = "REVENUE_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    #[arg(long, default_value = DEFAULT_API_VERSION)]
    pub api_version: String,
    #[arg(long, default_value = DEFAULT_API_URL)]
    pub api_url: String,
    /// Store the token in ~/.revenue_api_token for later runs.
    #[arg(long)]
    pub remember_token: bool,
}

impl ConnectionArgs {
    fn client(&self) -> Result<RevenueApiClient> {
        let token_path = token_file();
        let token = resolve_token(self.token.clone(), &token_path, prompt_token)?;
        if self.remember_token {
            persist_token(&token_path, &token)?;
        }
        RevenueApiClient::with_endpoint(&self.user, token, &self.api_version, &self.api_url)
            .context("failed to build API client")
    }
}

#[derive(Parser, Debug)]
#[command(name = "revenue_api_upload", version, about = "Upload daily revenue data", after_help = UPLOAD_USAGE)]
pub struct UploadArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Upload data without checking job status (job status should be checked by separate command).
    #[arg(long, conflicts_with = "job_status")]
    pub upload_only: bool,
    /// Check status of previously started upload. --job-id must also be provided.
    #[arg(long)]
    pub job_status: bool,
    /// Full path to CSV file. When used, --csv-content cannot be used.
    #[arg(long)]
    pub csv_path: Option<PathBuf>,
    /// CSV file content. When used, --csv-path cannot be used.
    #[arg(long)]
    pub csv_content: Option<String>,
    /// Id of previously started upload. Use only with --job-status flag.
    #[arg(long)]
    pub job_id: Option<String>,
    /// Seconds between two job status checks.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_secs: u64,
    /// Give up waiting for the job after this many seconds.
    #[arg(long, default_value_t = 15 * 60)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Wait,
    UploadOnly,
    JobStatus,
}

impl UploadArgs {
    pub fn mode(&self) -> UploadMode {
        if self.upload_only {
            UploadMode::UploadOnly
        } else if self.job_status {
            UploadMode::JobStatus
        } else {
            UploadMode::Wait
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            deadline: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "revenue_api_fetch", version, about = "Fetch processed partner data")]
pub struct FetchArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Start date in YYYY-MM-DD format
    #[arg(long, value_parser = parse_date)]
    pub start_date: NaiveDate,
    /// End date in YYYY-MM-DD format
    #[arg(long, value_parser = parse_date)]
    pub end_date: NaiveDate,
    /// Data source name provided by the API operator
    #[arg(long)]
    pub source: String,
    /// Path to save csv file, will be printed to stdout if omitted
    #[arg(long)]
    pub csv_output_file: Option<PathBuf>,
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| format!("expected YYYY-MM-DD, got {value:?}: {err}"))
}

pub fn run_upload(args: UploadArgs) -> Result<()> {
    let client = args.connection.client()?.with_poll_settings(args.poll_settings());
    let csv_path = args.csv_path.as_deref();
    let csv_content = args.csv_content.as_deref();

    let response = match args.mode() {
        UploadMode::UploadOnly => client.upload_daily_data(csv_path, csv_content)?,
        UploadMode::JobStatus => client.check_job_status(args.job_id.as_deref())?,
        UploadMode::Wait => {
            let spinner = spinner("Waiting for upload job to finish...");
            let result = client.upload_and_wait_for_success(csv_path, csv_content);
            spinner.finish_and_clear();
            result?
        }
    };

    println!("{}", serde_json::to_string_pretty(&Value::Object(response))?);
    Ok(())
}

pub fn run_fetch(args: FetchArgs) -> Result<()> {
    let client = args.connection.client()?;
    client.fetch_data(
        args.start_date,
        args.end_date,
        &args.source,
        args.csv_output_file.as_deref(),
    )?;
    Ok(())
}

/// Progress display shared by spinners and log output, so log lines are
/// printed above a running spinner instead of through it.
fn progress() -> &'static MultiProgress {
    static PROGRESS: OnceLock<MultiProgress> = OnceLock::new();
    PROGRESS.get_or_init(MultiProgress::new)
}

/// Install the stderr log subscriber. `REVENUE_API_LOG` overrides the
/// default `info` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("REVENUE_API_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = SuspendingWriter {
        progress: progress().clone(),
        inner: io::stderr,
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .try_init();
}

/// Log writer that hides active spinners while a line is written.
#[derive(Clone)]
struct SuspendingWriter<M> {
    progress: MultiProgress,
    inner: M,
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for SuspendingWriter<M> {
    type Writer = Suspended<'a, M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Suspended {
            progress: &self.progress,
            inner: self.inner.make_writer(),
        }
    }
}

struct Suspended<'a, W> {
    progress: &'a MultiProgress,
    inner: W,
}

impl<W: Write> Write for Suspended<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let inner = &mut self.inner;
        self.progress.suspend(|| inner.write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let inner = &mut self.inner;
        self.progress.suspend(|| inner.write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Print an error chain to stderr.
pub fn report_error(err: &anyhow::Error) {
    eprintln!("{} {err:#}", "error:".red().bold());
}

fn spinner(message: &'static str) -> ProgressBar {
    let spinner = progress().add(ProgressBar::new_spinner());
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Token lookup order: explicit value (flag or env), token file, prompt.
fn resolve_token<F>(explicit: Option<String>, token_path: &Path, prompt: F) -> Result<String>
where
    F: FnOnce() -> Result<Option<String>>,
{
    if let Some(token) = explicit.filter(|t| !t.trim().is_empty()) {
        return Ok(token);
    }
    if let Some(token) = load_token(token_path)? {
        return Ok(token);
    }
    match prompt()? {
        Some(token) if !token.trim().is_empty() => Ok(token),
        _ => bail!("no API token: pass --token, set REVENUE_API_TOKEN or create {}", token_path.display()),
    }
}

/// Hidden prompt, only when a user can answer it.
fn prompt_token() -> Result<Option<String>> {
    if !std::io::stdin().is_terminal() {
        return Ok(None);
    }
    let token = Password::new()
        .with_prompt("API token")
        .interact()
        .context("failed to read API token")?;
    Ok(Some(token))
}

fn token_file() -> PathBuf {
    let dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.join(TOKEN_FILE_NAME)
}

fn persist_token(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, token).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "API token saved");
    Ok(())
}

fn load_token(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(data) => {
            let token = data.trim();
            Ok((!token.is_empty()).then(|| token.to_string()))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}
