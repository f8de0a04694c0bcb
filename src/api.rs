// API client module: a small blocking HTTP client for the Revenue API.
// It uploads daily revenue CSV data, follows the server-side job until it
// ends and fetches processed partner data back.

use std::borrow::Cow;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::NaiveDate;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{HttpError, Result, RevenueApiError};

pub const DEFAULT_API_URL: &str = "https://revenueapi.osp.opera.software";
pub const DEFAULT_API_VERSION: &str = "v1";

/// Bound on establishing a connection. Requests themselves are not
/// time limited unless `with_request_timeout` sets one.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest CSV file accepted for path based uploads (30 MiB).
pub const MAX_FILE_SIZE: u64 = 30 * 1024 * 1024;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// JSON object returned by the upload and job status endpoints.
pub type ApiResponse = Map<String, Value>;

/// State of a server-side upload job, read from the `status` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failed,
    Running,
    Undefined,
    Unrecognized(String),
}

impl JobStatus {
    /// Status of a `check_job_status` response. A missing `status` field
    /// counts as unrecognized.
    pub fn from_response(response: &ApiResponse) -> Self {
        match response.get("status").and_then(Value::as_str) {
            Some(status) => Self::from(status),
            None => Self::Unrecognized(String::new()),
        }
    }

    /// Everything except `Running` ends the polling loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl From<&str> for JobStatus {
    fn from(value: &str) -> Self {
        match value {
            "success" => Self::Success,
            "failed" => Self::Failed,
            "running" => Self::Running,
            "undefined" => Self::Undefined,
            other => Self::Unrecognized(other.to_string()),
        }
    }
}

/// Timing of `upload_and_wait_for_success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Pause between two status checks.
    pub interval: Duration,
    /// Wall-clock bound for the whole polling session.
    pub deadline: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(15 * 60),
        }
    }
}

/// Payload of `fetch_partner_data`. `available_days` is informational and
/// comes either as a list or as a comma separated string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub data: String,
    pub available_days: Value,
}

impl FetchResponse {
    /// Number of days the server reports as available for the range.
    pub fn available_day_count(&self) -> usize {
        match &self.available_days {
            Value::Array(days) => days.len(),
            Value::String(days) => days.split(',').filter(|d| !d.trim().is_empty()).count(),
            Value::Null => 0,
            _ => 1,
        }
    }
}

/// Where the CSV to upload comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvSource<'a> {
    Path(&'a Path),
    Content(&'a str),
}

impl<'a> CsvSource<'a> {
    /// Exactly one of `csv_path` and `csv_content` has to be set.
    pub fn from_args(csv_path: Option<&'a Path>, csv_content: Option<&'a str>) -> Result<Self> {
        match (csv_path, csv_content) {
            (Some(path), None) => Ok(Self::Path(path)),
            (None, Some(content)) => Ok(Self::Content(content)),
            _ => Err(RevenueApiError::validation(
                r#"One of "csv_content" or "csv_path" must be defined"#,
            )),
        }
    }

    /// Load the CSV text. Only files are size checked.
    pub fn read(&self) -> Result<Cow<'a, str>> {
        let path = match *self {
            Self::Content(content) => return Ok(Cow::Borrowed(content)),
            Self::Path(path) => path,
        };

        let meta = fs::metadata(path)
            .ok()
            .filter(|meta| meta.is_file())
            .ok_or_else(|| {
                RevenueApiError::validation(format!("Could not find csv file: {}", path.display()))
            })?;
        if meta.len() > MAX_FILE_SIZE {
            return Err(RevenueApiError::validation(format!(
                "Selected file is too big (>{}MiB): {}",
                MAX_FILE_SIZE / (1024 * 1024),
                path.display()
            )));
        }

        let content = fs::read_to_string(path).map_err(|err| RevenueApiError::io(path, err))?;
        Ok(Cow::Owned(content))
    }
}

/// Blocking client for the Revenue API. Every request carries the
/// user/token pair as HTTP Basic credentials.
#[derive(Clone)]
pub struct RevenueApiClient {
    client: Client,
    base_url: String,
    version: String,
    user: String,
    token: String,
    poll: PollSettings,
    request_timeout: Option<Duration>,
}

impl fmt::Debug for RevenueApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevenueApiClient")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .field("poll", &self.poll)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl RevenueApiClient {
    /// Client for the default API URL and version.
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Self::with_endpoint(user, token, DEFAULT_API_VERSION, DEFAULT_API_URL)
    }

    /// Client for an explicit API version and base URL. Surrounding
    /// slashes are stripped from both.
    pub fn with_endpoint(
        user: impl Into<String>,
        token: impl Into<String>,
        api_version: &str,
        api_url: &str,
    ) -> Result<Self> {
        Ok(RevenueApiClient {
            client: http_client(None)?,
            base_url: api_url.trim_end_matches('/').to_string(),
            version: api_version.trim_matches('/').to_string(),
            user: user.into(),
            token: token.into(),
            poll: PollSettings::default(),
            request_timeout: None,
        })
    }

    /// Replace the polling interval and deadline used while waiting for a job.
    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Limit the total duration of each request, body transfer included.
    /// `None` (the default) lets large uploads and fetches take as long as
    /// they need.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Result<Self> {
        self.client = http_client(timeout)?;
        self.request_timeout = timeout;
        Ok(self)
    }

    /// Polling interval and deadline currently in effect.
    pub fn poll_settings(&self) -> PollSettings {
        self.poll
    }

    /// Per-request time limit, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Full URL of an API method: `{base}/{version}/{method}`.
    pub fn endpoint(&self, method: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.version, method)
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let credentials = STANDARD.encode(format!("{}:{}", self.user, self.token));
        let mut value = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|_| RevenueApiError::validation("credentials are not a valid header value"))?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    /// Start an upload without waiting for the remote job. The returned
    /// object normally holds `job_id`, which should still be monitored.
    pub fn upload_daily_data(
        &self,
        csv_path: Option<&Path>,
        csv_content: Option<&str>,
    ) -> Result<ApiResponse> {
        let csv = CsvSource::from_args(csv_path, csv_content)?.read()?;
        let request = self
            .client
            .post(self.endpoint("upload_daily_data"))
            .json(&json!({ "csv": csv }));
        let body = self.send(request)?;
        Ok(parse_object(body))
    }

    /// Check the status of a previously started upload.
    pub fn check_job_status(&self, job_id: Option<&str>) -> Result<ApiResponse> {
        let job_id = job_id.filter(|id| !id.trim().is_empty()).ok_or_else(|| {
            RevenueApiError::validation(r#""job_id" must be provided to check job status"#)
        })?;
        self.job_status(job_id, None)
    }

    fn job_status(&self, job_id: &str, timeout: Option<Duration>) -> Result<ApiResponse> {
        let mut request = self
            .client
            .get(self.endpoint("check_job_status"))
            .query(&[("job_id", job_id)]);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let body = self.send(request)?;
        Ok(parse_object(body))
    }

    /// Start an upload and block until the remote job has ended.
    pub fn upload_and_wait_for_success(
        &self,
        csv_path: Option<&Path>,
        csv_content: Option<&str>,
    ) -> Result<ApiResponse> {
        let upload_response = self.upload_daily_data(csv_path, csv_content)?;
        let job_id = job_id_of(&upload_response).ok_or_else(|| {
            RevenueApiError::Upload(format!(
                "Upload was not started. Error: {}",
                Value::Object(upload_response.clone())
            ))
        })?;
        info!(%job_id, "upload started");
        self.wait_for_job_to_end(&job_id)
    }

    fn wait_for_job_to_end(&self, job_id: &str) -> Result<ApiResponse> {
        let started = Instant::now();
        let time_exceeded = || RevenueApiError::TimeExceeded {
            job_id: job_id.to_string(),
            elapsed_secs: started.elapsed().as_secs(),
        };

        let remaining = || {
            self.poll
                .deadline
                .checked_sub(started.elapsed())
                .filter(|left| !left.is_zero())
                .ok_or_else(time_exceeded)
        };
        // Status requests share the polling deadline.
        let poll = || -> Result<ApiResponse> {
            match self.job_status(job_id, Some(remaining()?)) {
                Err(RevenueApiError::Http(HttpError::Transport(err))) if err.is_timeout() => {
                    Err(time_exceeded())
                }
                other => other,
            }
        };

        let mut response = poll()?;
        let mut status = JobStatus::from_response(&response);
        while !status.is_terminal() {
            thread::sleep(self.poll.interval.min(remaining()?));
            response = poll()?;
            status = JobStatus::from_response(&response);
            debug!(%job_id, ?status, "polled job status");
        }

        info!(%job_id, ?status, elapsed_ms = started.elapsed().as_millis() as u64, "job ended");
        match status {
            JobStatus::Success => Ok(response),
            _ => Err(RevenueApiError::Upload(format!(
                "Data upload failed. API response: {}",
                Value::Object(response)
            ))),
        }
    }

    /// Fetch partner data for `[start_date, end_date]`. The CSV goes to
    /// `csv_path` (".csv" appended when missing) or to stdout.
    pub fn fetch_data(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        source: &str,
        csv_path: Option<&Path>,
    ) -> Result<FetchResponse> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        self.fetch_data_to(start_date, end_date, source, csv_path, &mut out)
    }

    /// Same as [`fetch_data`](Self::fetch_data) with `out` standing in
    /// for stdout.
    pub fn fetch_data_to<W: Write>(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        source: &str,
        csv_path: Option<&Path>,
        out: &mut W,
    ) -> Result<FetchResponse> {
        let start = start_date.format(DATE_FORMAT).to_string();
        let end = end_date.format(DATE_FORMAT).to_string();
        let request = self.client.get(self.endpoint("fetch_partner_data")).query(&[
            ("start_date", start.as_str()),
            ("end_date", end.as_str()),
            ("source", source),
        ]);
        let body = self.send(request)?;
        let response: FetchResponse = serde_json::from_str(&body)
            .map_err(|err| RevenueApiError::MalformedResponse(format!("{err}: {body}")))?;
        info!(
            source,
            available_days = response.available_day_count(),
            "partner data fetched"
        );

        match csv_path {
            Some(path) => write_new_file(&csv_output_path(path), &response.data)?,
            None => {
                writeln!(out, "{}", response.data)
                    .and_then(|_| out.flush())
                    .map_err(|err| RevenueApiError::io("<stdout>", err))?;
            }
        }
        Ok(response)
    }

    /// Execute a request with credentials attached and return the body of
    /// a 200 response.
    fn send(&self, builder: RequestBuilder) -> Result<String> {
        let request = builder.headers(self.auth_headers()?).build()?;
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, url = %url.path(), "sending HTTP request");

        let response = self.client.execute(request)?;
        let status = response.status();
        debug!(%method, url = %url.path(), %status, "received HTTP response");

        let body = response.text()?;
        check_status(status, body)
    }
}

fn http_client(timeout: Option<Duration>) -> Result<Client> {
    let client = Client::builder()
        .user_agent(concat!("revenue-api-client/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

fn check_status(status: StatusCode, body: String) -> Result<String> {
    if status.is_server_error() {
        return Err(HttpError::ServerUnavailable { status, body }.into());
    }
    if status != StatusCode::OK {
        return Err(HttpError::Client { status, body }.into());
    }
    Ok(body)
}

/// Decode a JSON object body. Anything else is handed back as
/// `{"error": <raw body>}` so the caller still sees what the server said.
fn parse_object(body: String) -> ApiResponse {
    match serde_json::from_str::<ApiResponse>(&body) {
        Ok(object) => object,
        Err(err) => {
            warn!(error = %err, "API response is not a JSON object");
            let mut fallback = Map::new();
            fallback.insert("error".to_string(), Value::String(body));
            fallback
        }
    }
}

fn job_id_of(response: &ApiResponse) -> Option<String> {
    match response.get("job_id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn csv_output_path(path: &Path) -> PathBuf {
    if path.to_string_lossy().ends_with(".csv") {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".csv");
        PathBuf::from(name)
    }
}

/// Create `path` and write `data` to it. Never replaces an existing file.
fn write_new_file(path: &Path, data: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::AlreadyExists => RevenueApiError::FileExists(path.to_path_buf()),
            _ => RevenueApiError::io(path, err),
        })?;
    file.write_all(data.as_bytes())
        .map_err(|err| RevenueApiError::io(path, err))?;
    info!(path = %path.display(), bytes = data.len(), "partner data saved");
    Ok(())
}
