// Library root
// -----------
// Client for the Revenue API plus the pieces shared by the two command
// line tools in `src/bin`.
//
// Module responsibilities:
// - `api`: HTTP interactions (upload, job status polling, partner data
//   fetch) and the request/response types.
// - `error`: the `RevenueApiError` type returned by every client call.
// - `cli`: argument parsing, credential lookup and logging setup for the
//   `revenue_api_upload` and `revenue_api_fetch` binaries.
pub mod api;
pub mod cli;
pub mod error;

pub use api::{
    ApiResponse, CsvSource, FetchResponse, JobStatus, PollSettings, RevenueApiClient,
    CONNECT_TIMEOUT, DEFAULT_API_URL, DEFAULT_API_VERSION, MAX_FILE_SIZE,
};
pub use error::{HttpError, Result, RevenueApiError};
