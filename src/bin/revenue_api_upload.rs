// Entrypoint for `revenue_api_upload`: upload revenue CSV data, optionally
// wait for the job, or check the status of an earlier job.

use std::process::ExitCode;

use clap::Parser;
use revenue_api_client::cli::{self, UploadArgs};

fn main() -> ExitCode {
    cli::init_tracing();
    let args = UploadArgs::parse();

    match cli::run_upload(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            cli::report_error(&err);
            ExitCode::FAILURE
        }
    }
}
