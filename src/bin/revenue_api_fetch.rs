// Entrypoint for `revenue_api_fetch`: download processed partner data to a
// CSV file or stdout.

use std::process::ExitCode;

use clap::Parser;
use revenue_api_client::cli::{self, FetchArgs};

fn main() -> ExitCode {
    cli::init_tracing();
    let args = FetchArgs::parse();

    match cli::run_fetch(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            cli::report_error(&err);
            ExitCode::FAILURE
        }
    }
}
