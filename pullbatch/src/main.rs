#![warn(clippy::all, rust_2018_idioms)]

use std::process::ExitCode;

use clap::Parser;
use pullbatch::{logging, report, run, Args};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.log_level);

    report(&run(&args).await)
}
