pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;

use clap::Parser;
use std::process::ExitCode;

pub fn run() -> ExitCode {
    // RUST_LOG wins; info otherwise
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = cli::Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start async runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::execute(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log::error!("studyflow-focus failed: {error}");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
