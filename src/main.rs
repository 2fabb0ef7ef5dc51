use std::process::ExitCode;

use clap::Parser;
use kgsm_core::cli::{execute, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.user_line());
            ExitCode::from(e.exit_code().clamp(0, 255) as u8)
        }
    }
}
