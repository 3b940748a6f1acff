//! paper-agent CLI: crawl, filter, download, and analyze conference papers.
//!
//! Each stage prints one JSON summary line on stdout; logs and progress go
//! to stderr.

mod commands;

use std::process::ExitCode;

use clap::Parser;

use commands::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error handler: {e}");
    }
    let cli = Cli::parse();
    commands::init_tracing(&cli);

    let stage = cli.command.name();
    match commands::run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            let code = commands::exit_code(&report);
            commands::emit_error(stage, code, &report);
            eprintln!("Error: {report:?}");
            ExitCode::from(code)
        }
    }
}
