//! waphouse CLI - runs a write-audit-publish session for a SQL project

use clap::Parser;

mod cli;
mod commands;
mod config;

use cli::Cli;

fn init_logging(global: &cli::GlobalArgs) {
    let level = if global.quiet {
        log::LevelFilter::Warn
    } else {
        match global.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::new().filter_level(level).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.global);

    let result: anyhow::Result<()> = match &cli.command {
        cli::Commands::Run(args) => commands::execute(args, &cli.global).await,
    };

    if let Err(err) = result {
        if let Some(exit_code) = err.downcast_ref::<commands::ExitCode>() {
            std::process::exit(exit_code.0);
        }
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
