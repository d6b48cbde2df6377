//! OBD-II Dashboard - Main Entry Point

use clap::Parser;
use dashboard::{init_logging, run, Args, ConsoleSurface, DashboardConfig, Exit};
use std::process::ExitCode;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match DashboardConfig::load(args.port()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(Level::INFO);
            error!("{}", e);
            return ExitCode::from(Exit::ConfigInvalid.code());
        }
    };
    init_logging(config.log_level().unwrap_or(Level::INFO));

    info!("=== OBD Dashboard v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Type q then Enter, or press Ctrl-C, to quit");

    let mut surface = ConsoleSurface::stdout();
    let exit = run(&config, &mut surface).await;
    if exit != Exit::Quit {
        error!("Dashboard exited: {:?}", exit);
    }
    ExitCode::from(exit.code())
}
