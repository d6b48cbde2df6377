//! Live OBD-II Dashboard
//!
//! Connects to an ELM327 adapter, polls speed, RPM and engine load in the
//! background and redraws them at a fixed rate until the operator quits or
//! the link is lost.

pub mod app;
pub mod cli;
pub mod config;
pub mod render;

pub use app::{open_link, run, run_session, Exit, Session, ShutdownReport, SIMULATOR_PORT};
pub use cli::Args;
pub use config::{ConfigError, DashboardConfig};
pub use render::{ConsoleSurface, RenderLoop, RenderSurface};

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging to stderr so the status line on stdout stays intact.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_logging(level: Level) -> bool {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
