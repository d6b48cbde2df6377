//! Command line

use clap::Parser;

/// Live OBD-II dashboard for an ELM327 adapter
#[derive(Debug, Clone, Parser)]
#[command(name = "obd-dashboard", version)]
pub struct Args {
    /// Serial device of the adapter, or `sim` for the built-in simulator
    /// [default: link.port from dashboard.toml or OBD_DASH__LINK__PORT, else /dev/rfcomm99]
    #[arg(value_name = "PORT")]
    target: Option<String>,

    /// Same as the positional PORT
    #[arg(long, short, value_name = "PORT", conflicts_with = "target")]
    port: Option<String>,
}

impl Args {
    /// Port given on the command line, if any. Overrides every config layer.
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref().or(self.target.as_deref())
    }
}
