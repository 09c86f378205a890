use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sitewatch")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Self-hosted service monitor")]
pub struct Cli {
    /// Path to the site config file
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Re-initialise the site in the config directory
    #[arg(long = "init")]
    pub init: bool,

    /// Run the web UI
    #[arg(long = "webui", default_value_t = true, action = clap::ArgAction::Set)]
    pub webui: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
