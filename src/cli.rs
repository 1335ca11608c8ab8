use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fetchtree")]
#[command(about = "Browse remote file trees and download them with resume and verification", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $FETCHTREE_CONFIG or config/fetchtree.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API and live feed
    Serve(ServeArgs),
    /// Print the effective configuration as TOML
    Config(Overrides),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Seed fixture tasks in every status
    #[arg(long)]
    pub demo: bool,
}

/// Command-line values that take precedence over the configuration file
#[derive(clap::Args, Debug)]
pub struct Overrides {
    /// Address to bind the HTTP server to
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Root directory for downloads
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
}
