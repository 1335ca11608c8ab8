mod cli;

use clap::Parser;
use cli::{Cli, Commands, Overrides};
use fetchtree::config::Config;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

fn load_config(path: Option<std::path::PathBuf>, overrides: &Overrides) -> Result<Config, AnyError> {
    let mut config = match path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(address) = overrides.address {
        config.server.bind_addr = address;
    }
    if let Some(dir) = &overrides.download_dir {
        config.downloads.directory = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    fetchtree::observability::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let config = load_config(cli.config, &args.overrides)?;
            fetchtree::api::run(config, args.demo).await?
        }
        Commands::Config(overrides) => {
            let config = load_config(cli.config, &overrides)?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
