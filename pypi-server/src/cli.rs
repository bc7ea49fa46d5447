//! Command-line interface for the package server
//!
//! Argument parsing, configuration layering and command execution.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::hash_utils::HashAlgo;
use crate::{logging, server};

/// Command-line interface for the package server
#[derive(Debug, Parser)]
#[command(name = "pypi-server")]
#[command(about = "Minimal PEP 503 package index")]
#[command(version)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the package index server
    Start(StartArgs),
    /// List projects, or one project's files in version order
    List {
        /// Project name (any spelling)
        project: Option<String>,
        /// Data directory for package storage
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Default, Args)]
pub struct StartArgs {
    /// Host to bind the server to
    #[arg(long)]
    pub host: Option<String>,
    /// Port to run the server on
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Data directory for package storage
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Allow uploads to replace existing files
    #[arg(long)]
    pub overwrite: bool,
    /// Rehash files on every listing
    #[arg(long)]
    pub no_cache: bool,
    /// Cache-Control max-age for downloads in seconds (0 disables the header)
    #[arg(long, value_name = "SECONDS")]
    pub cache_control: Option<u64>,
    /// Digest algorithm for download links (sha1, sha256, sha512)
    #[arg(long, value_name = "ALGO")]
    pub hash_algo: Option<HashAlgo>,
}

impl StartArgs {
    /// Flags win over file and environment settings.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(data_dir) = &self.data_dir {
            config.storage.data_dir = data_dir.clone();
        }
        if self.overwrite {
            config.storage.overwrite = true;
        }
        if self.no_cache {
            config.storage.enable_cache = false;
        }
        if let Some(seconds) = self.cache_control {
            config.index.cache_control = Some(seconds);
        }
        if let Some(hash_algo) = self.hash_algo {
            config.index.hash_algo = hash_algo;
        }
    }
}

/// Defaults, then the config file, then `PYPI_SERVER_*` variables.
pub fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    Ok(config)
}

/// Execute the parsed command.
pub async fn execute_command(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Start(args) => {
            args.apply(&mut config);
            let _guard = logging::init_subscriber(&config.logging)?;
            server::run_server(config).await
        }
        Commands::List { project, data_dir } => {
            if let Some(data_dir) = data_dir {
                config.storage.data_dir = data_dir;
            }
            list(&Catalog::from_config(&config), project.as_deref()).await
        }
    }
}

async fn list(catalog: &Catalog, project: Option<&str>) -> Result<()> {
    match project {
        None => {
            let projects = catalog.list_projects().await?;
            if projects.is_empty() {
                println!("No packages in {}", catalog.root().display());
            }
            for project in projects {
                println!("{project}");
            }
        }
        Some(project) => {
            let packages = catalog.list_packages(project).await?;
            if packages.is_empty() {
                println!("No files for {project}");
            }
            for file in packages {
                println!("{:<16} {}", file.version.to_string(), file.fname_and_hash());
            }
        }
    }

    let stats = catalog.last_scan();
    if stats.skipped > 0 {
        eprintln!("{} unreadable entries skipped", stats.skipped);
    }
    Ok(())
}
