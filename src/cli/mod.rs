use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::types::ApiMap;
use crate::api::{BnmpApi, HeaderBundle, HttpBnmpApi};
use crate::config::Config;
use crate::error::Result;
use crate::progress::{ProgressManager, StageProgress};
use crate::store::{SqliteStore, WarrantStore};
use crate::workflow::{self, Workflow};

/// BNMP warrant pipeline
#[derive(Parser, Debug)]
#[command(
    name = "bnmp",
    about = "Scrape, stage and flatten arrest warrants from the BNMP portal",
    version,
    long_about = None
)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Session cookie, overriding the header bundle file
    #[arg(long, global = true, env = "BNMP_COOKIE")]
    pub cookie: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline for one jurisdiction
    #[command(alias = "r")]
    Run {
        /// State id (1..=27)
        state_id: u32,
    },

    /// Map a jurisdiction and print its query descriptors as JSON
    #[command(alias = "m")]
    Map {
        /// State id (1..=27)
        state_id: u32,
    },

    /// Scrape previously mapped descriptors (staging tables must exist)
    #[command(alias = "s")]
    Scrape {
        /// State id (1..=27)
        state_id: u32,
        /// Descriptor file, as printed by `map`
        maps: PathBuf,
    },

    /// Flatten staged warrants without scraping
    #[command(alias = "p")]
    Parse,

    /// Merge staged batches into the permanent tables and drop staging
    Finish,

    /// Write the default configuration file
    Init,

    /// Create or drop the staging tables
    Setup {
        /// Drop the staging tables instead of creating them
        #[arg(long)]
        drop: bool,
    },
}

impl Cli {
    fn build_api(&self, cfg: &Config) -> Result<Arc<dyn BnmpApi>> {
        let bundle = match &self.cookie {
            Some(cookie) => HeaderBundle::with_cookie(cookie),
            None => HeaderBundle::from_file(&cfg.http.headers_path)?,
        };
        Ok(Arc::new(HttpBnmpApi::new(
            cfg.urls.clone(),
            &cfg.http,
            &bundle,
        )?))
    }

    fn build_store(cfg: &Config) -> Result<Arc<dyn WarrantStore>> {
        Ok(Arc::new(SqliteStore::open(&cfg.store.path)?))
    }

    /// Run the CLI application
    pub async fn run() -> Result<()> {
        let cli = Self::parse();

        if cli.verbose {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
                .init();
        } else {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .init();
        }

        if let Commands::Init = cli.command {
            Config::initialize()?;
            println!("Wrote {}", Config::config_file_path()?.display());
            return Ok(());
        }

        let cfg = Config::load()?;
        let progress = Arc::new(ProgressManager::new(cli.quiet, cli.verbose));

        match &cli.command {
            Commands::Run { state_id } => {
                let api = cli.build_api(&cfg)?;
                let store = Self::build_store(&cfg)?;
                let workflow = Workflow::new(api, store, cfg, Arc::clone(&progress));

                let summary = workflow.run(*state_id).await?;

                println!(
                    "state {}: {} descriptors, {} new, {} seen, {} parsed",
                    summary.state_id,
                    summary.descriptors,
                    summary.new_warrants,
                    summary.seen_warrants,
                    summary.parsed
                );
            }
            Commands::Map { state_id } => {
                let api = cli.build_api(&cfg)?;
                let store = Self::build_store(&cfg)?;
                let workflow = Workflow::new(api, store, cfg, Arc::clone(&progress));

                let stage = StageProgress::new(Arc::clone(&progress), "mapping");
                let maps = workflow.map(*state_id).await?;
                stage.finish_and_clear();

                println!("{}", serde_json::to_string_pretty(&maps)?);
            }
            Commands::Scrape { state_id, maps } => {
                let api = cli.build_api(&cfg)?;
                let store = Self::build_store(&cfg)?;
                let workflow = Workflow::new(api, store, cfg, Arc::clone(&progress));

                let text = std::fs::read_to_string(maps)?;
                let maps: Vec<ApiMap> = serde_json::from_str(&text)?;

                let (detailed, seen) = workflow.scrape(*state_id, &maps).await?;

                println!("{} new warrants staged, {} seen", detailed.len(), seen);
            }
            Commands::Parse => {
                // Parsing only reads the store; no session is needed.
                let store = Self::build_store(&cfg)?;
                let parsed = workflow::parse_staged(store.as_ref(), &cfg.store.output_dir)?;
                println!("parsed {} warrants", parsed);
            }
            Commands::Finish => {
                let store = Self::build_store(&cfg)?;
                store.merge(Local::now().date_naive())?;
                store.cleanup()?;
                println!("staged batches merged");
            }
            Commands::Setup { drop } => {
                let store = Self::build_store(&cfg)?;
                if *drop {
                    store.cleanup()?;
                    println!("staging tables dropped");
                } else {
                    store.setup()?;
                    println!("staging tables ready");
                }
            }
            Commands::Init => unreachable!("handled before config load"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_state_id() {
        let cli = Cli::parse_from(["bnmp", "run", "5"]);
        assert!(matches!(cli.command, Commands::Run { state_id: 5 }));
    }

    #[test]
    fn cookie_flag_is_global() {
        let cli = Cli::parse_from(["bnmp", "--cookie", "portalbnmp=abc", "map", "12"]);
        assert_eq!(cli.cookie.as_deref(), Some("portalbnmp=abc"));
        assert!(matches!(cli.command, Commands::Map { state_id: 12 }));
    }
}
