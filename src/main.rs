use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use skill_discovery::catalog::load_catalog;
use skill_discovery::config::{self, DiscoveryConfig, RealEnv};
use skill_discovery::DiscoveryPipeline;

#[derive(Parser)]
#[command(name = "skill-discovery", version)]
#[command(about = "Mine session transcripts for recurring workflows worth turning into skills")]
struct Cli {
    /// Transcript root (defaults to ~/.claude/projects)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Scan state file (defaults to ~/.claude/skill-discovery/scan-state.json)
    #[arg(long)]
    state: Option<PathBuf>,

    /// Existing skills: a YAML/JSON list of {name, description} or a skills directory
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Config file used instead of the global + project merge
    #[arg(long)]
    config: Option<PathBuf>,

    /// Changed files consumed in this run; the rest wait for the next run
    #[arg(long)]
    max_files: Option<usize>,

    /// Skip prompt clustering
    #[arg(long)]
    no_cluster: bool,

    /// Single-line JSON instead of pretty output
    #[arg(long)]
    compact: bool,

    /// Print the default config template and exit
    #[arg(long)]
    print_config: bool,

    /// Write the default config template to ~/.claude/skill-discovery.yaml and exit
    #[arg(long)]
    init_config: bool,
}

fn load_config(cli: &Cli) -> Result<DiscoveryConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_file(path)?,
        None => {
            let cwd = std::env::current_dir().context("failed to get current directory")?;
            config::load_merged(&RealEnv, Some(&cwd))
        }
    };

    if let Some(root) = &cli.root {
        config.scan.projects_root = Some(root.to_string_lossy().into_owned());
    }
    if let Some(state) = &cli.state {
        config.scan.state_path = Some(state.to_string_lossy().into_owned());
    }
    if cli.max_files.is_some() {
        config.scan.max_files = cli.max_files;
    }
    if cli.no_cluster {
        config.clustering.enabled = false;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", DiscoveryConfig::defaults_yaml());
        return Ok(());
    }
    if cli.init_config {
        let path = config::init_global(&RealEnv)?;
        println!("{}", path.display());
        return Ok(());
    }

    // stdout carries the report only
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("skill_discovery=info".parse()?),
        )
        .init();

    let config = load_config(&cli)?;
    let mut pipeline = DiscoveryPipeline::from_config(&RealEnv, config);
    if let Some(path) = &cli.catalog {
        pipeline = pipeline.with_catalog(load_catalog(path)?);
    }

    let report = pipeline.run().await?;
    let json = if cli.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{json}");
    Ok(())
}
