//! ncars-sbt CLI
//!
//! Frames N-CARS recordings into SBT tensors.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ncars_sbt::{
    output::npy, BatchDriver, CancelToken, Category, Config, DatOpener, GroupConfig, Mode,
    VERSION,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ncars-sbt")]
#[command(version = VERSION)]
#[command(about = "N-CARS framing with Stacking Based on Time", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Frame every recording below the dataset root
    Run {
        /// Configuration file (defaults to the user config directory)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Dataset root containing n-cars_{mode}/{category}/
        #[arg(long, short = 'r', visible_alias = "rp")]
        root_path: Option<PathBuf>,

        /// Base output directory
        #[arg(long, short = 's', visible_alias = "sp")]
        save_path: Option<PathBuf>,

        /// Accumulation window in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Channel axis size of the output tensors
        #[arg(long)]
        channels: Option<usize>,

        /// Size token S used in the output directory name
        #[arg(long)]
        size: Option<u32>,

        /// Recordings processed in parallel
        #[arg(long, short = 'j')]
        workers: Option<usize>,

        /// Groups to process, e.g. "train,cars" or "all"
        #[arg(long)]
        groups: Option<String>,

        /// Write the JSON run report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show which subset a recording id is assigned to
    Split {
        #[arg(long)]
        mode: Mode,

        #[arg(long)]
        category: Category,

        /// Id token, e.g. 004396
        id: String,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the shape and value counts of a framed tensor
    Inspect {
        /// Path to an obj_*.npy file
        file: PathBuf,
    },

    /// Show configuration
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            root_path,
            save_path,
            interval_ms,
            channels,
            size,
            workers,
            groups,
            report,
        } => {
            let overrides = Overrides {
                root_path,
                save_path,
                interval_ms,
                channels,
                size,
                workers,
                groups,
            };
            cmd_run(config.as_deref(), overrides, report.as_deref())
        }
        Commands::Split {
            mode,
            category,
            id,
            config,
        } => cmd_split(config.as_deref(), mode, category, &id),
        Commands::Inspect { file } => cmd_inspect(&file),
        Commands::Config { config } => cmd_config(config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Command-line values that take precedence over the config file.
struct Overrides {
    root_path: Option<PathBuf>,
    save_path: Option<PathBuf>,
    interval_ms: Option<u64>,
    channels: Option<usize>,
    size: Option<u32>,
    workers: Option<usize>,
    groups: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(root_path) = self.root_path {
            config.root_path = root_path;
        }
        if let Some(save_path) = self.save_path {
            config.save_path = save_path;
        }
        if let Some(ms) = self.interval_ms {
            config.frame_interval = Duration::from_millis(ms);
        }
        if let Some(channels) = self.channels {
            config.channel_count = channels;
        }
        if let Some(size) = self.size {
            config.legacy_size = size;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(groups) = self.groups {
            config.groups = GroupConfig::from_csv(&groups);
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    config.context("could not load configuration")
}

fn cmd_run(
    config_path: Option<&Path>,
    overrides: Overrides,
    report: Option<&Path>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    overrides.apply(&mut config);

    println!("ncars-sbt v{VERSION}");
    println!();
    println!("  Dataset root: {}", config.root_path.display());
    println!("  Output root: {}", config.output_root().display());
    println!("  Window duration: {}ms", config.frame_interval_ms());
    println!("  Channels: {}", config.channel_count);
    println!("  Workers: {}", config.workers);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let cancel = CancelToken::new();
    ctrlc_handler(cancel.clone())?;

    let driver = BatchDriver::new(config, DatOpener)?.with_cancel(cancel);
    let summary = driver.run()?;

    if let Some(path) = report {
        summary
            .save(path)
            .with_context(|| format!("could not write report to {path:?}"))?;
        println!("Report written to {path:?}");
    }

    println!();
    println!("{}", summary.display());
    Ok(())
}

fn cmd_split(
    config_path: Option<&Path>,
    mode: Mode,
    category: Category,
    id: &str,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let subset = config.split.assign_token(mode, category, id);
    println!("{subset}");
    Ok(())
}

fn cmd_inspect(path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::File::open(path).with_context(|| format!("could not open {path:?}"))?;
    let array = npy::read_i8(&mut file).with_context(|| format!("could not read {path:?}"))?;

    let mut counts = [0usize; 3];
    for &value in &array.data {
        match value {
            -1 => counts[0] += 1,
            0 => counts[1] += 1,
            1 => counts[2] += 1,
            other => anyhow::bail!("unexpected value {other} in {path:?}"),
        }
    }

    println!("File: {}", path.display());
    println!("Shape: {:?}", array.shape);
    println!("  -1: {}", counts[0]);
    println!("   0: {}", counts[1]);
    println!("  +1: {}", counts[2]);
    Ok(())
}

fn cmd_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    println!("Configuration");
    println!("=============");
    println!();
    println!(
        "Config file: {:?}",
        config_path.map(Path::to_path_buf).unwrap_or_else(Config::config_path)
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(cancel: CancelToken) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("Cancelling...");
        cancel.cancel();
    })
    .context("Error setting Ctrl+C handler")
}
