//! Detnorm: normalize heterogeneous object-detection datasets.
//!
//! Detnorm ingests datasets in COCO, Pascal VOC, YOLO, CSV or class-folder
//! layouts, maps their labels onto one target taxonomy, drops corrupt and
//! duplicate images, and writes a single YOLO-style dataset split into
//! train/val/test with a `manifest.json` describing the run.
//!
//! # Modules
//!
//! - [`detect`]: Layout detection for a dataset directory
//! - [`formats`]: One parser per supported layout
//! - [`labels`]: The label resolution cascade and its audit log
//! - [`geometry`]: Pixel and normalized bounding boxes
//! - [`verify`]: Image decoding checks and content hashing
//! - [`dedup`]: Content-hash deduplication
//! - [`split`]: Seeded, stratified train/val/test assignment
//! - [`manifest`]: Output tree and manifest writer
//! - [`pipeline`]: The end-to-end driver
//! - [`config`]: YAML configuration
//! - [`error`]: Error types for detnorm operations

pub mod config;
pub mod dedup;
pub mod detect;
pub mod error;
pub mod formats;
pub mod geometry;
pub mod labels;
pub mod manifest;
pub mod model;
pub mod pipeline;
pub mod split;
pub mod verify;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

pub use config::PipelineConfig;
pub use detect::{DatasetFormat, DatasetLayout};
pub use error::DetnormError;
pub use pipeline::{Pipeline, PipelineReport, RunOptions};

/// The detnorm CLI application.
#[derive(Parser)]
#[command(name = "detnorm")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Log debug output.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Report the detected layout of each dataset under a source root.
    Detect(DetectArgs),
    /// Normalize, deduplicate and split datasets into one output tree.
    Prepare(PrepareArgs),
    /// Show how labels resolve against the taxonomy.
    MapLabels(MapLabelsArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

/// Arguments for the detect subcommand.
#[derive(clap::Args)]
struct DetectArgs {
    /// Source root (a directory of datasets, or one dataset with --single).
    source: PathBuf,

    /// Treat the source root itself as a single dataset.
    #[arg(long)]
    single: bool,

    /// Output format for the report.
    #[arg(long, value_enum, default_value = "text")]
    output: ReportFormat,
}

/// Arguments for the prepare subcommand.
#[derive(clap::Args)]
struct PrepareArgs {
    /// Source root (a directory of datasets, or one dataset with --single).
    source: PathBuf,

    /// Output directory.
    #[arg(short, long)]
    out: PathBuf,

    /// YAML configuration file.
    #[arg(short, long, env = "DETNORM_CONFIG")]
    config: Option<PathBuf>,

    /// Train, val and test ratios; must sum to 1.0.
    #[arg(long, num_args = 3, value_names = ["TRAIN", "VAL", "TEST"])]
    split: Option<Vec<f64>>,

    /// Seed for the split shuffle.
    #[arg(long)]
    seed: Option<u64>,

    /// Target taxonomy, replacing the configured one.
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<String>>,

    /// Read every dataset as this format instead of detecting it.
    #[arg(long, value_enum)]
    format: Option<DatasetFormat>,

    /// Treat the source root itself as a single dataset.
    #[arg(long)]
    single: bool,

    /// Run every stage but write nothing.
    #[arg(long)]
    dry_run: bool,

    /// Output format for the report.
    #[arg(long, value_enum, default_value = "text")]
    output: ReportFormat,
}

/// Arguments for the map-labels subcommand.
#[derive(clap::Args)]
struct MapLabelsArgs {
    /// Source labels to resolve.
    #[arg(required = true)]
    labels: Vec<String>,

    /// YAML configuration file.
    #[arg(short, long, env = "DETNORM_CONFIG")]
    config: Option<PathBuf>,

    /// Target taxonomy, replacing the configured one.
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<String>>,

    /// Output format for the report.
    #[arg(long, value_enum, default_value = "text")]
    output: ReportFormat,
}

/// Run the detnorm CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), DetnormError> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Some(Commands::Detect(args)) => run_detect(args),
        Some(Commands::Prepare(args)) => run_prepare(args),
        Some(Commands::MapLabels(args)) => run_map_labels(args),
        None => {
            println!("detnorm {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Normalize object-detection datasets into one YOLO layout.");
            println!();
            println!("Run 'detnorm --help' for usage information.");
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_filter = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .format_timestamp(None)
    .try_init();
}

fn load_config(
    path: Option<&PathBuf>,
    classes: Option<Vec<String>>,
) -> Result<PipelineConfig, DetnormError> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(classes) = classes {
        config.taxonomy = classes;
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), DetnormError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| DetnormError::JsonWrite {
        path: PathBuf::from("<stdout>"),
        source,
    })?;
    println!("{json}");
    Ok(())
}

/// Execute the detect subcommand.
fn run_detect(args: DetectArgs) -> Result<(), DetnormError> {
    let detected = pipeline::detect_all(&args.source, args.single)?;

    match args.output {
        ReportFormat::Json => {
            let rows: Vec<serde_json::Value> = detected
                .iter()
                .map(|(source, layout)| {
                    serde_json::json!({
                        "dataset": source.name,
                        "path": source.path,
                        "layout": layout,
                    })
                })
                .collect();
            print_json(&rows)?;
        }
        ReportFormat::Text => {
            for (source, layout) in &detected {
                println!("{:<24} {}", source.name, layout.format());
            }
        }
    }
    Ok(())
}

/// Execute the prepare subcommand.
fn run_prepare(args: PrepareArgs) -> Result<(), DetnormError> {
    let mut config = load_config(args.config.as_ref(), args.classes)?;
    if let Some(ratios) = args.split {
        if let &[train, val, test] = ratios.as_slice() {
            config.split = config::SplitConfig { train, val, test };
        }
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let pipeline = Pipeline::new(config)?;
    let options = RunOptions {
        single: args.single,
        format: args.format,
        dry_run: args.dry_run,
    };
    let report = pipeline.run(&args.source, &args.out, &options)?;

    match args.output {
        ReportFormat::Json => print_json(&report)?,
        ReportFormat::Text => print!("{}", report),
    }
    Ok(())
}

/// Execute the map-labels subcommand.
fn run_map_labels(args: MapLabelsArgs) -> Result<(), DetnormError> {
    let config = load_config(args.config.as_ref(), args.classes)?;
    config.validate()?;
    let mapper = config.label_mapper()?;
    let resolutions = pipeline::resolve_labels(&mapper, args.labels.iter().map(String::as_str));

    match args.output {
        ReportFormat::Json => print_json(&resolutions)?,
        ReportFormat::Text => {
            for resolution in &resolutions {
                println!(
                    "{} -> {} ({}, {:.2})",
                    resolution.source_label,
                    resolution.target_class,
                    resolution.method,
                    resolution.confidence
                );
            }
        }
    }
    Ok(())
}
