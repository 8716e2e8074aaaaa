//! CLI boundary (C20): subcommand dispatch over the registry and
//! pipeline. Mirrors the project's usual `clap::Parser` + subcommand
//! enum shape, with `list`/`get` as the only two verbs the design
//! notes name.

mod adapter;
mod archive;
mod cache;
mod config;
mod errors;
mod fetcher;
mod logging;
mod model;
mod names;
mod pipeline;
mod progress;
mod registry;
mod sources;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use heck::ToTitleCase;

use config::{Config, Delimiter, WorldPlantsSet};
use errors::WrongFieldsPolicy;
use pipeline::Pipeline;
use registry::Registry;

/// Normalizes heterogeneous biodiversity checklists into a unified taxonomic archive.
#[derive(Parser)]
#[command(name = "harvester", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Local path or URL to use instead of the source's registered url.
    #[arg(short = 'f', long, global = true)]
    file: Option<String>,

    /// Reuse whatever is already in the download/extract cache instead of fetching fresh.
    #[arg(short = 's', long, global = true)]
    skip_download: bool,

    /// Wrap the exported archive in a zip container.
    #[arg(short = 'z', long, global = true)]
    zip_output: bool,

    /// Disable CSV quoting when reading delimited sources.
    #[arg(short = 'Q', long, global = true)]
    no_quotes: bool,

    /// How to handle rows with the wrong number of fields.
    #[arg(short = 'w', long, global = true, value_enum)]
    wrong_fields_num: Option<WrongFieldsPolicy>,

    /// Dataset `issued` date recorded in the output metadata.
    #[arg(short = 'd', long, global = true)]
    issued_date: Option<String>,

    /// Dataset version string recorded in the output metadata.
    #[arg(long, global = true)]
    data_version: Option<String>,

    /// Field delimiter for delimited-text sources.
    #[arg(long, global = true, value_enum)]
    delimiter: Option<Delimiter>,

    /// Nomenclatural code override.
    #[arg(long, global = true)]
    code: Option<String>,

    /// Print progress and debug-level logs to stderr.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Path to a local schema definition, overriding the bundled one.
    #[arg(short = 'S', long, global = true)]
    schema: Option<PathBuf>,

    /// Which WorldPlants checklist to convert.
    #[arg(long, global = true, value_enum)]
    world_plants_set: Option<WorldPlantsSet>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered sources
    List {
        /// Print a verbose table instead of just the labels.
        #[arg(long)]
        verbose: bool,
    },
    /// Run the conversion pipeline for a source
    Get {
        /// Source label, or its 1-based position in `list`'s output.
        label: String,
        /// Where to write the exported archive. Defaults to `<label>.sfga` in the
        /// current directory.
        output: Option<PathBuf>,
    },
}

fn build_config(cli: &Cli) -> Result<Config, errors::Error> {
    let mut cfg = Config::new()?;
    cfg.file = cli.file.clone();
    cfg.skip_download = cli.skip_download;
    cfg.zip_output = cli.zip_output;
    cfg.no_quotes = cli.no_quotes;
    if let Some(w) = cli.wrong_fields_num {
        cfg.wrong_fields_num = w;
    }
    cfg.issued_date = cli.issued_date.clone();
    cfg.data_version = cli.data_version.clone();
    if let Some(d) = cli.delimiter {
        cfg.delimiter = d;
    }
    cfg.code = cli.code.clone();
    cfg.verbose = cli.verbose;
    cfg.schema = cli.schema.clone();
    if let Some(set) = cli.world_plants_set {
        cfg.world_plants_set = set;
    }
    Ok(cfg)
}

fn run() -> Result<(), errors::Error> {
    let cli = Cli::parse();
    let cfg = build_config(&cli)?;
    logging::init(&cfg.log_path, cfg.verbose)?;

    match &cli.command {
        Commands::List { verbose } => {
            let registry = Registry::new();
            let labels = registry.labels();
            if *verbose {
                for (i, label) in labels.iter().enumerate() {
                    let adapter = registry.build(label, &cfg)?;
                    let descriptor = adapter.descriptor();
                    println!(
                        "{:>2}. {:<16} {}{}",
                        i + 1,
                        descriptor.label,
                        descriptor.name,
                        if descriptor.manual_steps { " (manual download required)" } else { "" }
                    );
                }
            } else {
                for (i, label) in labels.iter().enumerate() {
                    println!("{:>2}. {:<16} {}", i + 1, label, label.to_title_case());
                }
            }
            Ok(())
        }
        Commands::Get { label, output } => {
            let registry = Registry::new();
            let resolved = registry.resolve(label)?;
            let output_path = output.clone().unwrap_or_else(|| {
                let ext = if cfg.zip_output { "zip" } else { "sfga" };
                PathBuf::from(format!("{resolved}.{ext}"))
            });

            let pipeline = Pipeline::new();
            pipeline.run(&cfg, label, &output_path)
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
