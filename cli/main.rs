#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use log::{info, warn};
use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use epiblock::config::SearchConfig;
use epiblock::dataset::GenotypeDataset;
use epiblock::ingest::pack_tables;
use epiblock::mdr::{ContingencyTable, ScoringMetric};
use epiblock::pipeline::run_search;
use epiblock::report::{write_contingency, write_ranked};
use epiblock::shared::files::{read_variant_ids, variant_ids_path, write_variant_ids};
use epiblock::types::Combination;

#[derive(Parser)]
#[command(
    name = "epiblock",
    about = "Exhaustive multifactor dimensionality reduction search for epistatic interactions",
    long_about = "Packs case/control genotype tables into a memory-mapped dataset and scores \
                 every combination of variants of a chosen order with cross-validated MDR, \
                 partitioned into blocks across worker threads."
)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a genotype table and a phenotype table into a packed dataset
    #[command(about = "Pack genotype and phenotype tables (outputs: dataset + .variants)")]
    Pack(PackArgs),

    /// Search every combination of variants for the best MDR models
    #[command(about = "Run the exhaustive MDR search (outputs: ranked TSV)")]
    Search(SearchArgs),

    /// Print the contingency table and risk labels of one combination
    #[command(about = "Explain the MDR model of a single combination")]
    Explain(ExplainArgs),

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

#[derive(Args)]
struct PackArgs {
    /// Tab-separated genotype table: `variant<TAB>sample...` header, one row per variant
    #[arg(long, value_name = "PATH")]
    genotypes: PathBuf,

    /// Tab-separated `sample<TAB>label` table; labels are 1/0, case/control or affected/unaffected
    #[arg(long, value_name = "PATH")]
    phenotypes: PathBuf,

    /// Destination of the packed dataset
    #[arg(long, value_name = "PATH")]
    out: PathBuf,

    /// Number of encoder threads; defaults to the number of logical CPUs
    #[arg(long, value_name = "N")]
    threads: Option<usize>,
}

#[derive(Args)]
struct SearchArgs {
    /// Packed dataset produced by `epiblock pack`
    #[arg(value_name = "DATASET")]
    dataset: PathBuf,

    /// TOML file with search parameters; flags given here take precedence
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of variants per combination
    #[arg(long, value_name = "K")]
    order: Option<usize>,

    /// Number of combinations to report
    #[arg(long, value_name = "N")]
    top_k: Option<usize>,

    /// Number of cross-validation folds
    #[arg(long, value_name = "N")]
    folds: Option<usize>,

    /// Number of worker threads
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Shuffle fold membership with this seed
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Target number of combinations per block
    #[arg(long, value_name = "N")]
    block_volume: Option<u64>,

    /// Score used for ranking: balanced or accuracy
    #[arg(long, value_name = "METRIC")]
    metric: Option<ScoringMetric>,

    /// Write the ranking here instead of standard output
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct ExplainArgs {
    /// Packed dataset produced by `epiblock pack`
    #[arg(value_name = "DATASET")]
    dataset: PathBuf,

    /// Comma-separated variant indices or ids, for example `3,17` or `rs12,rs40`
    #[arg(long, value_name = "LIST", value_delimiter = ',', required = true)]
    variants: Vec<String>,
}

impl SearchArgs {
    fn resolve_config(&self) -> Result<SearchConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => SearchConfig::from_toml_file(path)?,
            None => SearchConfig::default(),
        };
        if let Some(order) = self.order {
            config.order = order;
        }
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(folds) = self.folds {
            config.folds = folds;
        }
        if self.workers.is_some() {
            config.workers = self.workers;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.block_volume.is_some() {
            config.block_volume = self.block_volume;
        }
        if let Some(metric) = self.metric {
            config.metric = metric;
        }
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();
    let Cli { log_level, command } = cli;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Warning: Invalid log level '{log_level}' provided. Defaulting to Info.");
        log::LevelFilter::Info
    });
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_micros()
        .init();

    let result = match command {
        Some(Commands::Pack(args)) => run_pack(args),
        Some(Commands::Search(args)) => run_search_command(args),
        Some(Commands::Explain(args)) => run_explain(args),
        Some(Commands::Version) => {
            println!("epiblock {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_pack(args: PackArgs) -> Result<(), Box<dyn Error>> {
    let threads = args.threads.unwrap_or_else(num_cpus::get);
    eprintln!(
        "> Packing {} with phenotypes from {} using {threads} threads.",
        args.genotypes.display(),
        args.phenotypes.display()
    );
    let packed = pack_tables(&args.genotypes, &args.phenotypes, threads)?;
    packed.dataset.save(&args.out)?;
    let ids_path = variant_ids_path(&args.out);
    write_variant_ids(&ids_path, &packed.variant_ids)?;
    eprintln!(
        "> Wrote {} ({} variants, {} samples) and {}.",
        args.out.display(),
        packed.dataset.num_variants(),
        packed.sample_ids.len(),
        ids_path.display()
    );
    Ok(())
}

// Variant ids are optional: a dataset packed by another tool has no sidecar.
fn load_variant_ids(dataset: &Path) -> Result<Option<Vec<String>>, Box<dyn Error>> {
    let path = variant_ids_path(dataset);
    if !path.exists() {
        info!("No variant id file at {}; reporting indices.", path.display());
        return Ok(None);
    }
    Ok(Some(read_variant_ids(&path)?))
}

fn run_search_command(args: SearchArgs) -> Result<(), Box<dyn Error>> {
    let config = args.resolve_config()?;
    let dataset = GenotypeDataset::load(&args.dataset)?;
    let ids = load_variant_ids(&args.dataset)?;
    if let Some(ids) = &ids
        && ids.len() != dataset.num_variants()
    {
        warn!(
            "The variant id file lists {} ids but the dataset has {} variants.",
            ids.len(),
            dataset.num_variants()
        );
    }

    let outcome = run_search(&dataset, &config)?;
    let stats = &outcome.stats;
    eprintln!(
        "> Scored {} of {} combinations in {:.2?} ({} skipped for single-class training folds).",
        stats.combinations_scored,
        stats.total_combinations,
        stats.elapsed,
        stats.combinations_skipped
    );

    match &args.out {
        Some(path) => {
            let file = File::create(path)?;
            write_ranked(BufWriter::new(file), &outcome.ranked, ids.as_deref())?;
            eprintln!("> Ranking written to {}.", path.display());
        }
        None => write_ranked(io::stdout().lock(), &outcome.ranked, ids.as_deref())?,
    }
    Ok(())
}

fn parse_variant(token: &str, ids: Option<&[String]>) -> Result<usize, String> {
    if let Ok(index) = token.parse::<usize>() {
        return Ok(index);
    }
    ids.and_then(|ids| ids.iter().position(|id| id == token))
        .ok_or_else(|| format!("unknown variant '{token}'"))
}

fn run_explain(args: ExplainArgs) -> Result<(), Box<dyn Error>> {
    let dataset = GenotypeDataset::load(&args.dataset)?;
    let ids = load_variant_ids(&args.dataset)?;
    let mut indices = args
        .variants
        .iter()
        .map(|token| parse_variant(token, ids.as_deref()))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(&out_of_range) = indices.iter().find(|&&v| v >= dataset.num_variants()) {
        return Err(format!(
            "variant {out_of_range} is out of range for a dataset of {} variants",
            dataset.num_variants()
        )
        .into());
    }
    indices.sort_unstable();
    let combination = Combination::new(indices)
        .ok_or("the variant list must not repeat a variant")?;

    let table = ContingencyTable::build(&dataset, &combination)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_contingency(&mut out, &combination, &table, ids.as_deref())?;
    out.flush()?;
    Ok(())
}
