use log::LevelFilter;
use rustyism::config::strategy_from_options;
use rustyism::strategy::DiffType;
use rustyism::{Anchor, Error, ModelConfig, Result, RunConfig};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "rustyism",
    about = "Scores variant effects by in-silico mutagenesis with a sequence model"
)]
pub(crate) struct RustyIsm {
    #[structopt(
        short,
        long,
        help = "Reference FASTA, may be gzipped",
        parse(from_os_str)
    )]
    pub(crate) reference: PathBuf,
    #[structopt(short, long, help = "Motif model weights (JSON)", parse(from_os_str))]
    pub(crate) model: PathBuf,
    #[structopt(help = "VCF/BCF with the variants to score", parse(from_os_str))]
    pub(crate) vcf: PathBuf,
    #[structopt(
        short,
        long,
        help = "Write scores here instead of stdout",
        parse(from_os_str)
    )]
    pub(crate) output: Option<PathBuf>,
    #[structopt(long, help = "Write failed variants to this file", parse(from_os_str))]
    pub(crate) failures: Option<PathBuf>,
    #[structopt(
        short = "b",
        long,
        help = "BED regions restricting the scored variants",
        parse(from_os_str)
    )]
    pub(crate) regions: Option<PathBuf>,
    #[structopt(short, long, default_value = "101", help = "Window length in bases")]
    pub(crate) window_length: usize,
    #[structopt(long, default_value = "32", help = "Variants per batch")]
    pub(crate) batch_size: usize,
    #[structopt(
        long,
        default_value = "diff",
        possible_values = &["diff", "log_odds", "ratio", "log_ratio"],
        help = "Score transform of alternate against reference"
    )]
    pub(crate) diff_type: DiffType,
    #[structopt(long, default_value = "ism", possible_values = &["ism", "masking"])]
    pub(crate) strategy: String,
    #[structopt(
        long,
        default_value = "allele",
        possible_values = &["allele", "single"],
        help = "ISM perturbation granularity"
    )]
    pub(crate) perturbation: String,
    #[structopt(
        long,
        default_value = "flank",
        possible_values = &["flank", "window"],
        help = "Positions perturbed around the variant"
    )]
    pub(crate) scope: String,
    #[structopt(long, help = "Bases either side of the allele perturbed [default: 5]")]
    pub(crate) flank: Option<usize>,
    #[structopt(
        long,
        default_value = "mean",
        possible_values = &["mean", "sum", "max_abs"],
        help = "Reduction of perturbed scores"
    )]
    pub(crate) aggregation: String,
    #[structopt(
        long,
        default_value = "forward",
        possible_values = &["forward", "mean", "max_abs"],
        help = "Reverse strand handling"
    )]
    pub(crate) strand: String,
    #[structopt(long, help = "Bases upstream of the variant, centered when absent")]
    pub(crate) anchor_offset: Option<usize>,
    #[structopt(long, help = "Abort on the first variant that cannot be scored")]
    pub(crate) fail_fast: bool,
    #[structopt(short, long, default_value = "1", help = "Batches scored concurrently")]
    pub(crate) threads: usize,
    #[structopt(long, help = "Run timeout in seconds, checked between batches")]
    pub(crate) timeout: Option<u64>,
    #[structopt(short, long, parse(from_occurrences), help = "Verbosity (-v, -vv, -vvv)")]
    pub(crate) verbose: u8,
    #[structopt(short, long, help = "Only log errors")]
    pub(crate) quiet: bool,
}

impl RustyIsm {
    pub(crate) fn set_logging(&self) {
        let level = if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        };
        env_logger::Builder::new().filter_level(level).init();
    }

    /// Fails on input files that do not exist
    pub(crate) fn check_inputs(&self) -> Result<()> {
        let inputs = [
            Some(("reference", &self.reference)),
            Some(("VCF", &self.vcf)),
            self.regions.as_ref().map(|path| ("regions", path)),
        ];
        for (what, path) in inputs.iter().flatten() {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "{} {} does not exist",
                    what,
                    path.display()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn run_config(&self) -> Result<RunConfig> {
        let config = RunConfig {
            window_length: self.window_length,
            batch_size: self.batch_size,
            diff_type: self.diff_type,
            evaluation_strategy: strategy_from_options(
                &self.strategy,
                &self.perturbation,
                &self.scope,
                self.flank,
                &self.aggregation,
                &self.strand,
            )?,
            fail_fast: self.fail_fast,
            num_workers: self.threads,
            anchor: self.anchor_offset.map_or(Anchor::Center, Anchor::Offset),
            timeout: self.timeout.map(Duration::from_secs),
        };
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn model_config(&self) -> ModelConfig {
        ModelConfig {
            weights: self.model.clone(),
        }
    }
}
