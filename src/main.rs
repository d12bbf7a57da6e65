#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]

//! Command line scoring of variant effects with a motif model.
mod cli;

use log::{error, info, warn};
use rustyism::aggregate::write_failures;
use rustyism::genomic::{fasta_from_path, regions_from_path};
use rustyism::variant::read_vcf_variants;
use rustyism::{run_pipeline, MotifModel, ReferenceWindowBuilder, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use structopt::StructOpt;

fn main() -> Result<()> {
    let opt = cli::RustyIsm::from_args();
    opt.set_logging();
    opt.check_inputs()?;

    let config = opt.run_config()?;
    let model_config = opt.model_config();
    model_config.validate()?;

    let model = MotifModel::from_path(&model_config.weights)?;
    let sequences = fasta_from_path(&opt.reference)?;
    info!("Loaded {} reference sequences", sequences.len());
    let builder = ReferenceWindowBuilder::new(sequences, config.anchor);

    let regions = match opt.regions {
        Some(ref path) => Some(regions_from_path(path)?),
        None => None,
    };
    let variants = read_vcf_variants(&opt.vcf, regions.as_ref())?;

    let report = run_pipeline(&config, &variants, &builder, &model)?;

    let mut out: Box<dyn Write> = match opt.output {
        Some(ref path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    report.table.write_tsv(&mut out)?;
    out.flush()?;

    match opt.failures {
        Some(ref path) => {
            let mut failures_out = BufWriter::new(File::create(path)?);
            write_failures(&report.failures, &mut failures_out)?;
            failures_out.flush()?;
        }
        None => {
            for failure in &report.failures {
                warn!(
                    "{}\t{}\t{}",
                    failure.variant_id, failure.kind, failure.message
                );
            }
        }
    }

    if report.is_failed() {
        error!(
            "None of the {} variants could be scored",
            report.failures.len()
        );
        std::process::exit(1)
    }
    Ok(())
}
