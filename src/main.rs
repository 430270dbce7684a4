use clap::Parser;
use tracing::Level;

use cltpf::config::{Cli, Commands};
use cltpf::io::write_json;
use cltpf::pipeline::{run_estimate, run_sample};
use cltpf::Result;

fn main() {
    let args = Cli::parse();
    init_logging(args.verbose);
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Cli) -> Result<()> {
    match args.command {
        Commands::Estimate {
            sampling,
            cells,
            mutation,
            batches,
            confidence,
        } => {
            let report = run_estimate(&sampling, &cells, &mutation, batches, confidence)?;
            write_json(&report, sampling.output.as_deref())
        }

        Commands::Sample { sampling } => {
            let report = run_sample(&sampling)?;
            write_json(&report, sampling.output.as_deref())
        }
    }
}
