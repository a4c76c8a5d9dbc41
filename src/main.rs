use std::path::PathBuf;
use std::process::exit;

use clap::Parser;

use vaftree::pipeline;

#[derive(Debug, Parser)]
#[command(name = "vaftree")]
#[command(version)]
#[command(about = "Infers a mutation ancestry tree from multi-sample variant read counts.", long_about = None)]
struct Args {
    /// Read count file: tab-separated, gene_id header row, then one row per
    /// mutation with reference and variant counts for each sample
    #[arg(value_name = "READ_COUNTS")]
    read_counts: Option<PathBuf>,

    /// Clustering parameter, in [0,0.5]
    #[arg(short, long, default_value_t = 0.3)]
    alpha: f64,

    /// Ancestry parameter, in [0.5,1]
    #[arg(short, long, default_value_t = 0.8)]
    beta: f64,

    /// Width of confidence interval, in [0,1]
    #[arg(short, long, default_value_t = 0.01)]
    gamma: f64,

    /// Solver time limit in seconds (disabled when negative)
    #[arg(short, long, default_value_t = -1)]
    time: i64,

    /// Solution output filename (default: STDOUT)
    #[arg(short, long)]
    sol: Option<PathBuf>,

    /// Tree DOT output filename
    #[arg(short, long)]
    dot: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let Some(read_counts) = args.read_counts else {
        eprintln!("Error: missing read count file");
        exit(1);
    };
    if !(0.0..=0.5).contains(&args.alpha) {
        eprintln!("Error: value of alpha should be in [0,0.5]");
        exit(1);
    }
    if !(0.5..=1.0).contains(&args.beta) {
        eprintln!("Error: value of beta should be in [0.5,1]");
        exit(1);
    }
    if !(0.0..=1.0).contains(&args.gamma) {
        eprintln!("Error: value of gamma should be in [0,1]");
        exit(1);
    }

    let result = pipeline::start(
        &read_counts,
        args.alpha,
        args.beta,
        args.gamma,
        args.time,
        args.sol.as_deref(),
        args.dot.as_deref(),
    );
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        exit(1);
    }
}
