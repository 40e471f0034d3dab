use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use log::info;

use multiscale_transport::{Coupling, MultiscaleTransport, PointSet, Result, TransportConfig};

/// Multiscale optimal transport between two weighted point sets.
///
/// Point sets are JSON files `{"points": [[x, y, ..], ..], "masses": [..]}`, masses
/// are optional. The coupling at the finest scale is written as
/// `source, target, weight` lines.
#[derive(Parser, Debug)]
#[clap(name = "mstransport", version, about)]
struct Args {
    /// Source point set
    source: PathBuf,
    /// Target point set
    target: PathBuf,
    /// JSON transport configuration
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Coupling output file, stdout if omitted
    #[clap(short, long)]
    output: Option<PathBuf>,
    /// Overrides the cost exponent of the configuration
    #[clap(short)]
    p: Option<f64>,
    /// Cuts both point set hierarchies off after this many levels
    #[clap(long)]
    max_scales: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TransportConfig::load(path)?,
        None => TransportConfig::default(),
    };
    if let Some(p) = args.p {
        config.options.p = p;
    }

    let mut source = PointSet::load(&args.source)?.hierarchy(args.max_scales)?;
    let mut target = PointSet::load(&args.target)?.hierarchy(args.max_scales)?;
    info!(
        "source: {} levels, {} points; target: {} levels, {} points",
        source.n_scales(),
        source.finest().len(),
        target.n_scales(),
        target.finest().len()
    );

    let start = Instant::now();
    let mut transport = config.build()?;
    let plans = transport.solve(&mut source, &mut target, &config.options)?;
    let coupling = match plans.last() {
        Some(finest) => {
            info!("transport cost {} in {:?}", finest.cost, start.elapsed());
            Coupling::from_plan(finest)
        }
        None => Coupling::default(),
    };

    match &args.output {
        Some(path) => coupling.write(BufWriter::new(File::create(path)?)),
        None => coupling.write(io::stdout().lock()),
    }
}
