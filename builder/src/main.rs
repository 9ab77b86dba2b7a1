//! Offline database tooling: build `.fsim` files from `.smi` line files,
//! merge existing `.fsim` files into one.

use std::fs::File;
use std::io::{self, BufRead};
use std::path::Path;

use clap::Parser;
use glob::glob;
use kdam::tqdm;
use log::{info, warn};

use fsim::builder::{build_from_lines, BuildReport};
use fsim::data::{HashedFingerprinter, DEFAULT_BITCOUNT};
use fsim::database::{merge, DatabaseWriter, MAX_SHARD_BYTES};
use fsim::error::Error;

// Returns an Iterator to the Reader of the lines of the file.
fn read_lines<P>(filename: P) -> io::Result<io::Lines<io::BufReader<File>>>
where
    P: AsRef<Path>,
{
    let file = File::open(filename)?;
    Ok(io::BufReader::new(file).lines())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Which task to carry out: build or merge
    #[arg(short, long)]
    task: String,

    /// Input files. Glob patterns of .smi files for build, .fsim paths
    /// (in merge order) for merge.
    #[arg(short, long, required = true)]
    input: Vec<String>,

    /// Output .fsim path
    #[arg(short, long)]
    output: String,

    /// Fingerprint width in bits, must match the backend's configuration
    #[arg(long, default_value_t = DEFAULT_BITCOUNT)]
    bit_count: usize,

    /// Skip structural sanitization for speed
    #[arg(long, default_value_t = false)]
    trust_smiles: bool,

    /// Shard rotation cap in bytes
    #[arg(long, default_value_t = MAX_SHARD_BYTES)]
    max_shard_bytes: usize,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let result = match args.task.as_str() {
        "build" => build(&args),
        "merge" => run_merge(&args),
        other => {
            eprintln!("Unknown task: {} (expected build or merge)", other);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("{} failed: {}", args.task, e);
        std::process::exit(1);
    }
}

fn build(args: &Args) -> Result<(), Error> {
    let mut filenames: Vec<String> = Vec::new();
    for pattern in &args.input {
        for entry in glob(pattern).map_err(|e| Error::Config(format!("bad glob {}: {}", pattern, e)))? {
            let path = entry.map_err(|e| Error::Io(e.into_error()))?;
            filenames.push(path.to_string_lossy().into_owned());
        }
    }
    filenames.sort();
    if filenames.is_empty() {
        return Err(Error::Config(format!("no input files match {:?}", args.input)));
    }

    let fingerprinter = HashedFingerprinter::new(args.bit_count)?;
    let mut writer = DatabaseWriter::with_shard_cap(args.bit_count as u32, args.max_shard_bytes);
    let mut totals = BuildReport::default();

    for filename in &filenames {
        info!("processing {}", filename);
        // lines stream straight from disk, never buffered whole
        let report = build_from_lines(
            tqdm!(read_lines(filename)?),
            &fingerprinter,
            args.trust_smiles,
            &mut writer,
        )?;
        if report.dropped > 0 {
            warn!("{}: dropped {} records", filename, report.dropped);
        }
        totals.written += report.written;
        totals.dropped += report.dropped;
    }

    writer.write_to(&args.output)?;
    info!(
        "wrote {} with {} entries ({} dropped)",
        args.output, totals.written, totals.dropped
    );
    println!("{}: {} entries written, {} dropped", args.output, totals.written, totals.dropped);
    Ok(())
}

fn run_merge(args: &Args) -> Result<(), Error> {
    let count = merge(args.input.as_slice(), &args.output)?;
    println!("Writing new database with {} entries.", count);
    Ok(())
}
