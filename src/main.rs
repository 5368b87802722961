use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use fragcorrect::overlap::{load_binary_overlaps, load_text_overlaps};
use fragcorrect::store::FastaStore;
use fragcorrect::{CorrectConfig, Corrector};

/// Make corrections to fragment sequences based on overlaps.
///
/// Reads come from a FASTA read store; `<LO>` and `<HI>` bound the range of
/// reads to correct (`HI` = 0 means through the last read). Exactly one of
/// `-F` or `-S` supplies the overlaps.
#[derive(Parser, Debug)]
#[command(name = "fragcorrect")]
struct Cli {
    /// Set keep flags on read ends covered by fewer than this many overlaps.
    #[arg(short = 'd', long = "degree", default_value_t = 2)]
    degree_threshold: u16,

    /// Try to extend the clear range of reads over confirmed bases.
    #[arg(short = 'e', long = "extend")]
    extend: bool,

    /// Sorted text overlap file.
    #[arg(short = 'F', long = "olap-file", conflicts_with = "olap_store")]
    olap_file: Option<PathBuf>,

    /// Binary overlap store file.
    #[arg(short = 'S', long = "olap-store")]
    olap_store: Option<PathBuf>,

    /// Output correction file.
    #[arg(short = 'o', long = "output", default_value = "frag.cor")]
    output: PathBuf,

    /// Minimum exact-match region that confirms base pairs.
    #[arg(short = 'k', long = "kmer-len", default_value_t = 9)]
    kmer_len: usize,

    /// Exact-match bases that must surround an error for it to vote.
    #[arg(short = 'V', long = "vote-qualify-len", default_value_t = 9)]
    vote_qualify_len: usize,

    /// Length at the ends of an exact match excluded from confirmation.
    #[arg(short = 'x', long = "end-exclude-len", default_value_t = 3)]
    end_exclude_len: usize,

    /// Do not use haplotype counts to suppress corrections.
    #[arg(short = 'p', long = "no-haplo")]
    no_haplo: bool,

    /// Worker threads (0 = single-threaded).
    #[arg(short = 't', long = "threads", default_value_t = 2)]
    threads: usize,

    /// Verbosity (0 = info, 1 = debug, 2+ = trace).
    #[arg(short = 'v', long = "verbose", default_value_t = 0)]
    verbose: u8,

    /// FASTA read store.
    store: PathBuf,

    /// First read iid to correct.
    lo: u32,

    /// Last read iid to correct (0 = through the last read).
    hi: u32,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let store = FastaStore::from_path(&cli.store)
        .with_context(|| format!("failed to load read store {}", cli.store.display()))?;

    let mut config = CorrectConfig::for_range(cli.lo, cli.hi);
    config.degree_threshold = cli.degree_threshold;
    config.kmer_len = cli.kmer_len;
    config.vote_qualify_len = cli.vote_qualify_len;
    config.end_exclude_len = cli.end_exclude_len;
    config.extend_fragments = cli.extend;
    config.use_haplo_ct = !cli.no_haplo;
    config.num_threads = cli.threads;

    let corrector = Corrector::new(store, config).context("invalid configuration")?;
    let (lo, hi) = (corrector.config().lo_iid, corrector.config().hi_iid);

    let overlaps = match (&cli.olap_file, &cli.olap_store) {
        (Some(path), None) => {
            let overlaps = load_text_overlaps(path, lo, hi)
                .with_context(|| format!("failed to read overlaps from {}", path.display()))?;
            if overlaps.is_empty() {
                bail!("no overlaps read, nothing to do");
            }
            overlaps
        }
        (None, Some(path)) => load_binary_overlaps(path, lo, hi)
            .with_context(|| format!("failed to read overlap store {}", path.display()))?,
        _ => bail!("exactly one of -F or -S is required"),
    };
    info!("{} overlaps loaded", overlaps.len());

    let out_file = File::create(&cli.output)
        .with_context(|| format!("failed to create {}", cli.output.display()))?;
    let mut out = BufWriter::new(out_file);

    let summary = corrector
        .run(overlaps, &mut out)
        .context("correction failed")?;

    info!(
        "corrected {} reads from {} overlaps ({} failed their error budget)",
        summary.num_reads, summary.num_olaps, summary.failed_olaps
    );

    Ok(())
}
