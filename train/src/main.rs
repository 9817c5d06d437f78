use std::fs::File;
use std::io::{prelude::*, stderr, stdout, BufReader, BufWriter};
use std::path::PathBuf;

use clap::Parser;
use hmm_tagger::{CorpusReader, Estimator};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(about = "A program to estimate trigram HMM tagger models.")]
struct Args {
    /// A file with one whitespace-separated tag sequence per line
    #[arg(long)]
    tags: PathBuf,

    /// A file with one whitespace-separated token sequence per line, aligned with --tags
    #[arg(long)]
    tokens: PathBuf,

    /// The file to write the model to. The model is written to the standard output if omitted,
    /// and compressed with zstd if the path ends with `.zst`.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Only the first N sentence pairs are used for estimation
    #[arg(long)]
    max_sentences: Option<usize>,

    /// Skip sentence pairs with different numbers of tags and tokens instead of aborting
    #[arg(long)]
    skip_mismatched: bool,

    /// The compression level for zstd
    #[arg(long, default_value = "19")]
    zstd_level: i32,

    /// The number of workers for zstd (0 means multithreaded will be disabled)
    #[arg(long, default_value = "0")]
    zstd_workers: u32,

    /// Print debug messages
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(stderr)
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    eprintln!("Loading dataset...");
    let tags = BufReader::new(File::open(&args.tags)?);
    let tokens = BufReader::new(File::open(&args.tokens)?);
    let mut reader = CorpusReader::new(tags, tokens).skip_mismatched(args.skip_mismatched);

    // The model is only written after the whole corpus has been read, so a corpus error
    // never leaves a partial model behind.
    let mut estimator = Estimator::new();
    let max_sentences = args.max_sentences.unwrap_or(usize::MAX);
    for (i, s) in reader.by_ref().take(max_sentences).enumerate() {
        if i % 10000 == 0 {
            eprint!("# of sentences: {i}\r");
            stderr().flush()?;
        }
        estimator.add_sentence(&s?);
    }
    eprintln!("# of sentences: {}", estimator.n_sentences());
    eprintln!("# of words: {}", estimator.vocabulary_size());
    if reader.n_skipped() != 0 {
        tracing::warn!(
            n_skipped = reader.n_skipped(),
            "skipped sentence pairs with mismatched lengths"
        );
    }

    let model = estimator.estimate();

    match args.model {
        Some(path) if path.extension().map_or(false, |ext| ext == "zst") => {
            eprintln!("Saving model file...");
            let mut f = zstd::Encoder::new(File::create(path)?, args.zstd_level)?;
            f.multithread(args.zstd_workers)?;
            model.write(&mut f)?;
            f.finish()?;
        }
        Some(path) => {
            eprintln!("Saving model file...");
            let mut f = BufWriter::new(File::create(path)?);
            model.write(&mut f)?;
            f.flush()?;
        }
        None => {
            let out = stdout();
            let mut f = BufWriter::new(out.lock());
            model.write(&mut f)?;
            f.flush()?;
        }
    }

    Ok(())
}
