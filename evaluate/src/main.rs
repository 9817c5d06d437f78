use std::fs::File;
use std::io::{stderr, BufReader};
use std::path::{Path, PathBuf};

use clap::Parser;
use hmm_tagger::{CorpusReader, Decoder, Model};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(about = "A program to evaluate the accuracy of a trigram HMM tagger.")]
struct Args {
    /// The model file to use when tagging text (decompressed with zstd if it ends with `.zst`)
    #[arg(long)]
    model: PathBuf,

    /// A file with the gold tag sequences, one sentence per line
    #[arg(long)]
    tags: PathBuf,

    /// A file with the token sequences, aligned with --tags
    #[arg(long)]
    tokens: PathBuf,

    /// The probability substituted for an emission missing from the model
    #[arg(long, default_value = "1e-7")]
    emission_floor: f64,

    /// Print debug messages
    #[arg(long)]
    verbose: bool,
}

fn read_model(path: &Path) -> Result<Model, Box<dyn std::error::Error>> {
    let f = File::open(path)?;
    let model = if path.extension().map_or(false, |ext| ext == "zst") {
        Model::read(BufReader::new(zstd::Decoder::new(f)?))?
    } else {
        Model::read(BufReader::new(f))?
    };
    Ok(model)
}

fn rate(n_errors: usize, n_total: usize) -> f64 {
    if n_total == 0 {
        0.
    } else {
        n_errors as f64 / n_total as f64
    }
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

    eprintln!("Loading model file...");
    let model = read_model(&args.model)?;
    let decoder = Decoder::new(&model).emission_floor(args.emission_floor)?;
    drop(model);

    eprintln!("Start tagging");
    let tags = BufReader::new(File::open(&args.tags)?);
    let tokens = BufReader::new(File::open(&args.tokens)?);

    let mut n_words = 0;
    let mut n_word_errors = 0;
    let mut n_unknown = 0;
    let mut n_unknown_errors = 0;
    let mut n_sentences = 0;
    let mut n_sentence_errors = 0;
    let mut n_failed = 0;
    for s in CorpusReader::new(tags, tokens) {
        let s = s?;
        n_sentences += 1;
        n_words += s.len();
        let unknown = s.tokens().iter().map(|w| !decoder.contains_word(w));
        n_unknown += unknown.clone().filter(|&u| u).count();

        match decoder.decode(s.tokens()) {
            Ok(tagging) => {
                let mut n_errors = 0;
                for ((sys, gold), unknown) in tagging.tags().iter().zip(s.tags()).zip(unknown) {
                    if sys != gold {
                        n_errors += 1;
                        if unknown {
                            n_unknown_errors += 1;
                        }
                    }
                }
                n_word_errors += n_errors;
                if n_errors != 0 {
                    n_sentence_errors += 1;
                }
            }
            Err(e) => {
                // Every token of an undecodable sentence counts as an error.
                tracing::debug!(sentence = n_sentences, "could not decode: {e}");
                n_failed += 1;
                n_word_errors += s.len();
                n_unknown_errors += unknown.filter(|&u| u).count();
                n_sentence_errors += 1;
            }
        }
    }

    println!(
        "Word error rate: {} ({} errors out of {})",
        rate(n_word_errors, n_words),
        n_word_errors,
        n_words
    );
    println!(
        "Sentence error rate: {} ({} errors out of {})",
        rate(n_sentence_errors, n_sentences),
        n_sentence_errors,
        n_sentences
    );
    println!(
        "Unknown word error rate: {} ({} errors out of {})",
        rate(n_unknown_errors, n_unknown),
        n_unknown_errors,
        n_unknown
    );
    println!("Undecodable sentences: {}", n_failed);

    Ok(())
}
