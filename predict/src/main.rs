use std::fs::File;
use std::io::{self, prelude::*, stderr, stdin, stdout, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::Parser;
use hmm_tagger::{
    tokenize, DecodeError, Decoder, Model, MultithreadDecoder, Tagging, DEFAULT_STATE_BUDGET,
};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(about = "A program to tag sentences with a trigram HMM.")]
struct Args {
    /// The model file to use when tagging text (decompressed with zstd if it ends with `.zst`)
    #[arg(long)]
    model: PathBuf,

    /// A file with one whitespace-separated sentence per line (the standard input if omitted)
    #[arg(long)]
    input: Option<PathBuf>,

    /// The probability substituted for an emission missing from the model
    #[arg(long, default_value = "1e-7")]
    emission_floor: f64,

    /// The maximum number of trellis cells per sentence (0 means no limit)
    #[arg(long, default_value_t = DEFAULT_STATE_BUDGET)]
    max_states: usize,

    /// The maximum decoding time per sentence in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Number of threads
    #[arg(long, default_value = "0")]
    n_threads: usize,

    /// Number of sentences handed to the threads at once
    #[arg(long, default_value = "1000")]
    mt_chunk_size: usize,

    /// Append the log-probability of each tag sequence after a tab
    #[arg(long)]
    scores: bool,

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

#[derive(Debug, Default, PartialEq, Eq)]
struct Stats {
    n_sentences: usize,
    n_failed: usize,
}

impl Stats {
    fn format_result(&mut self, result: Result<Tagging, DecodeError>, scores: bool) -> String {
        self.n_sentences += 1;
        match result {
            Ok(tagging) if scores && !tagging.tags().is_empty() => {
                format!("{}\t{}", tagging.to_tagged_string(), tagging.log_prob())
            }
            Ok(tagging) => tagging.to_tagged_string(),
            Err(e) => {
                tracing::debug!(line = self.n_sentences, "could not decode: {e}");
                self.n_failed += 1;
                String::new()
            }
        }
    }
}

/// Reads a line without its terminator. Invalid UTF-8 is replaced with U+FFFD, so such
/// tokens are decoded as unknown words.
fn read_line_lossy<R>(rdr: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
    R: BufRead,
{
    buf.clear();
    if rdr.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// Writes exactly one line per input line. Sentences that cannot be decoded yield a blank line.
fn tag_lines<R, W>(decoder: &Decoder, mut input: R, mut out: W, scores: bool) -> io::Result<Stats>
where
    R: BufRead,
    W: Write,
{
    let mut stats = Stats::default();
    let mut buf = vec![];
    while let Some(line) = read_line_lossy(&mut input, &mut buf)? {
        let result = decoder.decode(&tokenize(&line));
        writeln!(out, "{}", stats.format_result(result, scores))?;
    }
    Ok(stats)
}

fn tag_lines_mt<R, W>(
    decoder: &MultithreadDecoder,
    mut input: R,
    mut out: W,
    scores: bool,
    chunk_size: usize,
) -> io::Result<Stats>
where
    R: BufRead,
    W: Write,
{
    let chunk_size = chunk_size.max(1);
    let mut stats = Stats::default();
    let mut buf = vec![];
    loop {
        let mut chunk = Vec::with_capacity(chunk_size);
        while chunk.len() < chunk_size {
            match read_line_lossy(&mut input, &mut buf)? {
                Some(line) => chunk.push(tokenize(&line).into_iter().map(String::from).collect()),
                None => break,
            }
        }
        if chunk.is_empty() {
            break;
        }
        for result in decoder.decode_batch(chunk) {
            writeln!(out, "{}", stats.format_result(result, scores))?;
        }
    }
    Ok(stats)
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
    let decoder = Decoder::new(&model)
        .emission_floor(args.emission_floor)?
        .state_budget((args.max_states != 0).then_some(args.max_states))
        .time_budget(args.timeout_ms.map(Duration::from_millis));
    drop(model);

    let input: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(stdin())),
    };
    let out = stdout();
    let mut out = BufWriter::new(out.lock());

    eprintln!("Start tagging");
    let start = Instant::now();
    let stats = if args.n_threads == 0 {
        tag_lines(&decoder, input, &mut out, args.scores)?
    } else {
        let decoder = decoder.multithreading(args.n_threads);
        tag_lines_mt(&decoder, input, &mut out, args.scores, args.mt_chunk_size)?
    };
    out.flush()?;

    let duration = start.elapsed();
    eprintln!("Elapsed: {} [sec]", duration.as_secs_f64());
    eprintln!(
        "Speed: {} [sentences/sec]",
        stats.n_sentences as f64 / duration.as_secs_f64()
    );
    if stats.n_failed != 0 {
        tracing::warn!(
            n_failed = stats.n_failed,
            n_sentences = stats.n_sentences,
            "some sentences could not be decoded"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOY_MODEL: &str = "\
trans init init N 1.0
trans init N V 1.0
trans N V final 1.0
trans V final final 1.0
emit N the 1.0
emit V dog 1.0
";

    // Decodable, non-UTF-8, undecodable, empty, CRLF, and unterminated lines.
    const INPUT: &[u8] = b"the dog\ncaf\xe9 dog\ndog\n\nthe dog\r\nthe dog";

    fn toy_decoder() -> Decoder {
        Decoder::new(&Model::read(TOY_MODEL.as_bytes()).unwrap())
    }

    #[test]
    fn test_tag_lines_one_line_per_input_line() {
        let mut out = vec![];
        let stats = tag_lines(&toy_decoder(), INPUT, &mut out, false).unwrap();

        assert_eq!("N V\nN V\n\n\nN V\nN V\n", String::from_utf8(out).unwrap());
        assert_eq!(
            Stats {
                n_sentences: 6,
                n_failed: 1
            },
            stats
        );
    }

    #[test]
    fn test_tag_lines_budget_failure_is_blank() {
        let decoder = toy_decoder().state_budget(Some(79));
        let mut out = vec![];
        let stats = tag_lines(&decoder, &b"the dog\nthe\n\n"[..], &mut out, false).unwrap();

        assert_eq!("\n\n\n", String::from_utf8(out).unwrap());
        assert_eq!(2, stats.n_failed);
    }

    #[test]
    fn test_tag_lines_scores() {
        let mut out = vec![];
        tag_lines(&toy_decoder(), &b"the dog\ndog\n\n"[..], &mut out, true).unwrap();

        assert_eq!("N V\t0\n\n\n", String::from_utf8(out).unwrap());
    }

    #[test]
    fn test_tag_lines_empty_input() {
        let mut out = vec![];
        let stats = tag_lines(&toy_decoder(), &b""[..], &mut out, false).unwrap();

        assert!(out.is_empty());
        assert_eq!(Stats::default(), stats);
    }

    #[test]
    fn test_tag_lines_mt_matches_single_thread() {
        let mut expected = vec![];
        tag_lines(&toy_decoder(), INPUT, &mut expected, false).unwrap();

        let decoder = toy_decoder().multithreading(2);
        for chunk_size in [1, 2, 4, 100] {
            let mut out = vec![];
            let stats = tag_lines_mt(&decoder, INPUT, &mut out, false, chunk_size).unwrap();

            assert_eq!(expected, out, "chunk_size = {chunk_size}");
            assert_eq!(6, stats.n_sentences);
            assert_eq!(1, stats.n_failed);
        }
    }
}
