use std::time::{Duration, Instant};

#[cfg(feature = "multithreading")]
use std::sync::Arc;
#[cfg(feature = "multithreading")]
use std::thread;

#[cfg(feature = "multithreading")]
use crossbeam_channel::{Receiver, Sender};

use thiserror::Error;

use crate::errors::{HmmError, Result};
use crate::model::{Model, TagId, WordId, FINAL_ID, INIT_ID, OOV_SYMBOL};
use crate::sentence::Tagging;
use crate::trellis::Trellis;
use crate::utils::Indexer;

/// Default probability used for an absent or zero emission.
pub const DEFAULT_EMISSION_FLOOR: f64 = 1e-7;

/// Default limit on the trellis cells of a single sentence.
///
/// A cell takes 16 bytes, so this caps a sentence at about 1 GiB.
pub const DEFAULT_STATE_BUDGET: usize = 1 << 26;

/// Reason why a sentence could not be decoded.
///
/// These failures only affect the sentence being decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// No path reaches the closing `(final, final)` state.
    #[error("no path reaches the final state")]
    NoPath,

    /// The trellis would need more cells than allowed.
    #[error("the trellis needs {required} cells but the budget is {budget}")]
    StateBudgetExceeded { required: usize, budget: usize },

    /// Decoding took longer than allowed.
    #[error("decoding exceeded the time budget of {0:?}")]
    TimeBudgetExceeded(Duration),

    /// The trellis could not be allocated.
    #[error("failed to allocate a trellis of {positions} positions and {tags} tags")]
    AllocationFailed { positions: usize, tags: usize },
}

/// Trigram Viterbi decoder.
///
/// All probabilities are converted to natural logarithms once, when the decoder is built.
/// The decoder is immutable afterwards and can be shared across threads.
pub struct Decoder {
    tags: Vec<String>,
    words: Indexer<String>,
    oov: Option<WordId>,
    // successors[prevprev * n_tags + prev] lists (current, log P(current | prevprev, prev)).
    successors: Vec<Vec<(TagId, f64)>>,
    // closing[prevprev * n_tags + prev] = log P(final | prevprev, prev).
    closing: Vec<f64>,
    // word_emissions[w] lists (tag, log P(w | tag)).
    word_emissions: Vec<Vec<(TagId, f64)>>,
    emission_floor: f64,
    state_budget: Option<usize>,
    time_budget: Option<Duration>,
}

impl Decoder {
    /// Creates a new decoder.
    ///
    /// # Arguments
    ///
    /// * `model` - A model data.
    ///
    /// # Returns
    ///
    /// A new decoder.
    pub fn new(model: &Model) -> Self {
        let n_tags = model.n_tags();
        let mut successors = vec![vec![]; n_tags * n_tags];
        let mut closing = vec![f64::NEG_INFINITY; n_tags * n_tags];
        let mut transitions: Vec<_> = model.transitions.iter().collect();
        transitions.sort_unstable_by_key(|&(&k, _)| k);
        for (&(qqq, qq, q), &p) in transitions {
            let log_p = p.ln();
            if log_p == f64::NEG_INFINITY {
                continue;
            }
            successors[qqq * n_tags + qq].push((q, log_p));
            if q == FINAL_ID {
                closing[qqq * n_tags + qq] = log_p;
            }
        }

        let mut word_emissions = vec![vec![]; model.n_words()];
        let mut emissions: Vec<_> = model.emissions.iter().collect();
        emissions.sort_unstable_by_key(|&(&k, _)| k);
        for (&(q, w), &p) in emissions {
            // Zero emissions fall back to the floor.
            if p > 0.0 {
                word_emissions[w].push((q, p.ln()));
            }
        }

        Self {
            tags: model.tags().to_vec(),
            words: model.words.clone(),
            oov: model.words.get(OOV_SYMBOL),
            successors,
            closing,
            word_emissions,
            emission_floor: DEFAULT_EMISSION_FLOOR.ln(),
            state_budget: Some(DEFAULT_STATE_BUDGET),
            time_budget: None,
        }
    }

    /// Sets the probability substituted for an absent or zero emission.
    ///
    /// # Errors
    ///
    /// `prob` must be in `(0, 1]`.
    pub fn emission_floor(mut self, prob: f64) -> Result<Self> {
        if !(prob > 0.0 && prob <= 1.0) {
            return Err(HmmError::invalid_argument(
                "prob",
                format!("emission floor must be in (0, 1], got {prob}"),
            ));
        }
        self.emission_floor = prob.ln();
        Ok(self)
    }

    /// Limits the number of trellis cells a single sentence may use.
    ///
    /// The default is [`DEFAULT_STATE_BUDGET`]. `None` removes the limit.
    pub fn state_budget(mut self, budget: Option<usize>) -> Self {
        self.state_budget = budget;
        self
    }

    /// Limits the wall-clock time spent on a single sentence.
    pub fn time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }

    /// Number of tags, including `init` and `final`.
    pub fn n_tags(&self) -> usize {
        self.tags.len()
    }

    /// Checks whether `token` is decoded as itself rather than as the OOV symbol.
    pub fn contains_word(&self, token: &str) -> bool {
        self.words.get(token).is_some()
    }

    // Fills row[q] with log P(word | q), with the silent states excluded.
    fn fill_emission_row(&self, word: &str, row: &mut [f64]) {
        row.fill(self.emission_floor);
        row[INIT_ID] = f64::NEG_INFINITY;
        row[FINAL_ID] = f64::NEG_INFINITY;
        let w = self.words.get(word).or(self.oov);
        if let Some(w) = w {
            for &(q, log_p) in &self.word_emissions[w] {
                if q != INIT_ID && q != FINAL_ID {
                    row[q] = log_p;
                }
            }
        }
    }

    /// Finds the most probable tag sequence of a sentence.
    ///
    /// # Arguments
    ///
    /// * `words` - Tokens of a sentence. Tokens unknown to the model are read as the OOV
    ///   symbol.
    ///
    /// # Errors
    ///
    /// A [`DecodeError`] is returned when no path reaches the final state or a budget is
    /// exceeded. An empty sentence yields an empty tagging.
    ///
    /// # Examples
    ///
    /// ```
    /// use hmm_tagger::{Decoder, Model};
    ///
    /// let text = "\
    /// trans init init N 1.0
    /// trans init N V 1.0
    /// trans N V final 1.0
    /// trans V final final 1.0
    /// emit N the 1.0
    /// emit V dog 1.0
    /// ";
    /// let model = Model::read(text.as_bytes()).unwrap();
    /// let decoder = Decoder::new(&model);
    ///
    /// let tagging = decoder.decode(&["the", "dog"]).unwrap();
    /// assert_eq!(&["N", "V"], tagging.tags());
    /// assert_eq!(0.0, tagging.log_prob());
    /// ```
    pub fn decode<S>(&self, words: &[S]) -> Result<Tagging, DecodeError>
    where
        S: AsRef<str>,
    {
        let n = words.len();
        if n == 0 {
            return Ok(Tagging {
                tags: vec![],
                log_prob: 0.0,
            });
        }

        let n_tags = self.n_tags();
        // Positions 0..=n+2: the start state, n words, and two closing steps.
        let n_positions = n + 3;
        if let Some(budget) = self.state_budget {
            let required = n_positions.saturating_mul(n_tags * n_tags);
            if required > budget {
                return Err(DecodeError::StateBudgetExceeded { required, budget });
            }
        }
        let start = Instant::now();

        let mut trellis =
            Trellis::new(n_positions, n_tags).ok_or(DecodeError::AllocationFailed {
                positions: n_positions,
                tags: n_tags,
            })?;
        trellis.relax(0, INIT_ID, INIT_ID, 0.0, INIT_ID);

        let mut row = vec![f64::NEG_INFINITY; n_tags];
        for (i, word) in words.iter().enumerate().map(|(i, w)| (i + 1, w)) {
            if let Some(budget) = self.time_budget {
                if start.elapsed() >= budget {
                    return Err(DecodeError::TimeBudgetExceeded(budget));
                }
            }
            self.fill_emission_row(word.as_ref(), &mut row);
            for (qqq, qq, score) in trellis.reachable(i - 1).collect::<Vec<_>>() {
                for &(q, log_t) in &self.successors[qqq * n_tags + qq] {
                    let log_e = row[q];
                    if log_e == f64::NEG_INFINITY {
                        continue;
                    }
                    trellis.relax(i, qq, q, score + log_t + log_e, qqq);
                }
            }
        }

        // (t[n-1], t[n]) -> (t[n], final)
        for (qq, q, score) in trellis.reachable(n).collect::<Vec<_>>() {
            let log_t = self.closing[qq * n_tags + q];
            if log_t != f64::NEG_INFINITY {
                trellis.relax(n + 1, q, FINAL_ID, score + log_t, qq);
            }
        }
        // (t[n], final) -> (final, final)
        for q in 0..n_tags {
            let score = trellis.score(n + 1, q, FINAL_ID);
            let log_t = self.closing[q * n_tags + FINAL_ID];
            if score != f64::NEG_INFINITY && log_t != f64::NEG_INFINITY {
                trellis.relax(n + 2, FINAL_ID, FINAL_ID, score + log_t, q);
            }
        }

        let log_prob = trellis.score(n + 2, FINAL_ID, FINAL_ID);
        if log_prob == f64::NEG_INFINITY {
            return Err(DecodeError::NoPath);
        }

        // The backpointer of the cell at position i is the tag at position i - 2.
        let mut tag_ids = Vec::with_capacity(n);
        let mut prev = FINAL_ID;
        let mut cur = FINAL_ID;
        for i in (3..=n + 2).rev() {
            let prevprev = trellis.backpointer(i, prev, cur);
            tag_ids.push(prevprev);
            cur = prev;
            prev = prevprev;
        }
        tag_ids.reverse();

        Ok(Tagging {
            tags: tag_ids.into_iter().map(|q| self.tags[q].clone()).collect(),
            log_prob,
        })
    }

    /// Creates a multithreading decoder. This function is the alias of
    /// [`MultithreadDecoder::new()`].
    ///
    /// # Arguments
    ///
    /// * `n_threads` - The number of threads.
    ///
    /// # Returns
    ///
    /// A multithread decoder.
    #[cfg(feature = "multithreading")]
    #[cfg_attr(docsrs, doc(cfg(feature = "multithreading")))]
    pub fn multithreading(self, n_threads: usize) -> MultithreadDecoder {
        MultithreadDecoder::new(self, n_threads)
    }
}

#[cfg(feature = "multithreading")]
type Batch = Arc<Vec<Vec<String>>>;

/// Decoder for multithreading.
///
/// Sentences of a batch are decoded by a pool of worker threads that share one
/// [`Decoder`]. Results are returned in input order.
#[cfg(feature = "multithreading")]
#[cfg_attr(docsrs, doc(cfg(feature = "multithreading")))]
pub struct MultithreadDecoder {
    decoder: Arc<Decoder>,
    task_tx: Sender<(Batch, usize)>,
    result_rx: Receiver<(usize, Result<Tagging, DecodeError>)>,
}

#[cfg(feature = "multithreading")]
impl MultithreadDecoder {
    /// Creates a multithreading decoder.
    ///
    /// # Arguments
    ///
    /// * `decoder` - A normal decoder.
    /// * `n_threads` - The number of threads.
    ///
    /// # Returns
    ///
    /// A multithread decoder.
    pub fn new(decoder: Decoder, n_threads: usize) -> Self {
        let decoder = Arc::new(decoder);

        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let (task_tx, task_rx) = crossbeam_channel::unbounded::<(Batch, usize)>();
        for _ in 0..n_threads.max(1) {
            let decoder = Arc::clone(&decoder);
            let result_tx = result_tx.clone();
            let task_rx = task_rx.clone();
            thread::spawn(move || {
                for (batch, i) in task_rx {
                    let result = decoder.decode(batch[i].as_slice());
                    std::mem::drop(batch);
                    if result_tx.send((i, result)).is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            decoder,
            task_tx,
            result_rx,
        }
    }

    /// Decodes a batch of tokenized sentences.
    ///
    /// # Arguments
    ///
    /// * `sentences` - Tokenized sentences.
    ///
    /// # Returns
    ///
    /// One result per sentence, in the order of `sentences`.
    pub fn decode_batch(&self, sentences: Vec<Vec<String>>) -> Vec<Result<Tagging, DecodeError>> {
        let batch = Arc::new(sentences);
        let mut results: Vec<Option<Result<Tagging, DecodeError>>> =
            (0..batch.len()).map(|_| None).collect();

        let mut n_pending = 0;
        for i in 0..batch.len() {
            if self.task_tx.send((Arc::clone(&batch), i)).is_err() {
                break;
            }
            n_pending += 1;
        }
        for _ in 0..n_pending {
            match self.result_rx.recv() {
                Ok((i, result)) => results[i] = Some(result),
                Err(_) => break,
            }
        }

        // Sentences the pool could not take are decoded on this thread.
        results
            .into_iter()
            .enumerate()
            .map(|(i, result)| {
                result.unwrap_or_else(|| self.decoder.decode(batch[i].as_slice()))
            })
            .collect()
    }
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

    fn toy_decoder() -> Decoder {
        Decoder::new(&Model::read(TOY_MODEL.as_bytes()).unwrap())
    }

    #[test]
    fn test_decode_toy_model() {
        let decoder = toy_decoder();
        let tagging = decoder.decode(&["the", "dog"]).unwrap();

        assert_eq!(&["N", "V"], tagging.tags());
        assert_eq!(0.0, tagging.log_prob());
        assert_eq!("N V", tagging.to_tagged_string());
    }

    #[test]
    fn test_decode_is_idempotent() {
        let decoder = toy_decoder();
        let words = vec!["the".to_string(), "dog".to_string()];

        assert_eq!(decoder.decode(&words[..]), decoder.decode(&words[..]));
    }

    #[test]
    fn test_decode_empty() {
        let decoder = toy_decoder();
        let words: [&str; 0] = [];
        let tagging = decoder.decode(&words).unwrap();

        assert!(tagging.tags().is_empty());
        assert_eq!("", tagging.to_tagged_string());
    }

    #[test]
    fn test_decode_oov() {
        let text = "\
trans init init N 1.0
trans init N final 1.0
trans N final final 1.0
emit N OOV 0.5
emit N cat 0.5
";
        let decoder = Decoder::new(&Model::read(text.as_bytes()).unwrap());
        assert!(!decoder.contains_word("zebra"));

        let tagging = decoder.decode(&["zebra"]).unwrap();
        assert_eq!(&["N"], tagging.tags());
        assert!(tagging.log_prob().is_finite());
        assert!((tagging.log_prob() - 0.5f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_decode_missing_closing_transition() {
        let text = "\
trans init init N 1.0
trans init N V 1.0
trans V final final 1.0
emit N the 1.0
emit V dog 1.0
";
        let decoder = Decoder::new(&Model::read(text.as_bytes()).unwrap());

        assert_eq!(Err(DecodeError::NoPath), decoder.decode(&["the", "dog"]));
    }

    #[test]
    fn test_decode_missing_doubled_final() {
        let text = "\
trans init init N 1.0
trans init N final 1.0
emit N the 1.0
";
        let decoder = Decoder::new(&Model::read(text.as_bytes()).unwrap());

        assert_eq!(Err(DecodeError::NoPath), decoder.decode(&["the"]));
    }

    #[test]
    fn test_decode_emission_floor() {
        let decoder = toy_decoder();
        let tagging = decoder.decode(&["the", "the"]).unwrap();

        assert_eq!(&["N", "V"], tagging.tags());
        assert!((tagging.log_prob() - 1e-7f64.ln()).abs() < 1e-9);

        let decoder = toy_decoder().emission_floor(1e-3).unwrap();
        let tagging = decoder.decode(&["the", "the"]).unwrap();
        assert!((tagging.log_prob() - 1e-3f64.ln()).abs() < 1e-9);

        assert!(toy_decoder().emission_floor(0.0).is_err());
        assert!(toy_decoder().emission_floor(1.5).is_err());
    }

    #[test]
    fn test_decode_zero_emission_is_smoothed() {
        let text = "\
trans init init N 1.0
trans init N final 1.0
trans N final final 1.0
emit N the 0.0
emit N a 1.0
";
        let decoder = Decoder::new(&Model::read(text.as_bytes()).unwrap());
        let tagging = decoder.decode(&["the"]).unwrap();

        assert_eq!(&["N"], tagging.tags());
        assert!((tagging.log_prob() - 1e-7f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_decode_missing_transition_prunes() {
        // "dog" can only be V, but N -> N is the only transition after N.
        let text = "\
trans init init N 1.0
trans init N N 1.0
trans N N final 1.0
trans N final final 1.0
emit N the 1.0
emit V dog 1.0
";
        let decoder = Decoder::new(&Model::read(text.as_bytes()).unwrap());
        let tagging = decoder.decode(&["the", "dog"]).unwrap();

        assert_eq!(&["N", "N"], tagging.tags());
    }

    #[test]
    fn test_decode_prefers_likely_path() {
        let text = "\
trans init init D 1.0
trans init D N 0.6
trans init D V 0.4
trans D N final 1.0
trans D V final 1.0
trans N final final 1.0
trans V final final 1.0
emit D the 1.0
emit N run 0.2
emit N OOV 0.8
emit V run 0.9
emit V OOV 0.1
";
        let decoder = Decoder::new(&Model::read(text.as_bytes()).unwrap());

        // 0.4 * 0.9 > 0.6 * 0.2
        let tagging = decoder.decode(&["the", "run"]).unwrap();
        assert_eq!(&["D", "V"], tagging.tags());
        assert!((tagging.log_prob() - (0.4f64 * 0.9).ln()).abs() < 1e-9);

        // 0.6 * 0.8 > 0.4 * 0.1
        let tagging = decoder.decode(&["the", "walk"]).unwrap();
        assert_eq!(&["D", "N"], tagging.tags());
    }

    #[test]
    fn test_decode_long_sentence_uses_trigram_context() {
        // After (A, B) the next tag is A, after (B, A) it is B.
        let text = "\
trans init init A 1.0
trans init A B 1.0
trans A B A 0.5
trans A B final 0.5
trans B A B 1.0
trans B final final 1.0
emit A x 0.5
emit B x 0.5
";
        let decoder = Decoder::new(&Model::read(text.as_bytes()).unwrap());
        let tagging = decoder.decode(&["x", "x", "x", "x"]).unwrap();

        assert_eq!(&["A", "B", "A", "B"], tagging.tags());
        assert_eq!(Err(DecodeError::NoPath), decoder.decode(&["x", "x", "x"]));
    }

    #[test]
    fn test_silent_states_never_emit() {
        let text = "\
trans init init N 0.5
trans init init final 0.5
trans init N final 1.0
trans init final final 1.0
trans N final final 1.0
trans final final final 1.0
emit N dog 1e-9
";
        let decoder = Decoder::new(&Model::read(text.as_bytes()).unwrap());
        let tagging = decoder.decode(&["dog"]).unwrap();

        assert_eq!(&["N"], tagging.tags());
    }

    #[test]
    fn test_decode_state_budget() {
        let decoder = toy_decoder().state_budget(Some(79));
        assert_eq!(
            Err(DecodeError::StateBudgetExceeded {
                required: 80,
                budget: 79
            }),
            decoder.decode(&["the", "dog"])
        );

        let decoder = toy_decoder().state_budget(Some(80));
        assert!(decoder.decode(&["the", "dog"]).is_ok());
    }

    #[test]
    fn test_decode_default_state_budget() {
        let mut model = Model::new();
        for i in 0..1000 {
            model
                .add_transition("init", "init", &format!("T{i}"), 0.001)
                .unwrap();
        }
        let decoder = Decoder::new(&model);
        let words = vec!["x"; 64];

        // (64 + 3) * 1002 * 1002 cells
        assert_eq!(
            Err(DecodeError::StateBudgetExceeded {
                required: 67_268_268,
                budget: DEFAULT_STATE_BUDGET
            }),
            decoder.decode(&words[..])
        );
    }

    #[test]
    fn test_decode_time_budget() {
        let decoder = toy_decoder().time_budget(Some(Duration::ZERO));
        assert_eq!(
            Err(DecodeError::TimeBudgetExceeded(Duration::ZERO)),
            decoder.decode(&["the", "dog"])
        );

        let decoder = toy_decoder().time_budget(Some(Duration::from_secs(60)));
        assert!(decoder.decode(&["the", "dog"]).is_ok());
    }

    #[cfg(feature = "train")]
    #[test]
    fn test_decode_estimated_model() {
        use crate::estimator::Estimator;
        use crate::sentence::TaggedSentence;

        let mut estimator = Estimator::new();
        for _ in 0..2 {
            for (tags, tokens) in [("DT NN VBZ", "the dog barks"), ("NNS VBP", "dogs bark")] {
                estimator.add_sentence(&TaggedSentence::from_aligned(tags, tokens).unwrap());
            }
        }
        let decoder = Decoder::new(&estimator.estimate());

        let tagging = decoder.decode(&["the", "dog", "barks"]).unwrap();
        assert_eq!(&["DT", "NN", "VBZ"], tagging.tags());
        let tagging = decoder.decode(&["dogs", "bark"]).unwrap();
        assert_eq!(&["NNS", "VBP"], tagging.tags());
        let tagging = decoder.decode(&["the", "cat", "barks"]).unwrap();
        assert_eq!(&["DT", "NN", "VBZ"], tagging.tags());
    }

    #[cfg(feature = "multithreading")]
    #[test]
    fn test_multithread_decoder_keeps_order() {
        let sentences: Vec<Vec<String>> = ["the dog", "the the", "dog", "", "the dog"]
            .iter()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .collect();
        let expected: Vec<_> = sentences
            .iter()
            .map(|s| toy_decoder().decode(s.as_slice()))
            .collect();

        let decoder = toy_decoder().multithreading(3);
        let results = decoder.decode_batch(sentences.clone());
        assert_eq!(expected, results);
        assert_eq!(Err(DecodeError::NoPath), results[2]);

        let results = decoder.decode_batch(sentences);
        assert_eq!(expected, results);
    }
}
