use hashbrown::{HashMap, HashSet};

use crate::model::{Model, TagId, WordId, FINAL_ID, FINAL_TAG, INIT_ID, INIT_TAG, OOV_SYMBOL};
use crate::sentence::TaggedSentence;
use crate::utils::Indexer;

/// Maximum-likelihood estimator of trigram HMM parameters.
///
/// The first occurrence of every distinct token in the corpus is counted as [`OOV_SYMBOL`],
/// and every later occurrence as the token itself. This gives each tag an emission
/// probability for unknown tokens that is proportional to how often it introduces new
/// vocabulary.
///
/// # Examples
///
/// ```
/// use hmm_tagger::{Estimator, TaggedSentence};
///
/// let mut estimator = Estimator::new();
/// estimator.add_sentence(&TaggedSentence::from_aligned("DT NN", "the dog").unwrap());
/// estimator.add_sentence(&TaggedSentence::from_aligned("DT NN", "the cat").unwrap());
/// let model = estimator.estimate();
///
/// assert_eq!(Some(0.5), model.emission("DT", "the"));
/// assert_eq!(Some(1.0), model.emission("NN", "OOV"));
/// assert_eq!(Some(1.0), model.transition("DT", "NN", "final"));
/// ```
pub struct Estimator {
    tags: Indexer<String>,
    words: Indexer<String>,
    vocabulary: HashSet<String>,
    transition_counts: HashMap<(TagId, TagId, TagId), u64>,
    context_totals: HashMap<(TagId, TagId), u64>,
    emission_counts: HashMap<(TagId, WordId), u64>,
    emission_totals: HashMap<TagId, u64>,
    n_sentences: usize,
}

impl Default for Estimator {
    fn default() -> Self {
        Self::new()
    }
}

impl Estimator {
    /// Creates a new estimator with no observations.
    pub fn new() -> Self {
        let mut tags = Indexer::new();
        tags.get_or_insert(INIT_TAG);
        tags.get_or_insert(FINAL_TAG);
        Self {
            tags,
            words: Indexer::new(),
            vocabulary: HashSet::new(),
            transition_counts: HashMap::new(),
            context_totals: HashMap::new(),
            emission_counts: HashMap::new(),
            emission_totals: HashMap::new(),
            n_sentences: 0,
        }
    }

    fn count_transition(&mut self, qqq: TagId, qq: TagId, q: TagId) {
        *self.transition_counts.entry((qqq, qq, q)).or_insert(0) += 1;
        *self.context_totals.entry((qqq, qq)).or_insert(0) += 1;
    }

    fn count_emission(&mut self, q: TagId, w: WordId) {
        *self.emission_counts.entry((q, w)).or_insert(0) += 1;
        *self.emission_totals.entry(q).or_insert(0) += 1;
    }

    /// Accumulates the counts of a sentence. Empty sentences are ignored.
    ///
    /// # Arguments
    ///
    /// * `sentence` - A sentence with gold tags.
    pub fn add_sentence(&mut self, sentence: &TaggedSentence) {
        if sentence.is_empty() {
            return;
        }
        let mut prevprev = INIT_ID;
        let mut prev = INIT_ID;
        for (token, tag) in sentence.iter_pairs() {
            let q = self.tags.get_or_insert(tag);
            let w = if self.vocabulary.contains(token) {
                self.words.get_or_insert(token)
            } else {
                self.vocabulary.insert(token.to_string());
                self.words.get_or_insert(OOV_SYMBOL)
            };
            self.count_transition(prevprev, prev, q);
            self.count_emission(q, w);
            prevprev = prev;
            prev = q;
        }
        // Closes the trigram window with the same keys the decoder looks up:
        // (t[n-1], t[n], final) and then (t[n], final, final).
        self.count_transition(prevprev, prev, FINAL_ID);
        self.count_transition(prev, FINAL_ID, FINAL_ID);
        self.n_sentences += 1;
    }

    /// Number of sentences counted so far.
    pub fn n_sentences(&self) -> usize {
        self.n_sentences
    }

    /// Number of distinct tokens observed so far.
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    /// Normalizes the accumulated counts into conditional probabilities.
    ///
    /// Contexts that were never observed produce no records.
    pub fn estimate(&self) -> Model {
        let mut model = Model::new();
        model.tags = self.tags.clone();
        model.words = self.words.clone();
        for (&(qqq, qq, q), &count) in &self.transition_counts {
            let total = self.context_totals[&(qqq, qq)];
            model
                .transitions
                .insert((qqq, qq, q), count as f64 / total as f64);
        }
        for (&(q, w), &count) in &self.emission_counts {
            let total = self.emission_totals[&q];
            model.emissions.insert((q, w), count as f64 / total as f64);
        }
        tracing::info!(
            n_sentences = self.n_sentences,
            vocabulary_size = self.vocabulary_size(),
            n_tags = model.n_tags(),
            n_transitions = model.n_transitions(),
            n_emissions = model.n_emissions(),
            "parameters estimated"
        );
        model
    }
}
