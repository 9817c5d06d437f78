use std::io::{BufRead, Write};

use hashbrown::HashMap;

use crate::errors::{HmmError, Result};
use crate::utils::Indexer;

/// Silent start state. Every sentence begins in the context `(init, init)`.
pub const INIT_TAG: &str = "init";

/// Silent stop state. Every sentence ends with `... -> final -> final`.
pub const FINAL_TAG: &str = "final";

/// Symbol that stands in for tokens unknown to the model.
///
/// The text format cannot tell this symbol apart from a real token spelled `OOV`, so such a
/// token shares its counts and probabilities with the symbol.
pub const OOV_SYMBOL: &str = "OOV";

/// Interned tag identifier.
pub type TagId = usize;

/// Interned token identifier.
pub type WordId = usize;

pub(crate) const INIT_ID: TagId = 0;
pub(crate) const FINAL_ID: TagId = 1;

/// Trigram HMM parameters.
///
/// The serialized form is a plain-text table with one record per line:
///
/// ```text
/// trans <prevprev> <prev> <current> <probability>
/// emit <tag> <token> <probability>
/// ```
///
/// The tags `init` and `final` are always part of the tag set, with IDs 0 and 1.
#[derive(Clone, Debug)]
pub struct Model {
    pub(crate) tags: Indexer<String>,
    pub(crate) words: Indexer<String>,
    pub(crate) transitions: HashMap<(TagId, TagId, TagId), f64>,
    pub(crate) emissions: HashMap<(TagId, WordId), f64>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    /// Creates an empty model that only knows the `init` and `final` tags.
    pub fn new() -> Self {
        let mut tags = Indexer::new();
        tags.get_or_insert(INIT_TAG);
        tags.get_or_insert(FINAL_TAG);
        Self {
            tags,
            words: Indexer::new(),
            transitions: HashMap::new(),
            emissions: HashMap::new(),
        }
    }

    /// Creates a model from its text form.
    ///
    /// # Arguments
    ///
    /// * `rdr` - A data source.
    ///
    /// # Errors
    ///
    /// Unknown record kinds, wrong field counts, probabilities outside `[0, 1]`, and
    /// duplicate keys are reported as [`HmmError::InvalidModel`] with the line number.
    /// I/O errors are returned as is.
    pub fn read<R>(rdr: R) -> Result<Self>
    where
        R: BufRead,
    {
        let mut model = Self::new();
        for (i, line) in rdr.lines().enumerate() {
            let line = line?;
            let lineno = i + 1;
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [] => continue,
                ["trans", qqq, qq, q, p] => {
                    let p = parse_probability(p, lineno)?;
                    if !model.try_insert_transition(qqq, qq, q, p) {
                        return Err(HmmError::invalid_model(
                            lineno,
                            format!("duplicate transition ({qqq}, {qq}, {q})"),
                        ));
                    }
                }
                ["emit", q, w, p] => {
                    let p = parse_probability(p, lineno)?;
                    if !model.try_insert_emission(q, w, p) {
                        return Err(HmmError::invalid_model(
                            lineno,
                            format!("duplicate emission ({q}, {w})"),
                        ));
                    }
                }
                ["trans", ..] => {
                    return Err(HmmError::invalid_model(
                        lineno,
                        format!("`trans` takes 4 fields, found {}", fields.len() - 1),
                    ));
                }
                ["emit", ..] => {
                    return Err(HmmError::invalid_model(
                        lineno,
                        format!("`emit` takes 3 fields, found {}", fields.len() - 1),
                    ));
                }
                [kind, ..] => {
                    return Err(HmmError::invalid_model(
                        lineno,
                        format!("unknown record kind `{kind}`"),
                    ));
                }
            }
        }
        tracing::info!(
            n_tags = model.n_tags(),
            n_words = model.n_words(),
            n_transitions = model.n_transitions(),
            n_emissions = model.n_emissions(),
            "model loaded"
        );
        Ok(model)
    }

    /// Exports the model in its text form.
    ///
    /// Transitions are written before emissions, each ordered by interned IDs, so the
    /// output is deterministic.
    ///
    /// # Errors
    ///
    /// When `wtr` generates an error, it will be returned as is.
    pub fn write<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        let tags = self.tags.keys();
        let words = self.words.keys();

        let mut transitions: Vec<_> = self.transitions.iter().collect();
        transitions.sort_unstable_by_key(|&(&k, _)| k);
        for (&(qqq, qq, q), p) in transitions {
            writeln!(wtr, "trans {} {} {} {}", tags[qqq], tags[qq], tags[q], p)?;
        }

        let mut emissions: Vec<_> = self.emissions.iter().collect();
        emissions.sort_unstable_by_key(|&(&k, _)| k);
        for (&(q, w), p) in emissions {
            writeln!(wtr, "emit {} {} {}", tags[q], words[w], p)?;
        }
        Ok(())
    }

    /// Adds a transition probability `P(current | prevprev, prev)`.
    ///
    /// # Errors
    ///
    /// An error is returned when the key already exists or `prob` is not in `[0, 1]`.
    pub fn add_transition(
        &mut self,
        prevprev: &str,
        prev: &str,
        current: &str,
        prob: f64,
    ) -> Result<()> {
        check_probability(prob)?;
        if !self.try_insert_transition(prevprev, prev, current, prob) {
            return Err(HmmError::invalid_argument(
                "current",
                format!("duplicate transition ({prevprev}, {prev}, {current})"),
            ));
        }
        Ok(())
    }

    /// Adds an emission probability `P(token | tag)`.
    ///
    /// # Errors
    ///
    /// An error is returned when the key already exists or `prob` is not in `[0, 1]`.
    pub fn add_emission(&mut self, tag: &str, token: &str, prob: f64) -> Result<()> {
        check_probability(prob)?;
        if !self.try_insert_emission(tag, token, prob) {
            return Err(HmmError::invalid_argument(
                "token",
                format!("duplicate emission ({tag}, {token})"),
            ));
        }
        Ok(())
    }

    pub(crate) fn try_insert_transition(
        &mut self,
        prevprev: &str,
        prev: &str,
        current: &str,
        prob: f64,
    ) -> bool {
        let key = (
            self.tags.get_or_insert(prevprev),
            self.tags.get_or_insert(prev),
            self.tags.get_or_insert(current),
        );
        if self.transitions.contains_key(&key) {
            return false;
        }
        self.transitions.insert(key, prob);
        true
    }

    pub(crate) fn try_insert_emission(&mut self, tag: &str, token: &str, prob: f64) -> bool {
        let key = (self.tags.get_or_insert(tag), self.words.get_or_insert(token));
        if self.emissions.contains_key(&key) {
            return false;
        }
        self.emissions.insert(key, prob);
        true
    }

    /// Number of tags, including `init` and `final`.
    pub fn n_tags(&self) -> usize {
        self.tags.len()
    }

    /// Tag names indexed by [`TagId`].
    pub fn tags(&self) -> &[String] {
        self.tags.keys()
    }

    /// Number of distinct tokens mentioned by emission records.
    pub fn n_words(&self) -> usize {
        self.words.len()
    }

    /// Checks whether `token` was part of the vocabulary when the model was built.
    pub fn contains_word(&self, token: &str) -> bool {
        self.words.get(token).is_some()
    }

    pub fn n_transitions(&self) -> usize {
        self.transitions.len()
    }

    pub fn n_emissions(&self) -> usize {
        self.emissions.len()
    }

    /// Gets `P(current | prevprev, prev)`, or `None` if the record is absent.
    pub fn transition(&self, prevprev: &str, prev: &str, current: &str) -> Option<f64> {
        let key = (
            self.tags.get(prevprev)?,
            self.tags.get(prev)?,
            self.tags.get(current)?,
        );
        self.transitions.get(&key).copied()
    }

    /// Gets `P(token | tag)`, or `None` if the record is absent.
    pub fn emission(&self, tag: &str, token: &str) -> Option<f64> {
        let key = (self.tags.get(tag)?, self.words.get(token)?);
        self.emissions.get(&key).copied()
    }

    /// Iterates all transition records as `(prevprev, prev, current, probability)`.
    pub fn iter_transitions(&self) -> impl Iterator<Item = (&str, &str, &str, f64)> {
        let tags = self.tags.keys();
        self.transitions.iter().map(move |(&(qqq, qq, q), &p)| {
            (tags[qqq].as_str(), tags[qq].as_str(), tags[q].as_str(), p)
        })
    }

    /// Iterates all emission records as `(tag, token, probability)`.
    pub fn iter_emissions(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        let tags = self.tags.keys();
        let words = self.words.keys();
        self.emissions
            .iter()
            .map(move |(&(q, w), &p)| (tags[q].as_str(), words[w].as_str(), p))
    }
}

fn check_probability(prob: f64) -> Result<()> {
    if (0.0..=1.0).contains(&prob) {
        Ok(())
    } else {
        Err(HmmError::invalid_argument(
            "prob",
            format!("{prob} is not a probability"),
        ))
    }
}

fn parse_probability(field: &str, lineno: usize) -> Result<f64> {
    let prob: f64 = field.parse().map_err(|e| {
        HmmError::invalid_model(lineno, format!("cannot parse probability `{field}`: {e}"))
    })?;
    // NaN fails the range check as well.
    if !(0.0..=1.0).contains(&prob) {
        return Err(HmmError::invalid_model(
            lineno,
            format!("probability {prob} is out of [0, 1]"),
        ));
    }
    Ok(prob)
}
