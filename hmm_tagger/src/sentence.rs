use std::io::BufRead;

use crate::errors::{HmmError, Result};

/// Splits a line into whitespace-separated tokens.
///
/// # Examples
///
/// ```
/// use hmm_tagger::tokenize;
///
/// assert_eq!(vec!["the", "dog"], tokenize(" the  dog\t"));
/// assert!(tokenize("").is_empty());
/// ```
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// Sentence with a gold tag attached to every token.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TaggedSentence {
    pub(crate) tokens: Vec<String>,
    pub(crate) tags: Vec<String>,
}

impl TaggedSentence {
    /// Creates a new [`TaggedSentence`] from a tag line and a token line.
    ///
    /// # Arguments
    ///
    /// * `tag_line` - Whitespace-separated tags.
    /// * `token_line` - Whitespace-separated tokens aligned with `tag_line`.
    ///
    /// # Errors
    ///
    /// If the two lines contain different numbers of fields, an error variant will be returned.
    /// The reported line number is 0; [`CorpusReader`] fills in the real one.
    ///
    /// # Examples
    ///
    /// ```
    /// use hmm_tagger::TaggedSentence;
    ///
    /// let s = TaggedSentence::from_aligned("DT NN", "the dog").unwrap();
    /// assert_eq!(2, s.len());
    ///
    /// assert!(TaggedSentence::from_aligned("DT", "the dog").is_err());
    /// ```
    pub fn from_aligned(tag_line: &str, token_line: &str) -> Result<Self> {
        Self::from_aligned_at(tag_line, token_line, 0)
    }

    fn from_aligned_at(tag_line: &str, token_line: &str, line: usize) -> Result<Self> {
        let tags: Vec<String> = tag_line.split_whitespace().map(String::from).collect();
        let tokens: Vec<String> = token_line.split_whitespace().map(String::from).collect();
        if tags.len() != tokens.len() {
            return Err(HmmError::invalid_corpus(
                line,
                format!(
                    "{} tags but {} tokens in an aligned sentence pair",
                    tags.len(),
                    tokens.len()
                ),
            ));
        }
        Ok(Self { tokens, tags })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterates `(token, tag)` pairs from left to right.
    pub fn iter_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tokens
            .iter()
            .zip(&self.tags)
            .map(|(token, tag)| (token.as_str(), tag.as_str()))
    }
}

/// Reads line-aligned tag and token streams as a sequence of [`TaggedSentence`].
///
/// Blank line pairs are skipped. When one stream ends before the other, the reader yields
/// an error and stops.
pub struct CorpusReader<T, W> {
    tags: std::io::Lines<T>,
    tokens: std::io::Lines<W>,
    line: usize,
    skip_mismatched: bool,
    n_skipped: usize,
    finished: bool,
}

impl<T, W> CorpusReader<T, W>
where
    T: BufRead,
    W: BufRead,
{
    /// Creates a new reader.
    ///
    /// # Arguments
    ///
    /// * `tags` - A stream with one whitespace-separated tag sequence per line.
    /// * `tokens` - A stream with one whitespace-separated token sequence per line.
    pub fn new(tags: T, tokens: W) -> Self {
        Self {
            tags: tags.lines(),
            tokens: tokens.lines(),
            line: 0,
            skip_mismatched: false,
            n_skipped: 0,
            finished: false,
        }
    }

    /// Skips sentence pairs with unequal lengths instead of failing on them.
    pub fn skip_mismatched(mut self, skip: bool) -> Self {
        self.skip_mismatched = skip;
        self
    }

    /// Number of pairs skipped because of a length mismatch.
    pub fn n_skipped(&self) -> usize {
        self.n_skipped
    }

    fn fail(&mut self, e: HmmError) -> Option<Result<TaggedSentence>> {
        self.finished = true;
        Some(Err(e))
    }
}

impl<T, W> Iterator for CorpusReader<T, W>
where
    T: BufRead,
    W: BufRead,
{
    type Item = Result<TaggedSentence>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            self.line += 1;
            let (tag_line, token_line) = match (self.tags.next(), self.tokens.next()) {
                (None, None) => {
                    self.finished = true;
                    return None;
                }
                (Some(Err(e)), _) | (_, Some(Err(e))) => return self.fail(e.into()),
                (Some(_), None) => {
                    let e = HmmError::invalid_corpus(self.line, "token stream ended early");
                    return self.fail(e);
                }
                (None, Some(_)) => {
                    let e = HmmError::invalid_corpus(self.line, "tag stream ended early");
                    return self.fail(e);
                }
                (Some(Ok(tag_line)), Some(Ok(token_line))) => (tag_line, token_line),
            };
            if tag_line.trim().is_empty() && token_line.trim().is_empty() {
                continue;
            }
            match TaggedSentence::from_aligned_at(&tag_line, &token_line, self.line) {
                Ok(s) => return Some(Ok(s)),
                Err(e) if self.skip_mismatched => {
                    tracing::warn!(line = self.line, "skipping sentence pair: {e}");
                    self.n_skipped += 1;
                }
                Err(e) => return self.fail(e),
            }
        }
        None
    }
}

/// Tag sequence recovered for one sentence.
#[derive(Debug, PartialEq, Clone)]
pub struct Tagging {
    pub(crate) tags: Vec<String>,
    pub(crate) log_prob: f64,
}

impl Tagging {
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Natural-log probability of the best path, including the closing transitions.
    pub fn log_prob(&self) -> f64 {
        self.log_prob
    }

    /// Joins the tags with single spaces.
    ///
    /// # Examples
    ///
    /// ```
    /// use hmm_tagger::{Decoder, Model};
    ///
    /// let text = "\
    /// trans init init N 1.0
    /// trans init N final 1.0
    /// trans N final final 1.0
    /// emit N dog 1.0
    /// ";
    /// let model = Model::read(text.as_bytes()).unwrap();
    /// let decoder = Decoder::new(&model);
    /// let tagging = decoder.decode(&["dog"]).unwrap();
    /// assert_eq!("N", tagging.to_tagged_string());
    /// ```
    pub fn to_tagged_string(&self) -> String {
        self.tags.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_aligned() {
        let s = TaggedSentence::from_aligned("DT  NN VBZ", "the dog barks\n").unwrap();

        assert_eq!(&["the", "dog", "barks"], s.tokens());
        assert_eq!(&["DT", "NN", "VBZ"], s.tags());
        assert_eq!(
            vec![("the", "DT"), ("dog", "NN"), ("barks", "VBZ")],
            s.iter_pairs().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_from_aligned_mismatch() {
        let s = TaggedSentence::from_aligned("DT NN", "the dog barks");

        assert!(s.is_err());
        assert_eq!(
            "InvalidCorpusError: line 0: 2 tags but 3 tokens in an aligned sentence pair",
            &s.err().unwrap().to_string()
        );
    }

    #[test]
    fn test_corpus_reader() {
        let tags = "DT NN\n\nPRP VBP\n";
        let tokens = "the dog\n\nI run\n";
        let sents: Vec<_> = CorpusReader::new(tags.as_bytes(), tokens.as_bytes())
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(2, sents.len());
        assert_eq!(&["I", "run"], sents[1].tokens());
    }

    #[test]
    fn test_corpus_reader_mismatch_aborts() {
        let tags = "DT NN\nPRP\nNN\n";
        let tokens = "the dog\nI run\ncat\n";
        let mut rdr = CorpusReader::new(tags.as_bytes(), tokens.as_bytes());

        assert!(rdr.next().unwrap().is_ok());
        match rdr.next() {
            Some(Err(HmmError::InvalidCorpus(e))) => assert_eq!(2, e.line()),
            _ => panic!("expected a corpus error"),
        }
        assert!(rdr.next().is_none());
    }

    #[test]
    fn test_corpus_reader_mismatch_skipped() {
        let tags = "DT NN\nPRP\nNN\n";
        let tokens = "the dog\nI run\ncat\n";
        let mut rdr = CorpusReader::new(tags.as_bytes(), tokens.as_bytes()).skip_mismatched(true);
        let sents: Vec<_> = rdr.by_ref().collect::<Result<_>>().unwrap();

        assert_eq!(2, sents.len());
        assert_eq!(&["cat"], sents[1].tokens());
        assert_eq!(1, rdr.n_skipped());
    }

    #[test]
    fn test_corpus_reader_uneven_streams() {
        let tags = "DT NN\nNN\n";
        let tokens = "the dog\n";
        let result: Result<Vec<_>> =
            CorpusReader::new(tags.as_bytes(), tokens.as_bytes()).collect();

        assert_eq!(
            "InvalidCorpusError: line 2: token stream ended early",
            &result.err().unwrap().to_string()
        );
    }

    #[test]
    fn test_tagging_to_tagged_string() {
        let tagging = Tagging {
            tags: vec!["DT".to_string(), "NN".to_string()],
            log_prob: -1.5,
        };

        assert_eq!("DT NN", tagging.to_tagged_string());
        assert_eq!(-1.5, tagging.log_prob());
    }
}
