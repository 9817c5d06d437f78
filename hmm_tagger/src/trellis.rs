use crate::model::TagId;

/// Dynamic programming table of a trigram Viterbi search.
///
/// A cell `(i, prev, cur)` keeps the best log-probability of any path whose tags at
/// positions `i - 1` and `i` are `prev` and `cur`, together with the tag at position `i - 2`
/// on that path. Cells are laid out as a dense `positions × tags × tags` array.
pub struct Trellis {
    n_tags: usize,
    scores: Vec<f64>,
    backpointers: Vec<TagId>,
}

impl Trellis {
    /// Creates a table in which every cell is unreachable.
    ///
    /// Returns `None` if the table cannot be allocated.
    pub fn new(n_positions: usize, n_tags: usize) -> Option<Self> {
        let n_cells = n_positions.checked_mul(n_tags)?.checked_mul(n_tags)?;
        let mut scores = Vec::new();
        scores.try_reserve_exact(n_cells).ok()?;
        scores.resize(n_cells, f64::NEG_INFINITY);
        let mut backpointers = Vec::new();
        backpointers.try_reserve_exact(n_cells).ok()?;
        backpointers.resize(n_cells, 0);
        Some(Self {
            n_tags,
            scores,
            backpointers,
        })
    }

    #[inline(always)]
    fn index(&self, i: usize, prev: TagId, cur: TagId) -> usize {
        (i * self.n_tags + prev) * self.n_tags + cur
    }

    /// Gets the best score of a cell. Unreachable cells have `-inf`.
    #[inline(always)]
    pub fn score(&self, i: usize, prev: TagId, cur: TagId) -> f64 {
        self.scores[self.index(i, prev, cur)]
    }

    #[inline(always)]
    pub fn backpointer(&self, i: usize, prev: TagId, cur: TagId) -> TagId {
        self.backpointers[self.index(i, prev, cur)]
    }

    /// Stores `score` if it beats the current value of the cell.
    ///
    /// Ties keep the earlier candidate.
    #[inline(always)]
    pub fn relax(&mut self, i: usize, prev: TagId, cur: TagId, score: f64, prevprev: TagId) {
        let idx = self.index(i, prev, cur);
        if score > self.scores[idx] {
            self.scores[idx] = score;
            self.backpointers[idx] = prevprev;
        }
    }

    /// Iterates reachable cells at position `i` as `(prev, cur, score)`.
    pub fn reachable(&self, i: usize) -> impl Iterator<Item = (TagId, TagId, f64)> + '_ {
        let n_tags = self.n_tags;
        let start = i * n_tags * n_tags;
        self.scores[start..start + n_tags * n_tags]
            .iter()
            .enumerate()
            .filter(|(_, score)| score.is_finite())
            .map(move |(j, &score)| (j / n_tags, j % n_tags, score))
    }
}
