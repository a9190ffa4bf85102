/// Maps the position of an item within a run back to its position in the caller's request list.
///
/// Runs built from a contiguous slice of the requests use the `Range` form. Adding an index that
/// breaks contiguity converts the map to the `Dense` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexMap {
    /// Local index `i` maps to `original_start + i`.
    Range {
        /// The original index of local index 0.
        original_start: usize,

        /// The number of mapped indexes.
        len: usize,
    },

    /// Local index `i` maps to the `i`th element.
    Dense(Vec<usize>),
}

impl Default for IndexMap {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexMap {
    /// An empty map.
    pub fn new() -> Self {
        IndexMap::Range {
            original_start: 0,
            len: 0,
        }
    }

    /// A map over the contiguous original indexes `original_start..original_start + len`.
    pub fn range(original_start: usize, len: usize) -> Self {
        IndexMap::Range {
            original_start,
            len,
        }
    }

    /// Maps the next local index to `original`.
    pub fn push(&mut self, original: usize) {
        match self {
            IndexMap::Range {
                original_start,
                len,
            } => {
                if *len == 0 {
                    *original_start = original;
                    *len = 1;
                } else if *original_start + *len == original {
                    *len += 1;
                } else {
                    let mut dense: Vec<usize> = (*original_start..*original_start + *len).collect();
                    dense.push(original);
                    *self = IndexMap::Dense(dense);
                }
            }
            IndexMap::Dense(indexes) => indexes.push(original),
        }
    }

    /// The original index of local index `local`, or `None` if it is out of range.
    pub fn map(&self, local: usize) -> Option<usize> {
        match self {
            IndexMap::Range {
                original_start,
                len,
            } => (local < *len).then(|| original_start + local),
            IndexMap::Dense(indexes) => indexes.get(local).copied(),
        }
    }

    /// The number of mapped indexes.
    pub fn len(&self) -> usize {
        match self {
            IndexMap::Range { len, .. } => *len,
            IndexMap::Dense(indexes) => indexes.len(),
        }
    }

    /// Whether no indexes are mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
