use core::borrow::Borrow;
use core::hash::Hash;

use hashbrown::HashMap;

/// Assigns dense integer IDs to keys in order of first appearance.
#[derive(Clone, Debug, Default)]
pub struct Indexer<K> {
    ids: HashMap<K, usize>,
    keys: Vec<K>,
}

impl<K> Indexer<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            keys: vec![],
        }
    }

    /// Returns the ID of `key`, registering it if it has not been seen.
    pub fn get_or_insert<Q>(&mut self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + ToOwned<Owned = K> + Eq + Hash,
    {
        if let Some(&id) = self.ids.get(key) {
            id
        } else {
            let id = self.keys.len();
            let key = key.to_owned();
            self.keys.push(key.clone());
            self.ids.insert(key, id);
            id
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq + Hash,
    {
        self.ids.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }
}
