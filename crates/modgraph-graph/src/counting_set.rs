use indexmap::IndexMap;
use std::hash::Hash;

/// A set that remembers how many times each item was added.
///
/// `len` counts distinct items; an item disappears once it has been deleted
/// as many times as it was added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountingSet<T: Hash + Eq> {
    counts: IndexMap<T, usize>,
}

impl<T: Hash + Eq> Default for CountingSet<T> {
    fn default() -> Self {
        Self {
            counts: IndexMap::new(),
        }
    }
}

impl<T: Hash + Eq + Clone> CountingSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: T) {
        *self.counts.entry(item).or_insert(0) += 1;
    }

    /// Decrement once; deleting an absent item is a no-op.
    pub fn delete(&mut self, item: &T) {
        if let Some(count) = self.counts.get_mut(item) {
            *count -= 1;
            if *count == 0 {
                self.counts.shift_remove(item);
            }
        }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.counts.contains_key(item)
    }

    pub fn count(&self, item: &T) -> usize {
        self.counts.get(item).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.counts.keys()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

impl<T: Hash + Eq + Clone> FromIterator<T> for CountingSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.add(item);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_survive_until_every_add_is_deleted() {
        let mut set = CountingSet::new();
        set.add("a");
        set.add("a");
        set.add("b");
        assert_eq!(set.len(), 2);
        assert_eq!(set.count(&"a"), 2);

        set.delete(&"a");
        assert!(set.contains(&"a"));
        set.delete(&"a");
        assert!(!set.contains(&"a"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn deleting_absent_items_is_harmless() {
        let mut set: CountingSet<&str> = CountingSet::new();
        set.delete(&"ghost");
        assert!(set.is_empty());
        assert_eq!(set.count(&"ghost"), 0);
    }

    #[test]
    fn collects_from_iterator_in_first_seen_order() {
        let set: CountingSet<&str> = ["x", "y", "x"].into_iter().collect();
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(set.count(&"x"), 2);
    }
}
