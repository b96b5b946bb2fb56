//! Persistent collections for per-path state.
//!
//! Cloning either collection is O(1). Updates copy only what they touch, so
//! a forked path never copies what it shares with its siblings.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

#[derive(Debug)]
struct Link<T> {
    value: T,
    next: Option<Arc<Link<T>>>,
}

/// Append-only stack of values, newest first.
#[derive(Debug)]
pub struct Chain<T> {
    head: Option<Arc<Link<T>>>,
    len: usize,
}

impl<T> Clone for Chain<T> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self { head: None, len: 0 }
    }
}

impl<T> Chain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn push(&mut self, value: T) {
        let next = self.head.take();

        self.head = Some(Arc::new(Link { value, next }));
        self.len += 1;
    }

    pub fn peek(&self) -> Option<&T> {
        self.head.as_ref().map(|l| &l.value)
    }

    /// Values from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        std::iter::successors(self.head.as_deref(), |l| l.next.as_deref()).map(|l| &l.value)
    }
}

impl<T: Clone> Chain<T> {
    /// Removes the newest value. Shared links are copied, unique ones are moved.
    pub fn pop(&mut self) -> Option<T> {
        let link = self.head.take()?;
        self.len -= 1;

        match Arc::try_unwrap(link) {
            Ok(mut link) => {
                self.head = link.next.take();
                Some(link.value)
            }
            Err(shared) => {
                self.head = shared.next.clone();
                Some(shared.value.clone())
            }
        }
    }

    /// Values from oldest to newest.
    pub fn to_vec(&self) -> Vec<T> {
        let mut values = self.iter().cloned().collect::<Vec<_>>();
        values.reverse();
        values
    }
}

// long chains would otherwise be dropped recursively
impl<T> Drop for Chain<T> {
    fn drop(&mut self) {
        let mut head = self.head.take();

        while let Some(link) = head {
            match Arc::try_unwrap(link) {
                Ok(mut link) => head = link.next.take(),
                Err(_) => break,
            }
        }
    }
}

const BITS: u32 = 4;
const WIDTH: usize = 1 << BITS;
const MASK: u64 = (WIDTH - 1) as u64;

#[derive(Debug)]
enum Node<K, V> {
    Branch([Option<Arc<Node<K, V>>>; WIDTH]),
    /// Entries whose keys share the full hash.
    Leaf(u64, Vec<(K, V)>),
}

/// Hash trie with path copying. An update copies one node per level.
#[derive(Debug)]
pub struct PersistentMap<K, V> {
    root: Option<Arc<Node<K, V>>>,
    len: usize,
}

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            len: self.len,
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self { root: None, len: 0 }
    }
}

fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn slot(hash: u64, shift: u32) -> usize {
    ((hash >> shift) & MASK) as usize
}

impl<K: Clone + Eq + Hash, V: Clone> PersistentMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = hash_of(key);
        let mut shift = 0;
        let mut node = self.root.as_deref()?;

        loop {
            match node {
                Node::Branch(children) => {
                    node = children[slot(hash, shift)].as_deref()?;
                    shift += BITS;
                }
                Node::Leaf(h, entries) if *h == hash => {
                    return entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
                }
                Node::Leaf(..) => return None,
            }
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        let hash = hash_of(&key);
        let (root, added) = Self::insert_at(self.root.as_ref(), 0, hash, key, value);

        self.root = Some(root);
        if added {
            self.len += 1;
        }
    }

    fn insert_at(
        node: Option<&Arc<Node<K, V>>>,
        shift: u32,
        hash: u64,
        key: K,
        value: V,
    ) -> (Arc<Node<K, V>>, bool) {
        let node = match node {
            Some(node) => node,
            None => return (Arc::new(Node::Leaf(hash, vec![(key, value)])), true),
        };

        match &**node {
            Node::Leaf(h, entries) if *h == hash => {
                let mut entries = entries.clone();

                let added = match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => {
                        entry.1 = value;
                        false
                    }
                    None => {
                        entries.push((key, value));
                        true
                    }
                };

                (Arc::new(Node::Leaf(hash, entries)), added)
            }
            // two distinct hashes differ in some slot below 64 bits
            Node::Leaf(h, _) => {
                let mut children: [Option<Arc<Node<K, V>>>; WIDTH] = Default::default();
                children[slot(*h, shift)] = Some(node.clone());

                let branch = Arc::new(Node::Branch(children));
                Self::insert_at(Some(&branch), shift, hash, key, value)
            }
            Node::Branch(children) => {
                let index = slot(hash, shift);
                let (child, added) =
                    Self::insert_at(children[index].as_ref(), shift + BITS, hash, key, value);

                let mut children = children.clone();
                children[index] = Some(child);

                (Arc::new(Node::Branch(children)), added)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chains_share_their_prefix() {
        let mut parent = Chain::new();
        (0..3).for_each(|i| parent.push(i));

        let mut child = parent.clone();
        assert_eq!(child.pop(), Some(2));
        child.push(7);

        assert_eq!(parent.to_vec(), vec![0, 1, 2]);
        assert_eq!(child.to_vec(), vec![0, 1, 7]);
        assert_eq!(child.peek(), Some(&7));
        assert_eq!(child.len(), 3);
    }

    #[test]
    fn long_chains_drop_without_recursion() {
        let mut chain = Chain::new();
        (0..1_000_000_u64).for_each(|i| chain.push(i));

        drop(chain);
    }

    #[test]
    fn updates_leave_other_versions_untouched() {
        let mut parent = PersistentMap::new();
        (0..200_u64).for_each(|i| parent.insert((0_usize, i), i));

        let mut child = parent.clone();
        child.insert((0, 5), 50);
        child.insert((1, 5), 1);

        assert_eq!(parent.get(&(0, 5)), Some(&5));
        assert_eq!(parent.get(&(1, 5)), None);
        assert_eq!(child.get(&(0, 5)), Some(&50));
        assert_eq!(child.get(&(1, 5)), Some(&1));
        assert_eq!(parent.len(), 200);
        assert_eq!(child.len(), 201);
        assert!((0..200).all(|i| child.get(&(0, i)).is_some()));
    }
}
