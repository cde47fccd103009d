use super::index_trait::IndexRef;
use std::{
    marker::PhantomData,
    ops::{self, Index},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A dense arena. Keys are handed out by [IndexedMap::push] and are never
/// invalidated; entries are removed logically by their owners, not here.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct IndexedMap<K, D>
where
    K: IndexRef,
{
    data: Vec<D>,
    #[cfg_attr(feature = "serde", serde(skip))]
    phantom: PhantomData<K>,
}

impl<K, D> ops::IndexMut<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn index_mut(&mut self, index: K) -> &mut Self::Output {
        &mut self.data[index.index()]
    }
}

impl<K, D> ops::Index<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    type Output = D;

    fn index(&self, index: K) -> &Self::Output {
        &self.data[index.index()]
    }
}

impl<K, D> IndexedMap<K, D>
where
    K: IndexRef,
{
    pub fn with_capacity(size: usize) -> Self {
        Self {
            data: Vec::with_capacity(size),
            phantom: PhantomData,
        }
    }

    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            phantom: PhantomData,
        }
    }

    pub fn get(&self, index: K) -> Option<&D> {
        self.data.get(index.index())
    }

    pub fn get_mut(&mut self, index: K) -> Option<&mut D> {
        self.data.get_mut(index.index())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn push(&mut self, item: D) -> K {
        self.data.push(item);
        K::new(self.data.len() - 1)
    }

    pub fn peek_next_idx(&self) -> K {
        K::new(self.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, index: K) -> bool {
        index.index() < self.data.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &D)> {
        self.data.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut D)> {
        self.data
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (K::new(i), v))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut D> {
        self.data.iter_mut()
    }

    pub fn values(&self) -> impl Iterator<Item = &D> {
        self.data.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + use<K, D> {
        (0..self.data.len()).map(K::new)
    }

    pub fn first(&self) -> Option<&D> {
        self.data.first()
    }
}

impl<T, K> Default for IndexedMap<K, T>
where
    K: IndexRef,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, D> FromIterator<D> for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn from_iter<I: IntoIterator<Item = D>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().collect(),
            phantom: PhantomData,
        }
    }
}

/// A map that associates a value with keys from a primary [IndexedMap]
/// without owning them. Keys never written read back as the default value.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, D>
where
    K: IndexRef,
    D: Clone,
{
    data: Vec<D>,
    phantom: PhantomData<K>,
    default_value: D,
}

// NOTE TO SELF: do not implement IndexMut

impl<K, D> Index<K> for SecondaryMap<K, D>
where
    K: IndexRef,
    D: Clone,
{
    type Output = D;

    fn index(&self, index: K) -> &Self::Output {
        self.get(index)
    }
}

impl<K, D> SecondaryMap<K, D>
where
    K: IndexRef,
    D: Clone,
{
    pub fn new_with_default(default_value: D) -> Self {
        Self {
            data: Default::default(),
            phantom: PhantomData,
            default_value,
        }
    }

    pub fn get(&self, index: K) -> &D {
        self.data.get(index.index()).unwrap_or(&self.default_value)
    }

    pub fn insert(&mut self, index: K, value: D) {
        if index.index() >= self.data.len() {
            self.data
                .resize(index.index() + 1, self.default_value.clone());
        }
        self.data[index.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &D)> {
        self.data.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }
}

impl<K, D> SecondaryMap<K, D>
where
    K: IndexRef,
    D: Clone + Default,
{
    pub fn new() -> Self {
        Self::new_with_default(D::default())
    }
}

impl<K, D> Default for SecondaryMap<K, D>
where
    K: IndexRef,
    D: Clone + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_index;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct TestIdx(u32);
    impl_index!(TestIdx);

    #[test]
    fn keys_convert_from_positions() {
        assert_eq!(TestIdx::from(5usize), TestIdx(5));
        assert_eq!(TestIdx::from(5u32), TestIdx::new(5));
        assert_eq!(TestIdx::new(9).index(), 9);
    }

    #[test]
    fn secondary_map_defaults() {
        let mut map: SecondaryMap<TestIdx, Option<u32>> = SecondaryMap::new();
        map.insert(TestIdx(3), Some(7));
        assert_eq!(map[TestIdx(0)], None);
        assert_eq!(map[TestIdx(3)], Some(7));
        assert_eq!(map[TestIdx(10)], None);
    }

    proptest! {
        #[test]
        fn push_returns_dense_keys(items in prop::collection::vec(any::<u8>(), 0..64)) {
            let mut map: IndexedMap<TestIdx, u8> = IndexedMap::new();
            for (i, item) in items.iter().enumerate() {
                let key = map.push(*item);
                prop_assert_eq!(key, TestIdx(i as u32));
            }
            prop_assert_eq!(map.len(), items.len());
            for (key, value) in map.iter() {
                prop_assert_eq!(items[key.index()], *value);
            }
        }
    }
}
