use crate::coord::NUM_LTIS;
use std::{
    ops::{
        Index,
        IndexMut,
    },
    iter::{
        repeat_with,
        FromIterator,
    },
};


/// Per-tile (within a chunk) storage of `T` via an array.
///
/// Implements `FromIterator`, as well as `Index`/`IndexMut<usize>` by local
/// tile index.
#[derive(Debug, Clone, PartialEq)]
pub struct PerTile<T>(pub Box<[T; NUM_LTIS]>);

impl<T> PerTile<T> {
    /// Construct with `NUM_LTIS` clones of `val`.
    pub fn repeat(val: T) -> Self
    where
        T: Clone,
    {
        std::iter::repeat(val).take(NUM_LTIS).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item=&T> + '_ {
        self.0.iter()
    }

    /// Reset every entry to its default.
    pub fn clear(&mut self)
    where
        T: Default,
    {
        for val in self.0.iter_mut() {
            *val = T::default();
        }
    }
}

impl<T: Default> Default for PerTile<T> {
    fn default() -> Self {
        repeat_with(T::default).take(NUM_LTIS).collect()
    }
}

/// Panics if iterator contains too many or too few items.
impl<T> FromIterator<T> for PerTile<T> {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item=T>,
    {
        let vec: Vec<T> = iter.into_iter().collect();
        assert_eq!(vec.len(), NUM_LTIS, "wrong number of items in iter");
        match vec.into_boxed_slice().try_into() {
            Ok(array) => PerTile(array),
            Err(_) => unreachable!(),
        }
    }
}

impl<T> Index<usize> for PerTile<T> {
    type Output = T;

    fn index(&self, i: usize) -> &T {
        &self.0[i]
    }
}

impl<T> IndexMut<usize> for PerTile<T> {
    fn index_mut(&mut self, i: usize) -> &mut T {
        &mut self.0[i]
    }
}
