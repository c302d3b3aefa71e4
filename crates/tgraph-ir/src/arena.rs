//! Arena-based storage with typed handles.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A typed handle into an [`Arena`].
///
/// Handles are lightweight identifiers (u32 index) that provide
/// type-safe access to arena-allocated values. A handle stays valid until
/// its value is removed; slots are never reused, so a stale handle can
/// always be detected with [`Arena::contains`].
pub struct Handle<T> {
    index: u32,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

impl<T> fmt::Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.index)
    }
}

impl<T> Handle<T> {
    /// Creates a new handle from a zero-based index.
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the zero-based index of this handle.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// An arena with typed [`Handle`]-based access and removal.
///
/// Removal drops the stored value and leaves a tombstone behind.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
        }
    }

    /// Returns the number of live elements in the arena.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if the arena contains no live elements.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Returns the handle that will be assigned to the next appended value.
    pub fn next_handle(&self) -> Handle<T> {
        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("arena overflow: {} items exceeds u32::MAX", self.slots.len())
        });
        Handle::new(index)
    }

    /// Appends a value and returns its handle.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let handle = self.next_handle();
        self.slots.push(Some(value));
        self.live += 1;
        handle
    }

    /// Removes the value behind `handle`, returning it if it was live.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let value = self.slots.get_mut(handle.index())?.take();
        if value.is_some() {
            self.live -= 1;
        }
        value
    }

    /// Returns `true` if `handle` refers to a live value.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        matches!(self.slots.get(handle.index()), Some(Some(_)))
    }

    /// Returns a reference to the value if the handle is valid.
    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    /// Returns a mutable reference to the value if the handle is valid.
    pub fn try_get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Iterates over `(handle, &value)` pairs of live values.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        // Safety: arena size bounded by u32::MAX (enforced in append)
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (Handle::new(i as u32), v)))
    }

    /// Iterates over `(handle, &mut value)` pairs of live values.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, v)| v.as_mut().map(|v| (Handle::new(i as u32), v)))
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        self.try_get(handle)
            .unwrap_or_else(|| panic!("arena: stale or foreign handle {handle:?}"))
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        self.try_get_mut(handle)
            .unwrap_or_else(|| panic!("arena: stale or foreign handle {handle:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_append_and_access() {
        let mut arena = Arena::new();
        let h0 = arena.append("hello");
        let h1 = arena.append("world");
        assert_eq!(arena[h0], "hello");
        assert_eq!(arena[h1], "world");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn arena_iter_skips_removed() {
        let mut arena = Arena::new();
        arena.append(10);
        let h1 = arena.append(20);
        arena.append(30);
        assert_eq!(arena.remove(h1), Some(20));
        let items: Vec<_> = arena.iter().map(|(h, &v)| (h.index(), v)).collect();
        assert_eq!(items, vec![(0, 10), (2, 30)]);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn removed_slots_are_not_reused() {
        let mut arena = Arena::new();
        let h0 = arena.append(1);
        arena.remove(h0);
        let h1 = arena.append(2);
        assert_ne!(h0, h1);
        assert!(!arena.contains(h0));
        assert!(arena.contains(h1));
        assert_eq!(arena.remove(h0), None);
    }

    #[test]
    fn arena_next_handle() {
        let mut arena = Arena::<i32>::new();
        let h0 = arena.next_handle();
        assert_eq!(h0.index(), 0);
        arena.append(42);
        let h1 = arena.next_handle();
        assert_eq!(h1.index(), 1);
    }

    #[test]
    fn handle_ordering() {
        let h0: Handle<u32> = Handle::new(0);
        let h1: Handle<u32> = Handle::new(1);
        assert!(h0 < h1);
        assert_eq!(h0, h0);
    }

    #[test]
    fn arena_try_get() {
        let mut arena = Arena::new();
        let h0 = arena.append(42);
        assert_eq!(arena.try_get(h0), Some(&42));
        assert_eq!(arena.try_get(Handle::new(99)), None);
    }

    #[test]
    #[should_panic(expected = "stale or foreign handle")]
    fn indexing_removed_handle_panics() {
        let mut arena = Arena::new();
        let h0 = arena.append(42);
        arena.remove(h0);
        let _ = arena[h0];
    }
}
