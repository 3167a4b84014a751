use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Generational index into a [`Pool`].
///
/// A handle with generation `0` is never handed out by a pool and acts as the
/// null handle.
pub struct Handle<T> {
    pub slot: u32,
    pub generation: u32,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self {
            slot,
            generation,
            phantom: PhantomData,
        }
    }

    pub const fn null() -> Self {
        Self::new(0, 0)
    }

    pub fn is_null(&self) -> bool {
        self.generation == 0
    }

    /// Packs slot and generation into one integer, handy for logging and for
    /// backends that key native objects by a flat id.
    pub fn as_u64(&self) -> u64 {
        ((self.generation as u64) << 32) | self.slot as u64
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}.g{})", self.slot, self.generation)
    }
}

pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<u32>,
    generation: Vec<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        const INITIAL_SIZE: usize = 64;
        Self::new(INITIAL_SIZE)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        let mut p = Pool {
            items: Vec::with_capacity(initial_size),
            empty: Vec::with_capacity(initial_size),
            generation: vec![1; initial_size],
        };

        // Pop from the back hands out the lowest slots first.
        p.empty = (0..initial_size as u32).rev().collect();
        p.items.resize_with(initial_size, || None);

        p
    }

    fn grow(&mut self) {
        let old = self.items.len();
        let new = (old * 2).max(16);
        self.items.resize_with(new, || None);
        self.generation.resize(new, 1);
        self.empty.extend((old as u32..new as u32).rev());
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        if self.empty.is_empty() {
            self.grow();
        }

        // `grow` always leaves at least one free slot behind.
        let slot = self.empty.pop().unwrap_or_default() as usize;
        self.items[slot] = Some(item);

        Handle::new(slot as u32, self.generation[slot])
    }

    /// Removes the item and bumps the slot generation so stale handles stop
    /// resolving.
    pub fn release(&mut self, item: Handle<T>) -> Option<T> {
        let slot = item.slot as usize;
        if slot >= self.items.len() || self.generation[slot] != item.generation {
            return None;
        }

        let taken = self.items[slot].take()?;
        self.generation[slot] = self.generation[slot].wrapping_add(1).max(1);
        self.empty.push(item.slot);
        Some(taken)
    }

    pub fn get_ref(&self, item: Handle<T>) -> Option<&T> {
        let slot = item.slot as usize;
        if slot < self.items.len() && self.generation[slot] == item.generation {
            self.items[slot].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut_ref(&mut self, item: Handle<T>) -> Option<&mut T> {
        let slot = item.slot as usize;
        if slot < self.items.len() && self.generation[slot] == item.generation {
            self.items[slot].as_mut()
        } else {
            None
        }
    }

    pub fn contains(&self, item: Handle<T>) -> bool {
        self.get_ref(item).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.iter().filter(|i| i.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each_occupied<F: FnMut(Handle<T>, &T)>(&self, mut func: F) {
        for (slot, item) in self.items.iter().enumerate() {
            if let Some(item) = item {
                func(Handle::new(slot as u32, self.generation[slot]), item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_handles_go_stale() {
        let mut pool: Pool<u32> = Pool::new(2);
        let a = pool.insert(7);
        assert_eq!(pool.get_ref(a), Some(&7));
        assert_eq!(pool.release(a), Some(7));
        assert!(pool.get_ref(a).is_none());

        let b = pool.insert(9);
        assert_eq!(a.slot, b.slot);
        assert_ne!(a, b);
        assert_eq!(pool.get_ref(b), Some(&9));
    }

    #[test]
    fn pool_grows_past_initial_size() {
        let mut pool: Pool<usize> = Pool::new(1);
        let handles: Vec<_> = (0..40).map(|i| pool.insert(i)).collect();
        assert_eq!(pool.len(), 40);
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(pool.get_ref(*h), Some(&i));
        }
    }

    #[test]
    fn default_handle_is_null() {
        let mut pool: Pool<u8> = Pool::default();
        let h = pool.insert(1);
        assert!(!h.is_null());
        assert!(Handle::<u8>::default().is_null());
        assert!(pool.get_ref(Handle::default()).is_none());
    }
}
