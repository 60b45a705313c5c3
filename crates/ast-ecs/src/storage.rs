//! Component storage - one sparse set per component type.
//!
//! A pool keeps a sparse `entity -> dense index` array next to two parallel
//! dense arrays (entities and values). Lookup, insert and erase are O(1).
//! Erase swaps the removed slot with the last one, so dense order is not
//! stable across removals.

use std::any::Any;

use crate::{component::Component, entity::Entity};

/// Sparse slot marker for entities absent from the pool.
const ABSENT: u32 = u32::MAX;

/// Type-erased view of a pool.
///
/// The registry holds pools behind this trait and only needs these
/// operations for bookkeeping. Typed access goes through
/// [`as_any`](Self::as_any) and a downcast to [`SparseSet<T>`].
pub trait ErasedPool: Any {
    fn contains(&self, entity: Entity) -> bool;

    /// Remove the entity's value, if any. Returns `true` if it was present.
    fn erase(&mut self, entity: Entity) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);

    /// Component type name for debugging.
    fn component_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Densely packed storage for components of a single type.
pub struct SparseSet<T> {
    /// Entity index -> position in the dense arrays, or [`ABSENT`].
    sparse: Vec<u32>,
    /// Position -> owning entity.
    dense: Vec<Entity>,
    /// Position -> value, parallel to `dense`.
    values: Vec<T>,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SparseSet<T> {
    /// Create an empty pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sparse: Vec::new(),
            dense: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Create a pool with room for `capacity` values.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sparse: Vec::with_capacity(capacity),
            dense: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.slot(entity).is_some()
    }

    fn slot(&self, entity: Entity) -> Option<usize> {
        match self.sparse.get(entity.index()) {
            Some(&slot) if slot != ABSENT => Some(slot as usize),
            _ => None,
        }
    }

    /// Store `value` for `entity` and return a reference to it.
    ///
    /// # Panics
    ///
    /// Panics if `entity` already has a value in this pool.
    pub fn insert(&mut self, entity: Entity, value: T) -> &mut T {
        assert!(
            !self.contains(entity),
            "{entity:?} already has a {} component",
            std::any::type_name::<T>()
        );

        let index = entity.index();
        if index >= self.sparse.len() {
            self.sparse.resize(index + 1, ABSENT);
        }

        self.sparse[index] = self.dense.len() as u32;
        self.dense.push(entity);
        self.values.push(value);

        let last = self.values.len() - 1;
        &mut self.values[last]
    }

    /// Same as [`insert`](Self::insert).
    ///
    /// # Panics
    ///
    /// Panics if `entity` already has a value in this pool.
    pub fn emplace(&mut self, entity: Entity, value: T) -> &mut T {
        self.insert(entity, value)
    }

    /// Construct the value in place from `init`.
    ///
    /// # Panics
    ///
    /// Panics if `entity` already has a value in this pool.
    pub fn emplace_with(&mut self, entity: Entity, init: impl FnOnce() -> T) -> &mut T {
        self.insert(entity, init())
    }

    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.slot(entity).map(|slot| &self.values[slot])
    }

    #[must_use]
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.slot(entity).map(|slot| &mut self.values[slot])
    }

    /// Get the value for an entity known to be present.
    ///
    /// # Panics
    ///
    /// Panics if `entity` has no value in this pool.
    #[must_use]
    pub fn get_unchecked(&self, entity: Entity) -> &T {
        match self.get(entity) {
            Some(value) => value,
            None => panic!(
                "{entity:?} does not have a {} component",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Mutable variant of [`get_unchecked`](Self::get_unchecked).
    ///
    /// # Panics
    ///
    /// Panics if `entity` has no value in this pool.
    pub fn get_unchecked_mut(&mut self, entity: Entity) -> &mut T {
        match self.slot(entity) {
            Some(slot) => &mut self.values[slot],
            None => panic!(
                "{entity:?} does not have a {} component",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Remove and return the entity's value.
    ///
    /// The last dense element is moved into the vacated slot.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let slot = self.slot(entity)?;

        let value = self.values.swap_remove(slot);
        self.dense.swap_remove(slot);

        // Fix up the entity that was moved into `slot`, unless we removed the tail
        if let Some(&moved) = self.dense.get(slot) {
            self.sparse[moved.index()] = slot as u32;
        }
        self.sparse[entity.index()] = ABSENT;

        Some(value)
    }

    /// Remove the entity's value. No-op if absent.
    ///
    /// Returns `true` if a value was removed.
    pub fn erase(&mut self, entity: Entity) -> bool {
        self.remove(entity).is_some()
    }

    /// Drop every value.
    pub fn clear(&mut self) {
        self.sparse.clear();
        self.dense.clear();
        self.values.clear();
    }

    /// Entities in dense order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.dense
    }

    /// Values in dense order, parallel to [`entities`](Self::entities).
    #[must_use]
    pub fn components(&self) -> &[T] {
        &self.values
    }

    /// Mutable values in dense order.
    pub fn components_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Iterate `(entity, value)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.dense.iter().copied().zip(self.values.iter())
    }

    /// Iterate `(entity, value)` pairs in dense order, with mutable values.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.dense.iter().copied().zip(self.values.iter_mut())
    }

    /// Visit every `(entity, value)` pair once, in dense order.
    pub fn each(&self, mut visit: impl FnMut(Entity, &T)) {
        for (entity, value) in self.iter() {
            visit(entity, value);
        }
    }

    /// Visit every pair once with a mutable value.
    ///
    /// Values can be changed but pool membership cannot.
    pub fn each_mut(&mut self, mut visit: impl FnMut(Entity, &mut T)) {
        for (entity, value) in self.iter_mut() {
            visit(entity, value);
        }
    }
}

impl<T: Component> ErasedPool for SparseSet<T> {
    fn contains(&self, entity: Entity) -> bool {
        SparseSet::contains(self, entity)
    }

    fn erase(&mut self, entity: Entity) -> bool {
        SparseSet::erase(self, entity)
    }

    fn len(&self) -> usize {
        SparseSet::len(self)
    }

    fn clear(&mut self) {
        SparseSet::clear(self);
    }

    fn component_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T> std::fmt::Debug for SparseSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseSet")
            .field("component", &std::any::type_name::<T>())
            .field("len", &self.dense.len())
            .field("entities", &self.dense)
            .finish()
    }
}
