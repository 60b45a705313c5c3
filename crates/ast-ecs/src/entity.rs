//! Entity identifiers.
//!
//! Entities are plain monotonically assigned integers. Id `0` is reserved as
//! the null entity and ids are never recycled within a registry, so no
//! generation counter is carried.

use std::fmt;

/// Raw entity index.
pub type EntityId = u32;

/// A unique identifier for an entity in a [`Registry`](crate::Registry).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Entity(EntityId);

impl Entity {
    /// The null entity. Never handed out by an allocator.
    ///
    /// Returned by lookups that find nothing, e.g. an unknown prefab name.
    pub const NULL: Entity = Entity(0);

    /// Create an entity from a raw id.
    #[must_use]
    pub const fn from_raw(id: EntityId) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn id(self) -> EntityId {
        self.0
    }

    /// Index into sparse arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Check whether this is [`Entity::NULL`].
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Entity(null)")
        } else {
            write!(f, "Entity({})", self.0)
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic allocator for entity ids.
///
/// Starts at 1 so that [`Entity::NULL`] is never produced.
#[derive(Debug, Clone)]
pub struct EntityAllocator {
    next: EntityId,
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityAllocator {
    /// Create a new allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next entity id.
    ///
    /// # Panics
    ///
    /// Panics if the id space is exhausted.
    pub fn allocate(&mut self) -> Entity {
        let entity = Entity(self.next);
        self.next = self
            .next
            .checked_add(1)
            .expect("entity id space exhausted");
        entity
    }

    /// Number of ids handed out so far (live or destroyed).
    #[must_use]
    pub const fn allocated(&self) -> u32 {
        self.next - 1
    }

    /// The id the next call to [`allocate`](Self::allocate) will return.
    #[must_use]
    pub const fn peek(&self) -> Entity {
        Entity(self.next)
    }
}
