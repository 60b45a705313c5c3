//! Systems - per-frame logic over every entity matching a signature.
//!
//! A system declares the components it requires as a tuple
//! ([`System::Required`]). The registry turns that into a [`Signature`] on
//! attach and keeps the system's member list in a [`SystemBase`] in sync with
//! entity signatures as components come and go.

use std::{
    any::{Any, TypeId},
    fmt,
    sync::LazyLock,
};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::{component::ComponentSet, entity::Entity, registry::Registry, signature::Signature};

/// Process-wide identifier for a system type.
///
/// Assigned sequentially on first use of each type, independent of any
/// registry. Informational only; signatures never use it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(u32);

static SYSTEM_IDS: LazyLock<Mutex<FxHashMap<TypeId, SystemId>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

impl SystemId {
    /// Get (allocating on first call) the id for system type `S`.
    #[must_use]
    pub fn of<S: 'static>() -> Self {
        let mut ids = SYSTEM_IDS.lock();
        let next = Self(ids.len() as u32);
        *ids.entry(TypeId::of::<S>()).or_insert(next)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemId({})", self.0)
    }
}

/// Logic run once per frame over the entities matching [`Self::Required`].
///
/// Membership hooks receive the registry read-only. When an entity loses a
/// required component, `on_entity_removed` runs before the value is dropped
/// from its pool, so the hook can still read it.
///
/// # Example
///
/// ```
/// use ast_ecs::{Entity, Registry, System};
///
/// struct Position(f32);
/// struct Velocity(f32);
///
/// struct Movement;
///
/// impl System for Movement {
///     type Required = (Position, Velocity);
///
///     fn update(&mut self, registry: &mut Registry, entities: &[Entity], dt: f32) {
///         for &entity in entities {
///             let v = registry.get::<Velocity>(entity).map_or(0.0, |v| v.0);
///             if let Some(p) = registry.get_mut::<Position>(entity) {
///                 p.0 += v * dt;
///             }
///         }
///     }
/// }
/// ```
pub trait System: 'static {
    /// Components an entity must own to become a member.
    type Required: ComponentSet;

    /// Run one frame. `entities` is this system's member list, which does not
    /// change for the duration of the call.
    fn update(&mut self, registry: &mut Registry, entities: &[Entity], dt: f32);

    /// Called once after the system is attached and its initial members are
    /// populated.
    fn on_attached(&mut self, _registry: &mut Registry) {}

    /// Called when the system is erased from the registry.
    fn on_detached(&mut self) {}

    /// Called when an entity becomes a member.
    fn on_entity_added(&mut self, _registry: &Registry, _entity: Entity) {}

    /// Called when an entity stops being a member.
    fn on_entity_removed(&mut self, _registry: &Registry, _entity: Entity) {}

    /// A member gained a component the system does not require.
    fn on_optional_component_added(&mut self, _registry: &Registry, _entity: Entity) {}

    /// A member lost a component the system does not require.
    fn on_optional_component_removed(&mut self, _registry: &Registry, _entity: Entity) {}
}

/// Registry-side state of an attached system: required signature and members.
#[derive(Clone)]
pub struct SystemBase {
    id: SystemId,
    name: &'static str,
    signature: Signature,
    entities: Vec<Entity>,
    /// Entity -> position in `entities`.
    positions: FxHashMap<Entity, usize>,
}

impl SystemBase {
    /// Create the base for system type `S` with a precomputed signature.
    #[must_use]
    pub fn new<S: 'static>(signature: Signature) -> Self {
        Self {
            id: SystemId::of::<S>(),
            name: std::any::type_name::<S>(),
            signature,
            entities: Vec::new(),
            positions: FxHashMap::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> SystemId {
        self.id
    }

    /// System type name for debugging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn signature(&self) -> Signature {
        self.signature
    }

    /// Whether an entity with `signature` qualifies for membership.
    #[must_use]
    pub const fn matches(&self, signature: Signature) -> bool {
        self.signature.is_subset_of(signature)
    }

    /// Current members, in insertion order modulo swap-removals.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.positions.contains_key(&entity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Append a member. Returns `false` if it was already one.
    pub fn add_entity(&mut self, entity: Entity) -> bool {
        if self.positions.contains_key(&entity) {
            return false;
        }
        self.positions.insert(entity, self.entities.len());
        self.entities.push(entity);
        true
    }

    /// Remove a member by swapping it with the last one.
    ///
    /// Returns `false` if the entity was not a member.
    pub fn remove_entity(&mut self, entity: Entity) -> bool {
        let Some(position) = self.positions.remove(&entity) else {
            return false;
        };

        self.entities.swap_remove(position);
        if let Some(&moved) = self.entities.get(position) {
            self.positions.insert(moved, position);
        }
        true
    }

    /// Hand the member list to a running system.
    pub(crate) fn take_entities(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.entities)
    }

    /// Return the member list taken by [`take_entities`](Self::take_entities).
    pub(crate) fn restore_entities(&mut self, entities: Vec<Entity>) {
        debug_assert!(self.entities.is_empty(), "members changed while checked out");
        self.entities = entities;
    }
}

impl fmt::Debug for SystemBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemBase")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("members", &self.entities.len())
            .finish()
    }
}

/// Object-safe view of a [`System`], used for type-erased slots.
pub(crate) trait AnySystem: Any {
    fn update(&mut self, registry: &mut Registry, entities: &[Entity], dt: f32);
    fn on_attached(&mut self, registry: &mut Registry);
    fn on_detached(&mut self);
    fn on_entity_added(&mut self, registry: &Registry, entity: Entity);
    fn on_entity_removed(&mut self, registry: &Registry, entity: Entity);
    fn on_optional_component_added(&mut self, registry: &Registry, entity: Entity);
    fn on_optional_component_removed(&mut self, registry: &Registry, entity: Entity);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<S: System> AnySystem for S {
    fn update(&mut self, registry: &mut Registry, entities: &[Entity], dt: f32) {
        <S as System>::update(self, registry, entities, dt);
    }

    fn on_attached(&mut self, registry: &mut Registry) {
        <S as System>::on_attached(self, registry);
    }

    fn on_detached(&mut self) {
        <S as System>::on_detached(self);
    }

    fn on_entity_added(&mut self, registry: &Registry, entity: Entity) {
        <S as System>::on_entity_added(self, registry, entity);
    }

    fn on_entity_removed(&mut self, registry: &Registry, entity: Entity) {
        <S as System>::on_entity_removed(self, registry, entity);
    }

    fn on_optional_component_added(&mut self, registry: &Registry, entity: Entity) {
        <S as System>::on_optional_component_added(self, registry, entity);
    }

    fn on_optional_component_removed(&mut self, registry: &Registry, entity: Entity) {
        <S as System>::on_optional_component_removed(self, registry, entity);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An attached system: its registry-side base plus the boxed behavior.
///
/// `system` is `None` while the behavior is checked out to run a hook or
/// its own `update`.
pub(crate) struct SystemSlot {
    pub(crate) base: SystemBase,
    pub(crate) system: Option<Box<dyn AnySystem>>,
}

impl SystemSlot {
    pub(crate) fn new<S: System>(base: SystemBase, system: S) -> Self {
        Self {
            base,
            system: Some(Box::new(system)),
        }
    }

    pub(crate) fn is_checked_out(&self) -> bool {
        self.system.is_none()
    }

    pub(crate) fn downcast_ref<S: System>(&self) -> Option<&S> {
        self.system.as_deref()?.as_any().downcast_ref()
    }

    pub(crate) fn downcast_mut<S: System>(&mut self) -> Option<&mut S> {
        self.system.as_deref_mut()?.as_any_mut().downcast_mut()
    }
}
