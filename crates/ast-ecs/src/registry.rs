//! Registry - the owner of every entity, component pool and system.
//!
//! Structural changes are split in two halves. Component values land in
//! their pool immediately, but the matching signature update and system
//! notifications are queued as [`Command`]s and applied once per frame, after
//! every system has run. Systems therefore see a stable member list for the
//! whole of their own `update`.
//!
//! A frame is `run systems -> sweep expired -> flush deferred`:
//!
//! ```
//! use ast_ecs::{Entity, Registry, System};
//!
//! #[derive(Clone)]
//! struct Position(f32, f32);
//! #[derive(Clone)]
//! struct Velocity(f32, f32);
//!
//! struct Movement;
//!
//! impl System for Movement {
//!     type Required = (Position, Velocity);
//!
//!     fn update(&mut self, registry: &mut Registry, entities: &[Entity], dt: f32) {
//!         for &entity in entities {
//!             let Some(&Velocity(vx, vy)) = registry.get::<Velocity>(entity) else {
//!                 continue;
//!             };
//!             if let Some(position) = registry.get_mut::<Position>(entity) {
//!                 position.0 += vx * dt;
//!                 position.1 += vy * dt;
//!             }
//!         }
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.attach(Movement);
//!
//! let ball = registry.create_entity();
//! registry.emplace(ball, Position(0.0, 0.0));
//! registry.emplace(ball, Velocity(1.0, 2.0));
//!
//! registry.update(1.0); // membership is applied at the end of this frame
//! registry.update(1.0); // Movement now moves the ball
//!
//! assert_eq!(registry.get::<Position>(ball).map(|p| (p.0, p.1)), Some((1.0, 2.0)));
//! ```

use std::any::{TypeId, type_name};

use hashbrown::HashMap;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    command::{Command, CommandQueue},
    component::{CloneSet, CloneVisitor, Component, ComponentId, ComponentRegistry, ComponentSet},
    context::Context,
    entity::{Entity, EntityAllocator},
    signature::Signature,
    storage::{ErasedPool, SparseSet},
    system::{System, SystemBase, SystemSlot},
};

/// Membership hook to run on a system.
#[derive(Clone, Copy, Debug)]
enum Hook {
    EntityAdded,
    EntityRemoved,
    OptionalAdded,
    OptionalRemoved,
}

/// The ECS registry - container for all entities, components and systems.
pub struct Registry {
    /// Entity ID allocator.
    entities: EntityAllocator,
    /// Signature per entity id; `None` for prefabs and erased entities.
    signatures: Vec<Option<Signature>>,
    /// Number of `Some` entries in `signatures`.
    alive: usize,
    /// Prefab name -> template entity.
    prefabs: HashMap<String, Entity>,
    /// Component type registry.
    components: ComponentRegistry,
    /// Pools indexed by `ComponentId`.
    pools: Vec<Option<Box<dyn ErasedPool>>>,
    /// Attached systems in attachment order.
    systems: Vec<SystemSlot>,
    /// System type -> index into `systems`.
    system_index: FxHashMap<TypeId, usize>,
    /// Entities to erase after the current run of systems.
    expired: Vec<Entity>,
    /// Work deferred to the end of the frame.
    commands: CommandQueue,
    /// Set while systems are running their `update`.
    running: bool,
    /// Completed calls to `update`.
    frame: u64,
    /// Shared scratch state for systems.
    pub context: Context,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a registry with room for `entity_capacity` entities before
    /// its internal tables reallocate.
    #[must_use]
    pub fn with_capacity(entity_capacity: usize) -> Self {
        let mut signatures = Vec::with_capacity(entity_capacity + 1);
        // Slot 0 belongs to Entity::NULL
        signatures.push(None);

        Self {
            entities: EntityAllocator::new(),
            signatures,
            alive: 0,
            prefabs: HashMap::new(),
            components: ComponentRegistry::new(),
            pools: Vec::new(),
            systems: Vec::new(),
            system_index: FxHashMap::default(),
            expired: Vec::with_capacity(entity_capacity),
            commands: CommandQueue::with_capacity(entity_capacity),
            running: false,
            frame: 0,
            context: Context::default(),
        }
    }

    // ==================== Entity Operations ====================

    /// Create a new entity with an empty signature.
    ///
    /// Systems that require no components pick it up at the end of the frame.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.allocate();
        self.signatures[entity.index()] = Some(Signature::EMPTY);
        self.alive += 1;

        if self.systems.iter().any(|slot| slot.base.signature().is_empty()) {
            self.commands.push(Command::ForceCheck { entity });
        }
        entity
    }

    /// Create a named template entity.
    ///
    /// Prefabs own components like any entity but have no signature, so they
    /// are never matched against systems. An existing mapping for `name` is
    /// overwritten.
    pub fn create_prefab(&mut self, name: &str) -> Entity {
        let entity = self.allocate();
        if let Some(previous) = self.prefabs.insert(name.to_owned(), entity) {
            debug!(name, %previous, "prefab name reassigned");
        }
        debug!(name, %entity, "prefab created");
        entity
    }

    fn allocate(&mut self) -> Entity {
        let entity = self.entities.allocate();
        let index = entity.index();
        if index >= self.signatures.len() {
            self.signatures.resize(index + 1, None);
        }
        entity
    }

    /// Look up a prefab by name, or [`Entity::NULL`] if unknown.
    #[must_use]
    pub fn prefab(&self, name: &str) -> Entity {
        self.prefabs.get(name).copied().unwrap_or(Entity::NULL)
    }

    /// Iterate `(name, entity)` for every prefab.
    pub fn prefabs(&self) -> impl Iterator<Item = (&str, Entity)> {
        self.prefabs
            .iter()
            .map(|(name, &entity)| (name.as_str(), entity))
    }

    /// Check whether an entity exists and is not a prefab.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.signature(entity).is_some()
    }

    /// Current signature of a live entity.
    #[must_use]
    pub fn signature(&self, entity: Entity) -> Option<Signature> {
        self.signatures.get(entity.index()).copied().flatten()
    }

    /// Number of live entities.
    #[must_use]
    pub const fn entity_count(&self) -> usize {
        self.alive
    }

    /// Iterate live entities in ascending id order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.signatures
            .iter()
            .enumerate()
            .filter(|(_, signature)| signature.is_some())
            .map(|(index, _)| Entity::from_raw(index as u32))
    }

    /// Erase an entity and all of its components at the end of the frame.
    pub fn erase(&mut self, entity: Entity) {
        self.commands.push(Command::EntityErased { entity });
    }

    /// Remove every component of an entity at the end of the frame, keeping
    /// the entity itself.
    pub fn erase_components(&mut self, entity: Entity) {
        self.commands.push(Command::ComponentsErased { entity });
    }

    /// Schedule an entity for destruction right after the current run of
    /// systems.
    pub fn mark_as_expired(&mut self, entity: Entity) {
        self.expired.push(entity);
    }

    /// Entities marked as expired and not yet swept.
    #[must_use]
    pub fn expired(&self) -> &[Entity] {
        &self.expired
    }

    // ==================== Component Operations ====================

    /// Register a component type.
    ///
    /// # Panics
    ///
    /// Panics if this would exceed the 64 component types a signature holds.
    pub fn register_component<T: Component>(&mut self) -> ComponentId {
        self.components.register::<T>()
    }

    /// Get the component ID for a type, if it has been used.
    #[must_use]
    pub fn component_id<T: Component>(&self) -> Option<ComponentId> {
        self.components.get_id::<T>()
    }

    /// Component type registry.
    #[must_use]
    pub const fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    /// Pool for `T`, if one exists.
    #[must_use]
    pub fn pool<T: Component>(&self) -> Option<&SparseSet<T>> {
        let id = self.components.get_id::<T>()?;
        self.pools
            .get(id.index())?
            .as_deref()?
            .as_any()
            .downcast_ref()
    }

    /// Mutable pool for `T`, if one exists.
    pub fn pool_mut<T: Component>(&mut self) -> Option<&mut SparseSet<T>> {
        let id = self.components.get_id::<T>()?;
        self.pools
            .get_mut(id.index())?
            .as_deref_mut()?
            .as_any_mut()
            .downcast_mut()
    }

    /// Pool for `T`, created on first use. For iterating every `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is new and the component capacity is exhausted.
    pub fn get_all<T: Component>(&mut self) -> &mut SparseSet<T> {
        let id = self.components.register::<T>();
        let index = id.index();
        if index >= self.pools.len() {
            self.pools.resize_with(index + 1, || None);
        }

        match self.pools[index]
            .get_or_insert_with(|| Box::new(SparseSet::<T>::new()))
            .as_any_mut()
            .downcast_mut::<SparseSet<T>>()
        {
            Some(pool) => pool,
            None => unreachable!("pool {id:?} does not hold {}", type_name::<T>()),
        }
    }

    /// Get a component of an entity (or prefab).
    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.pool::<T>()?.get(entity)
    }

    /// Get a mutable component of an entity (or prefab).
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.pool_mut::<T>()?.get_mut(entity)
    }

    /// Get a component the caller knows is present.
    ///
    /// # Panics
    ///
    /// Panics if the entity has no `T`.
    #[must_use]
    pub fn get_unchecked<T: Component>(&self, entity: Entity) -> &T {
        match self.get::<T>(entity) {
            Some(component) => component,
            None => panic!("{entity:?} does not have a {} component", type_name::<T>()),
        }
    }

    /// Mutable variant of [`get_unchecked`](Self::get_unchecked).
    ///
    /// # Panics
    ///
    /// Panics if the entity has no `T`.
    pub fn get_unchecked_mut<T: Component>(&mut self, entity: Entity) -> &mut T {
        match self.pool_mut::<T>() {
            Some(pool) => pool.get_unchecked_mut(entity),
            None => panic!("{entity:?} does not have a {} component", type_name::<T>()),
        }
    }

    /// Whether the entity's signature includes `T`.
    ///
    /// Reflects the signature, which is updated at the end of the frame, not
    /// the pool: a component emplaced this frame is not reported yet.
    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        match (self.signature(entity), self.components.get_id::<T>()) {
            (Some(signature), Some(id)) => signature.test(id),
            _ => false,
        }
    }

    /// Whether the entity's signature includes every member of `S`.
    #[must_use]
    pub fn has_all<S: ComponentSet>(&self, entity: Entity) -> bool {
        let Some(signature) = self.signature(entity) else {
            return false;
        };
        self.components
            .lookup_signature::<S>()
            .is_some_and(|required| required.is_subset_of(signature))
    }

    /// Add a component to an entity.
    ///
    /// The value is stored right away; systems learn about it at the end of
    /// the frame.
    ///
    /// # Panics
    ///
    /// Panics if the entity already has a `T`.
    pub fn emplace<T: Component>(&mut self, entity: Entity, component: T) -> &mut T {
        let id = self.components.register::<T>();
        self.commands.push(Command::ComponentAdded {
            entity,
            component: id,
        });
        self.get_all::<T>().insert(entity, component)
    }

    /// Like [`emplace`](Self::emplace), constructing the value from `init`.
    ///
    /// # Panics
    ///
    /// Panics if the entity already has a `T`.
    pub fn emplace_with<T: Component>(&mut self, entity: Entity, init: impl FnOnce() -> T) -> &mut T {
        self.emplace(entity, init())
    }

    /// Add an existing component value to an entity. Same as
    /// [`emplace`](Self::emplace).
    ///
    /// # Panics
    ///
    /// Panics if the entity already has a `T`.
    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) -> &mut T {
        self.emplace(entity, component)
    }

    /// Add a component and set its signature bit immediately, without
    /// notifying any system.
    ///
    /// Used for bulk construction followed by one [`force_check`](Self::force_check).
    ///
    /// # Panics
    ///
    /// Panics if the entity already has a `T`.
    pub fn insert_silent<T: Component>(&mut self, entity: Entity, component: T) -> &mut T {
        let id = self.components.register::<T>();
        if let Some(Some(signature)) = self.signatures.get_mut(entity.index()) {
            signature.set(id);
        }
        self.get_all::<T>().insert(entity, component)
    }

    /// Add a component to a named prefab, creating the prefab if needed.
    ///
    /// # Panics
    ///
    /// Panics if the prefab already has a `T`.
    pub fn emplace_prefab<T: Component>(&mut self, name: &str, component: T) -> &mut T {
        let prefab = match self.prefabs.get(name) {
            Some(&prefab) => prefab,
            None => self.create_prefab(name),
        };
        self.get_all::<T>().insert(prefab, component)
    }

    /// Same as [`emplace_prefab`](Self::emplace_prefab).
    ///
    /// # Panics
    ///
    /// Panics if the prefab already has a `T`.
    pub fn insert_prefab<T: Component>(&mut self, name: &str, component: T) -> &mut T {
        self.emplace_prefab(name, component)
    }

    /// Clone `src`'s `T` onto `dst` through the notifying insert path.
    ///
    /// Returns `false` if `src` has no `T`.
    ///
    /// # Panics
    ///
    /// Panics if `dst` already has a `T`.
    pub fn copy<T: Component + Clone>(&mut self, dst: Entity, src: Entity) -> bool {
        let Some(component) = self.get::<T>(src).cloned() else {
            return false;
        };
        self.insert(dst, component);
        true
    }

    /// Clone `src`'s `T` onto `dst`, setting the signature bit without
    /// notifying systems.
    ///
    /// # Panics
    ///
    /// Panics if `dst` already has a `T`.
    pub fn copy_silent<T: Component + Clone>(&mut self, dst: Entity, src: Entity) -> bool {
        let Some(component) = self.get::<T>(src).cloned() else {
            return false;
        };
        self.insert_silent(dst, component);
        true
    }

    /// [`copy`](Self::copy) every member of `S`. Returns how many were copied.
    ///
    /// # Panics
    ///
    /// Panics if `dst` already has one of the copied components.
    pub fn copy_all<S: CloneSet>(&mut self, dst: Entity, src: Entity) -> usize {
        self.copy_set::<S>(dst, src, true)
    }

    /// [`copy_silent`](Self::copy_silent) every member of `S`.
    ///
    /// Instantiating a prefab is `create_entity`, `copy_all_silent`, then a
    /// single `force_check`.
    ///
    /// # Panics
    ///
    /// Panics if `dst` already has one of the copied components.
    pub fn copy_all_silent<S: CloneSet>(&mut self, dst: Entity, src: Entity) -> usize {
        self.copy_set::<S>(dst, src, false)
    }

    fn copy_set<S: CloneSet>(&mut self, dst: Entity, src: Entity, notify: bool) -> usize {
        struct Copier<'a> {
            registry: &'a mut Registry,
            dst: Entity,
            src: Entity,
            notify: bool,
            copied: usize,
        }

        impl CloneVisitor for Copier<'_> {
            fn visit<T: Component + Clone>(&mut self) {
                let copied = if self.notify {
                    self.registry.copy::<T>(self.dst, self.src)
                } else {
                    self.registry.copy_silent::<T>(self.dst, self.src)
                };
                self.copied += usize::from(copied);
            }
        }

        let mut copier = Copier {
            registry: self,
            dst,
            src,
            notify,
            copied: 0,
        };
        S::for_each_clone(&mut copier);
        copier.copied
    }

    /// Remove a component from an entity at the end of the frame.
    ///
    /// Systems are notified before the value is dropped.
    pub fn erase_component<T: Component>(&mut self, entity: Entity) {
        if let Some(component) = self.components.get_id::<T>() {
            self.commands
                .push(Command::ComponentRemoved { entity, component });
        }
    }

    /// Visit every `(entity, &T)` in pool order.
    pub fn each<T: Component>(&self, visit: impl FnMut(Entity, &T)) {
        if let Some(pool) = self.pool::<T>() {
            pool.each(visit);
        }
    }

    /// Visit every `(entity, &mut T)` in pool order.
    pub fn each_mut<T: Component>(&mut self, visit: impl FnMut(Entity, &mut T)) {
        if let Some(pool) = self.pool_mut::<T>() {
            pool.each_mut(visit);
        }
    }

    /// Add `entity` to every system its current signature satisfies and
    /// that it is not yet a member of.
    ///
    /// Only `on_entity_added` fires. If an affected system is busy running,
    /// the check is repeated at the end of the frame.
    pub fn force_check(&mut self, entity: Entity) {
        let Some(signature) = self.signature(entity) else {
            return;
        };

        let mut retry = false;
        for index in 0..self.systems.len() {
            let slot = &mut self.systems[index];
            if !slot.base.matches(signature) || slot.base.contains(entity) {
                continue;
            }
            if slot.is_checked_out() {
                retry = true;
                continue;
            }
            slot.base.add_entity(entity);
            self.call_hook(index, Hook::EntityAdded, entity);
        }

        if retry {
            self.commands.push(Command::ForceCheck { entity });
        }
    }

    // ==================== System Operations ====================

    /// Attach a system, or return the already attached instance of `S`
    /// (dropping `system`).
    ///
    /// # Panics
    ///
    /// See [`attach_with`](Self::attach_with).
    pub fn attach<S: System>(&mut self, system: S) -> &mut S {
        self.attach_with(|| system)
    }

    /// Attach the system built by `init`, or return the already attached
    /// instance of `S` without calling `init`.
    ///
    /// On first attach every live entity that already satisfies the system's
    /// signature becomes a member, then `on_attached` runs.
    ///
    /// # Panics
    ///
    /// Panics if `S` is attached and currently running (re-attaching from
    /// inside its own callbacks), or if `S::Required` exceeds the component
    /// capacity.
    pub fn attach_with<S: System>(&mut self, init: impl FnOnce() -> S) -> &mut S {
        let type_id = TypeId::of::<S>();
        if let Some(&index) = self.system_index.get(&type_id) {
            return match self.systems[index].downcast_mut::<S>() {
                Some(system) => system,
                None => panic!("{} re-attached while running", type_name::<S>()),
            };
        }

        let signature = self.components.signature_of::<S::Required>();
        let index = self.systems.len();
        self.systems
            .push(SystemSlot::new(SystemBase::new::<S>(signature), init()));
        self.system_index.insert(type_id, index);

        let matching: Vec<Entity> = self
            .entities()
            .filter(|&entity| {
                self.signature(entity)
                    .is_some_and(|entity_signature| signature.is_subset_of(entity_signature))
            })
            .collect();
        for entity in matching {
            if self.systems[index].base.add_entity(entity) {
                self.call_hook(index, Hook::EntityAdded, entity);
            }
        }

        if let Some(mut system) = self.systems[index].system.take() {
            system.on_attached(self);
            // The hook may have erased earlier systems
            let index = self.system_index[&type_id];
            self.systems[index].system = Some(system);
        }

        let index = self.system_index[&type_id];
        let base = &self.systems[index].base;
        debug!(
            system = base.name(),
            id = base.id().as_raw(),
            members = base.len(),
            "system attached"
        );

        match self.systems[index].downcast_mut::<S>() {
            Some(system) => system,
            None => unreachable!("slot {index} does not hold {}", type_name::<S>()),
        }
    }

    /// Erase the system of type `S`, calling its `on_detached` hook.
    ///
    /// Members are simply forgotten. When called while systems are running,
    /// the removal happens at the end of the frame. Returns `false` if `S` is
    /// not attached.
    pub fn erase_system<S: System>(&mut self) -> bool {
        let Some(&index) = self.system_index.get(&TypeId::of::<S>()) else {
            return false;
        };

        if self.running || self.systems[index].is_checked_out() {
            self.defer(|registry| {
                registry.erase_system::<S>();
            });
            return true;
        }

        let mut slot = self.systems.remove(index);
        self.system_index.remove(&TypeId::of::<S>());
        for position in self.system_index.values_mut() {
            if *position > index {
                *position -= 1;
            }
        }

        if let Some(system) = slot.system.as_mut() {
            system.on_detached();
        }
        debug!(system = slot.base.name(), "system detached");
        true
    }

    /// Get an attached system.
    ///
    /// Returns `None` if `S` is not attached or is the system currently
    /// running.
    #[must_use]
    pub fn system<S: System>(&self) -> Option<&S> {
        let &index = self.system_index.get(&TypeId::of::<S>())?;
        self.systems[index].downcast_ref()
    }

    /// Get an attached system mutably.
    pub fn system_mut<S: System>(&mut self) -> Option<&mut S> {
        let &index = self.system_index.get(&TypeId::of::<S>())?;
        self.systems[index].downcast_mut()
    }

    /// Registry-side state (signature, members) of an attached system.
    ///
    /// While `S` runs its `update`, its member list is lent to the call and
    /// reads as empty here.
    #[must_use]
    pub fn system_base<S: System>(&self) -> Option<&SystemBase> {
        let &index = self.system_index.get(&TypeId::of::<S>())?;
        Some(&self.systems[index].base)
    }

    /// Member entities of an attached system.
    #[must_use]
    pub fn members<S: System>(&self) -> Option<&[Entity]> {
        self.system_base::<S>().map(SystemBase::entities)
    }

    /// Bases of every attached system, in attachment (and update) order.
    pub fn systems(&self) -> impl Iterator<Item = &SystemBase> {
        self.systems.iter().map(|slot| &slot.base)
    }

    // ==================== Frame ====================

    /// Queue arbitrary work for the end of the frame.
    pub fn defer(&mut self, call: impl FnOnce(&mut Registry) + 'static) {
        self.commands.push(Command::Call(Box::new(call)));
    }

    /// Work queued for the next flush.
    #[must_use]
    pub const fn pending_commands(&self) -> &CommandQueue {
        &self.commands
    }

    /// Number of completed calls to [`update`](Self::update).
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Run one frame: every system's `update` in attachment order, then
    /// destruction of expired entities, then the deferred flush.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a running system.
    pub fn update(&mut self, dt: f32) {
        assert!(!self.running, "Registry::update called while systems are running");
        self.run_systems(dt);

        let expired = self.expired.len();
        let mut sweep = std::mem::take(&mut self.expired);
        for entity in sweep.drain(..) {
            self.erase(entity);
        }
        // Keep the allocation; anything marked during the sweep is retained
        sweep.append(&mut self.expired);
        self.expired = sweep;

        let commands = self.flush();
        trace!(frame = self.frame, expired, commands, "frame flushed");
        self.frame += 1;
    }

    fn run_systems(&mut self, dt: f32) {
        self.running = true;

        // Systems attached during this loop first run next frame
        let count = self.systems.len();
        for index in 0..count {
            let slot = &mut self.systems[index];
            let Some(mut system) = slot.system.take() else {
                continue;
            };
            let entities = slot.base.take_entities();

            system.update(self, &entities, dt);

            let slot = &mut self.systems[index];
            slot.base.restore_entities(entities);
            slot.system = Some(system);
        }

        self.running = false;
    }

    /// Execute every queued command in order. Returns how many ran.
    ///
    /// Commands queued while flushing wait for the next flush.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a running system.
    pub fn flush(&mut self) -> usize {
        assert!(!self.running, "Registry::flush called while systems are running");
        let commands = self.commands.take();
        let count = commands.len();
        for command in commands {
            self.apply(command);
        }
        count
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::ComponentAdded { entity, component } => {
                self.on_component_added(entity, component);
            }
            Command::ComponentRemoved { entity, component } => {
                self.on_component_removed(entity, component);
            }
            Command::EntityErased { entity } => {
                if self.remove_all_components(entity, true) {
                    self.signatures[entity.index()] = None;
                    self.alive -= 1;
                }
            }
            Command::ComponentsErased { entity } => {
                self.remove_all_components(entity, false);
            }
            Command::ForceCheck { entity } => self.force_check(entity),
            Command::Call(call) => call(self),
        }
    }

    fn set_signature(&mut self, entity: Entity, signature: Signature) {
        self.signatures[entity.index()] = Some(signature);
    }

    fn on_component_added(&mut self, entity: Entity, component: ComponentId) {
        let Some(old) = self.signature(entity) else {
            return;
        };
        if old.test(component) {
            return;
        }
        let new = old.with(component);
        self.set_signature(entity, new);

        for index in 0..self.systems.len() {
            let base = &mut self.systems[index].base;
            let hook = if base.contains(entity) {
                Some(Hook::OptionalAdded)
            } else if base.matches(new) && base.add_entity(entity) {
                Some(Hook::EntityAdded)
            } else {
                None
            };
            if let Some(hook) = hook {
                self.call_hook(index, hook, entity);
            }
        }
    }

    fn on_component_removed(&mut self, entity: Entity, component: ComponentId) {
        let Some(old) = self.signature(entity) else {
            return;
        };
        if !old.test(component) {
            return;
        }
        let new = old.without(component);
        self.set_signature(entity, new);

        for index in 0..self.systems.len() {
            let base = &mut self.systems[index].base;
            // Matching `new` implies matching `old`
            let hook = if base.matches(new) {
                base.contains(entity).then_some(Hook::OptionalRemoved)
            } else if base.remove_entity(entity) {
                Some(Hook::EntityRemoved)
            } else {
                None
            };
            if let Some(hook) = hook {
                self.call_hook(index, hook, entity);
            }
        }

        // Hooks above may still read the value
        if let Some(pool) = self.pools.get_mut(component.index()).and_then(Option::as_mut) {
            pool.erase(entity);
        }
    }

    /// Notify systems and drop every component of `entity`.
    ///
    /// With `forget`, every system that matched loses the entity; otherwise
    /// only systems that no longer match the empty signature do.
    fn remove_all_components(&mut self, entity: Entity, forget: bool) -> bool {
        let Some(old) = self.signature(entity) else {
            return false;
        };
        self.set_signature(entity, Signature::EMPTY);

        for index in 0..self.systems.len() {
            let base = &mut self.systems[index].base;
            let leaves = base.matches(old) && (forget || !base.matches(Signature::EMPTY));
            if leaves && base.remove_entity(entity) {
                self.call_hook(index, Hook::EntityRemoved, entity);
            }
        }

        for pool in self.pools.iter_mut().flatten() {
            pool.erase(entity);
        }
        true
    }

    fn call_hook(&mut self, index: usize, hook: Hook, entity: Entity) {
        let Some(mut system) = self.systems[index].system.take() else {
            return;
        };

        match hook {
            Hook::EntityAdded => system.on_entity_added(self, entity),
            Hook::EntityRemoved => system.on_entity_removed(self, entity),
            Hook::OptionalAdded => system.on_optional_component_added(self, entity),
            Hook::OptionalRemoved => system.on_optional_component_removed(self, entity),
        }

        self.systems[index].system = Some(system);
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entities", &self.alive)
            .field("prefabs", &self.prefabs.len())
            .field("components", &self.components.len())
            .field("systems", &self.systems.len())
            .field("pending_commands", &self.commands.len())
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Name(String);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Lifetime(f32);

    /// Shared log of hook calls, so tests can inspect what a system saw.
    type Log = Rc<RefCell<Vec<String>>>;

    struct Movement {
        log: Log,
    }

    impl System for Movement {
        type Required = (Position, Velocity);

        fn update(&mut self, registry: &mut Registry, entities: &[Entity], dt: f32) {
            for &entity in entities {
                let Some(&velocity) = registry.get::<Velocity>(entity) else {
                    continue;
                };
                let position = registry.get_unchecked_mut::<Position>(entity);
                position.x += velocity.x * dt;
                position.y += velocity.y * dt;
            }
        }

        fn on_attached(&mut self, _registry: &mut Registry) {
            self.log.borrow_mut().push("attached".into());
        }

        fn on_detached(&mut self) {
            self.log.borrow_mut().push("detached".into());
        }

        fn on_entity_added(&mut self, _registry: &Registry, entity: Entity) {
            self.log.borrow_mut().push(format!("added {entity}"));
        }

        fn on_entity_removed(&mut self, registry: &Registry, entity: Entity) {
            let x = registry.get::<Position>(entity).map(|p| p.x);
            self.log
                .borrow_mut()
                .push(format!("removed {entity} x={x:?}"));
        }

        fn on_optional_component_added(&mut self, _registry: &Registry, entity: Entity) {
            self.log.borrow_mut().push(format!("optional+ {entity}"));
        }

        fn on_optional_component_removed(&mut self, _registry: &Registry, entity: Entity) {
            self.log.borrow_mut().push(format!("optional- {entity}"));
        }
    }

    fn movement() -> (Movement, Log) {
        let log = Log::default();
        (Movement { log: log.clone() }, log)
    }

    struct Expiry;

    impl System for Expiry {
        type Required = (Lifetime,);

        fn update(&mut self, registry: &mut Registry, entities: &[Entity], dt: f32) {
            for &entity in entities {
                let lifetime = registry.get_unchecked_mut::<Lifetime>(entity);
                lifetime.0 -= dt;
                if lifetime.0 <= 0.0 {
                    registry.mark_as_expired(entity);
                }
            }
        }
    }

    #[test]
    fn test_create_entity() {
        let mut registry = Registry::new();

        let e1 = registry.create_entity();
        let e2 = registry.create_entity();

        assert_eq!(e1.id(), 1);
        assert_eq!(e2.id(), 2);
        assert!(registry.is_alive(e1));
        assert!(!registry.is_alive(Entity::NULL));
        assert_eq!(registry.signature(e1), Some(Signature::EMPTY));
        assert_eq!(registry.entity_count(), 2);
        assert_eq!(registry.entities().collect::<Vec<_>>(), vec![e1, e2]);
    }

    #[test]
    fn test_emplace_and_get() {
        let mut registry = Registry::new();
        let entity = registry.create_entity();

        let stored = registry.emplace(entity, Position { x: 1.0, y: 2.0 });
        stored.x = 5.0;

        assert_eq!(
            registry.get::<Position>(entity),
            Some(&Position { x: 5.0, y: 2.0 })
        );
        assert!(registry.get::<Velocity>(entity).is_none());

        // Signature catches up at the flush
        assert!(!registry.has::<Position>(entity));
        registry.update(0.0);
        assert!(registry.has::<Position>(entity));
    }

    #[test]
    fn test_erase_component() {
        let mut registry = Registry::new();
        let entity = registry.create_entity();
        registry.emplace(entity, Position { x: 0.0, y: 0.0 });
        registry.emplace(entity, Name("crate".into()));
        registry.update(0.0);

        registry.erase_component::<Position>(entity);
        // Still present until the flush
        assert!(registry.get::<Position>(entity).is_some());

        registry.update(0.0);
        assert!(registry.get::<Position>(entity).is_none());
        assert!(!registry.has::<Position>(entity));
        assert!(registry.has::<Name>(entity));
        assert!(registry.is_alive(entity));
    }

    #[test]
    fn test_erase_unknown_component_is_noop() {
        let mut registry = Registry::new();
        let entity = registry.create_entity();

        registry.erase_component::<Velocity>(entity);
        assert!(registry.pending_commands().is_empty());
    }

    #[test]
    fn test_erase_entity() {
        let mut registry = Registry::new();
        let entity = registry.create_entity();
        let other = registry.create_entity();
        registry.emplace(entity, Position { x: 0.0, y: 0.0 });
        registry.emplace(other, Position { x: 1.0, y: 0.0 });
        registry.update(0.0);

        registry.erase(entity);
        assert!(registry.is_alive(entity));

        registry.update(0.0);
        assert!(!registry.is_alive(entity));
        assert!(registry.get::<Position>(entity).is_none());
        assert_eq!(
            registry.get::<Position>(other),
            Some(&Position { x: 1.0, y: 0.0 })
        );
        assert_eq!(registry.entity_count(), 1);

        // A fresh entity never reuses the id
        assert!(registry.create_entity().id() > entity.id());
    }

    #[test]
    fn test_erase_components_keeps_entity() {
        let mut registry = Registry::new();
        let entity = registry.create_entity();
        registry.emplace(entity, Position { x: 0.0, y: 0.0 });
        registry.emplace(entity, Velocity { x: 0.0, y: 0.0 });
        registry.update(0.0);

        registry.erase_components(entity);
        registry.update(0.0);

        assert!(registry.is_alive(entity));
        assert_eq!(registry.signature(entity), Some(Signature::EMPTY));
        assert!(registry.get::<Position>(entity).is_none());
        assert!(registry.get::<Velocity>(entity).is_none());
    }

    #[test]
    fn test_has_all() {
        let mut registry = Registry::new();
        let entity = registry.create_entity();
        registry.emplace(entity, Position { x: 0.0, y: 0.0 });
        registry.emplace(entity, Velocity { x: 0.0, y: 0.0 });
        registry.update(0.0);

        assert!(registry.has_all::<(Position, Velocity)>(entity));
        assert!(!registry.has_all::<(Position, Name)>(entity));
        assert!(registry.has_all::<()>(entity));
        assert!(!registry.has_all::<()>(Entity::NULL));
    }

    #[test]
    fn test_attach_populates_existing_entities() {
        let mut registry = Registry::new();
        let moving = registry.create_entity();
        let still = registry.create_entity();
        registry.emplace(moving, Position { x: 0.0, y: 0.0 });
        registry.emplace(moving, Velocity { x: 1.0, y: 0.0 });
        registry.emplace(still, Position { x: 0.0, y: 0.0 });
        registry.update(0.0);

        let (system, log) = movement();
        registry.attach(system);

        assert_eq!(registry.members::<Movement>(), Some(&[moving][..]));
        assert_eq!(
            *log.borrow(),
            vec![format!("added {moving}"), "attached".to_owned()]
        );
    }

    #[test]
    fn test_attach_is_idempotent() {
        let mut registry = Registry::new();
        let entity = registry.create_entity();
        registry.emplace(entity, Position { x: 0.0, y: 0.0 });
        registry.emplace(entity, Velocity { x: 0.0, y: 0.0 });
        registry.update(0.0);

        let (first, log) = movement();
        let first_ptr: *const Movement = registry.attach(first);

        let mut constructed = false;
        let second_ptr: *const Movement = registry.attach_with(|| {
            constructed = true;
            movement().0
        });

        assert_eq!(first_ptr, second_ptr);
        assert!(!constructed);
        assert_eq!(registry.systems().count(), 1);
        assert_eq!(registry.members::<Movement>().map(<[Entity]>::len), Some(1));
        let attached = log.borrow().iter().filter(|l| *l == "attached").count();
        assert_eq!(attached, 1);
    }

    #[test]
    fn test_optional_component_hooks() {
        let mut registry = Registry::new();
        let (system, log) = movement();
        registry.attach(system);

        let entity = registry.create_entity();
        registry.emplace(entity, Position { x: 0.0, y: 0.0 });
        registry.emplace(entity, Velocity { x: 0.0, y: 0.0 });
        registry.update(0.0);

        registry.emplace(entity, Name("extra".into()));
        registry.update(0.0);
        registry.erase_component::<Name>(entity);
        registry.update(0.0);

        assert_eq!(
            *log.borrow(),
            vec![
                "attached".to_owned(),
                format!("added {entity}"),
                format!("optional+ {entity}"),
                format!("optional- {entity}"),
            ]
        );
        assert_eq!(registry.members::<Movement>(), Some(&[entity][..]));
    }

    #[test]
    fn test_removal_hook_reads_final_value() {
        let mut registry = Registry::new();
        let (system, log) = movement();
        registry.attach(system);

        let entity = registry.create_entity();
        registry.emplace(entity, Position { x: 42.0, y: 0.0 });
        registry.emplace(entity, Velocity { x: 0.0, y: 0.0 });
        registry.update(0.0);

        registry.erase_component::<Position>(entity);
        registry.update(0.0);

        assert_eq!(
            log.borrow().last().map(String::as_str),
            Some(format!("removed {entity} x=Some(42.0)").as_str())
        );
        assert!(registry.members::<Movement>().unwrap().is_empty());
        assert!(registry.get::<Position>(entity).is_none());
    }

    #[test]
    fn test_systems_move_entities() {
        let mut registry = Registry::new();
        registry.attach(movement().0);

        let entity = registry.create_entity();
        registry.emplace(entity, Position { x: 0.0, y: 0.0 });
        registry.emplace(entity, Velocity { x: 2.0, y: -1.0 });

        registry.update(1.0);
        // Joined at the end of the first frame, so it has not moved yet
        assert_eq!(
            registry.get::<Position>(entity),
            Some(&Position { x: 0.0, y: 0.0 })
        );

        registry.update(0.5);
        assert_eq!(
            registry.get::<Position>(entity),
            Some(&Position { x: 1.0, y: -0.5 })
        );
        assert_eq!(registry.frame(), 2);
    }

    #[test]
    fn test_mark_as_expired() {
        let mut registry = Registry::new();
        registry.attach(Expiry);

        let short = registry.create_entity();
        let long = registry.create_entity();
        registry.emplace(short, Lifetime(1.0));
        registry.emplace(long, Lifetime(10.0));
        registry.update(0.0);

        registry.update(1.5);

        assert!(!registry.is_alive(short));
        assert!(registry.is_alive(long));
        assert!(registry.expired().is_empty());
        assert_eq!(registry.members::<Expiry>(), Some(&[long][..]));
    }

    #[test]
    fn test_erase_system() {
        let mut registry = Registry::new();
        let (system, log) = movement();
        registry.attach(system);
        registry.attach(Expiry);

        assert!(registry.erase_system::<Movement>());
        assert!(!registry.erase_system::<Movement>());
        assert!(registry.system::<Movement>().is_none());
        assert!(registry.system::<Expiry>().is_some());
        assert_eq!(log.borrow().last().map(String::as_str), Some("detached"));

        // Index of the remaining system is still valid
        let entity = registry.create_entity();
        registry.emplace(entity, Lifetime(5.0));
        registry.update(0.0);
        assert_eq!(registry.members::<Expiry>(), Some(&[entity][..]));
    }

    #[test]
    fn test_system_lookup() {
        let mut registry = Registry::new();
        assert!(registry.system::<Movement>().is_none());

        registry.attach(movement().0);
        assert!(registry.system::<Movement>().is_some());
        assert!(registry.system_mut::<Movement>().is_some());

        let base = registry.system_base::<Movement>().unwrap();
        let position = registry.component_id::<Position>().unwrap();
        let velocity = registry.component_id::<Velocity>().unwrap();
        assert_eq!(base.signature(), Signature::EMPTY.with(position).with(velocity));
    }

    #[test]
    fn test_prefab_lookup() {
        let mut registry = Registry::new();

        let player = registry.create_prefab("Player");
        assert_eq!(registry.prefab("Player"), player);
        assert_eq!(registry.prefab("Enemy"), Entity::NULL);
        assert!(!registry.is_alive(player));

        // Name collisions overwrite
        let replacement = registry.create_prefab("Player");
        assert_eq!(registry.prefab("Player"), replacement);
        assert_ne!(player, replacement);
    }

    #[test]
    fn test_prefab_instantiation() {
        let mut registry = Registry::new();
        let (system, _log) = movement();
        registry.attach(system);

        registry.emplace_prefab("Ball", Position { x: 3.0, y: 4.0 });
        registry.insert_prefab("Ball", Velocity { x: 1.0, y: 0.0 });
        let prefab = registry.prefab("Ball");
        registry.update(0.0);
        assert!(registry.members::<Movement>().unwrap().is_empty());

        let ball = registry.create_entity();
        let copied = registry.copy_all_silent::<(Position, Velocity, Name)>(ball, prefab);
        assert_eq!(copied, 2);
        assert!(registry.has_all::<(Position, Velocity)>(ball));
        assert!(registry.pending_commands().is_empty());

        registry.force_check(ball);
        assert_eq!(registry.members::<Movement>(), Some(&[ball][..]));

        // Forcing again does not duplicate membership
        registry.force_check(ball);
        assert_eq!(registry.members::<Movement>().map(<[Entity]>::len), Some(1));

        // The template is untouched
        assert_eq!(
            registry.get::<Position>(prefab),
            Some(&Position { x: 3.0, y: 4.0 })
        );
    }

    #[test]
    fn test_copy_notifies_at_flush() {
        let mut registry = Registry::new();
        registry.attach(movement().0);

        registry.emplace_prefab("Ball", Position { x: 3.0, y: 4.0 });
        registry.emplace_prefab("Ball", Velocity { x: 1.0, y: 0.0 });
        let prefab = registry.prefab("Ball");

        let ball = registry.create_entity();
        assert!(registry.copy::<Position>(ball, prefab));
        assert!(!registry.copy::<Name>(ball, prefab));
        assert_eq!(registry.copy_all::<(Velocity,)>(ball, prefab), 1);
        assert!(registry.members::<Movement>().unwrap().is_empty());

        registry.update(0.0);
        assert_eq!(registry.members::<Movement>(), Some(&[ball][..]));
    }

    #[test]
    fn test_defer_runs_at_flush() {
        let mut registry = Registry::new();
        let entity = registry.create_entity();

        registry.defer(move |registry| {
            registry.emplace(entity, Name("deferred".into()));
        });
        assert!(registry.get::<Name>(entity).is_none());

        registry.update(0.0);
        assert!(registry.get::<Name>(entity).is_some());
        // Its own notification was queued during the flush: next frame
        assert!(!registry.has::<Name>(entity));
        assert_eq!(registry.pending_commands().len(), 1);

        registry.update(0.0);
        assert!(registry.has::<Name>(entity));
    }

    #[test]
    fn test_each_visits_pool() {
        let mut registry = Registry::new();
        for i in 0..3 {
            let entity = registry.create_entity();
            registry.emplace(entity, Lifetime(i as f32));
        }

        registry.each_mut::<Lifetime>(|_, lifetime| lifetime.0 += 1.0);

        let mut total = 0.0;
        registry.each::<Lifetime>(|_, lifetime| total += lifetime.0);
        assert_eq!(total, 6.0);

        // Unknown component types are simply empty
        registry.each::<Name>(|_, _| panic!("no names stored"));
    }

    #[test]
    #[should_panic(expected = "already has")]
    fn test_double_emplace_panics() {
        let mut registry = Registry::new();
        let entity = registry.create_entity();
        registry.emplace(entity, Lifetime(1.0));
        registry.emplace(entity, Lifetime(2.0));
    }

    #[test]
    fn test_context_is_shared() {
        struct Pause;

        impl System for Pause {
            type Required = ();

            fn update(&mut self, registry: &mut Registry, _entities: &[Entity], _dt: f32) {
                registry.context.game_state = crate::GameState::Paused;
            }
        }

        let mut registry = Registry::new();
        registry.attach(Pause);
        registry.update(0.0);

        assert_eq!(registry.context.game_state, crate::GameState::Paused);
    }

    struct Everything;

    impl System for Everything {
        type Required = ();

        fn update(&mut self, _registry: &mut Registry, _entities: &[Entity], _dt: f32) {}
    }

    #[test]
    fn test_empty_signature_system_gains_new_entities() {
        let mut registry = Registry::new();
        let early = registry.create_entity();
        registry.attach(Everything);
        assert_eq!(registry.members::<Everything>(), Some(&[early][..]));

        let late = registry.create_entity();
        let bare = registry.create_entity();
        registry.emplace(late, Position { x: 0.0, y: 0.0 });
        registry.update(0.0);

        let mut members = registry.members::<Everything>().unwrap().to_vec();
        members.sort();
        assert_eq!(members, vec![early, late, bare]);

        // Components are not needed to join
        let empty = registry.create_entity();
        registry.update(0.0);
        assert!(registry.members::<Everything>().unwrap().contains(&empty));
    }

    #[test]
    fn test_emplace_after_silent_insert_admits_entity() {
        let mut registry = Registry::new();
        registry.attach(movement().0);

        let entity = registry.create_entity();
        registry.insert_silent(entity, Position { x: 0.0, y: 0.0 });
        registry.insert_silent(entity, Velocity { x: 0.0, y: 0.0 });
        registry.emplace(entity, Lifetime(1.0));
        registry.update(0.0);

        assert_eq!(registry.members::<Movement>(), Some(&[entity][..]));
    }

    #[test]
    fn test_on_attached_may_erase_earlier_system() {
        struct Replacer;

        impl System for Replacer {
            type Required = (Lifetime,);

            fn update(&mut self, _registry: &mut Registry, _entities: &[Entity], _dt: f32) {}

            fn on_attached(&mut self, registry: &mut Registry) {
                assert!(registry.erase_system::<Expiry>());
            }
        }

        let mut registry = Registry::new();
        let entity = registry.create_entity();
        registry.emplace(entity, Lifetime(3.0));
        registry.update(0.0);

        registry.attach(Expiry);
        registry.attach(Everything);
        let replacer: *const Replacer = registry.attach(Replacer);

        assert!(registry.system::<Expiry>().is_none());
        assert_eq!(registry.system::<Replacer>().map(|r| r as *const Replacer), Some(replacer));
        assert!(registry.system::<Everything>().is_some());
        assert_eq!(registry.members::<Replacer>(), Some(&[entity][..]));

        let names: Vec<&str> = registry.systems().map(SystemBase::name).collect();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("Everything"));
        assert!(names[1].ends_with("Replacer"));

        registry.update(1.0);
        assert_eq!(registry.get::<Lifetime>(entity), Some(&Lifetime(3.0)));
    }

    #[test]
    #[should_panic(expected = "while systems are running")]
    fn test_update_inside_system_panics() {
        struct Nested;

        impl System for Nested {
            type Required = ();

            fn update(&mut self, registry: &mut Registry, _entities: &[Entity], dt: f32) {
                registry.update(dt);
            }
        }

        let mut registry = Registry::new();
        registry.attach(Nested);
        registry.update(0.0);
    }

    #[test]
    fn test_get_unchecked_mut_unknown_type_registers_nothing() {
        let mut registry = Registry::new();
        let entity = registry.create_entity();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.get_unchecked_mut::<Name>(entity);
        }));

        assert!(result.is_err());
        assert!(registry.component_id::<Name>().is_none());
        assert!(registry.components().is_empty());
    }
}
