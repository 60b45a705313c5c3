//! Component type registration and metadata.
//!
//! Components are plain data types attached to entities. Each component type
//! gets a small sequential [`ComponentId`] the first time a registry sees it;
//! that id indexes both the registry's pool array and every [`Signature`].

use std::{any::TypeId, fmt};

use rustc_hash::FxHashMap;

use crate::signature::{SIGNATURE_BITS, Signature};

/// Marker trait for types that can be used as components.
///
/// The registry is single-threaded, so no `Send`/`Sync` bound is required.
pub trait Component: 'static {}

// Blanket implementation for all suitable types
impl<T: 'static> Component for T {}

/// Unique identifier for a component type within one registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Create a component ID from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Index into per-type arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// Runtime information about a component type.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    id: ComponentId,
    name: &'static str,
    type_id: TypeId,
}

impl ComponentInfo {
    /// Create component info for a concrete type.
    #[must_use]
    pub fn of<T: Component>(id: ComponentId) -> Self {
        Self {
            id,
            name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// Type name for debugging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Check if this info is for the given type.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Registry for component types.
///
/// Maps Rust types to sequential `ComponentId`s, in order of first use.
/// Scoped to one [`Registry`](crate::Registry) so independent registries in
/// the same process each get the full signature width.
#[derive(Default)]
pub struct ComponentRegistry {
    type_to_id: FxHashMap<TypeId, ComponentId>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type and return its ID.
    ///
    /// If the type is already registered, returns the existing ID.
    ///
    /// # Panics
    ///
    /// Panics when registering more component types than a [`Signature`]
    /// has bits.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        let type_id = TypeId::of::<T>();

        if let Some(&id) = self.type_to_id.get(&type_id) {
            return id;
        }

        assert!(
            self.infos.len() < SIGNATURE_BITS,
            "component capacity exceeded: cannot register `{}`, a signature holds {} types",
            std::any::type_name::<T>(),
            SIGNATURE_BITS,
        );

        let id = ComponentId(self.infos.len() as u32);
        self.type_to_id.insert(type_id, id);
        self.infos.push(ComponentInfo::of::<T>(id));

        id
    }

    /// Get the component ID for a type, if registered.
    #[must_use]
    pub fn get_id<T: Component>(&self) -> Option<ComponentId> {
        self.type_to_id.get(&TypeId::of::<T>()).copied()
    }

    /// Get component info by ID.
    #[must_use]
    pub fn get_info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    /// Get the number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Iterate over all registered component infos, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }

    /// Register every member of `S` and return their combined signature.
    pub fn signature_of<S: ComponentSet>(&mut self) -> Signature {
        struct Register<'a> {
            registry: &'a mut ComponentRegistry,
            signature: Signature,
        }

        impl ComponentVisitor for Register<'_> {
            fn visit<T: Component>(&mut self) {
                let id = self.registry.register::<T>();
                self.signature.set(id);
            }
        }

        let mut visitor = Register {
            registry: self,
            signature: Signature::EMPTY,
        };
        S::for_each(&mut visitor);
        visitor.signature
    }

    /// Combined signature of `S` without registering anything.
    ///
    /// Returns `None` if any member of `S` has never been registered.
    #[must_use]
    pub fn lookup_signature<S: ComponentSet>(&self) -> Option<Signature> {
        struct Lookup<'a> {
            registry: &'a ComponentRegistry,
            signature: Option<Signature>,
        }

        impl ComponentVisitor for Lookup<'_> {
            fn visit<T: Component>(&mut self) {
                self.signature = match (self.signature, self.registry.get_id::<T>()) {
                    (Some(signature), Some(id)) => Some(signature.with(id)),
                    _ => None,
                };
            }
        }

        let mut visitor = Lookup {
            registry: self,
            signature: Some(Signature::EMPTY),
        };
        S::for_each(&mut visitor);
        visitor.signature
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("count", &self.len())
            .field("components", &self.infos)
            .finish()
    }
}

/// Callback invoked once per member type of a [`ComponentSet`].
pub trait ComponentVisitor {
    fn visit<T: Component>(&mut self);
}

/// Callback invoked once per member type of a [`CloneSet`].
pub trait CloneVisitor {
    fn visit<T: Component + Clone>(&mut self);
}

/// A static list of component types, written as a tuple.
///
/// Used to declare which components a system requires and which components
/// `has_all`/`copy_all` operate on. `()` is the empty set.
pub trait ComponentSet: 'static {
    /// Call `visitor` once per member, in declaration order.
    fn for_each<V: ComponentVisitor>(visitor: &mut V);
}

/// A [`ComponentSet`] whose members can all be cloned.
pub trait CloneSet: ComponentSet {
    /// Call `visitor` once per member, in declaration order.
    fn for_each_clone<V: CloneVisitor>(visitor: &mut V);
}

impl ComponentSet for () {
    fn for_each<V: ComponentVisitor>(_visitor: &mut V) {}
}

impl CloneSet for () {
    fn for_each_clone<V: CloneVisitor>(_visitor: &mut V) {}
}

macro_rules! impl_component_set {
    ($($name:ident),+) => {
        impl<$($name: Component),+> ComponentSet for ($($name,)+) {
            fn for_each<V: ComponentVisitor>(visitor: &mut V) {
                $(visitor.visit::<$name>();)+
            }
        }

        impl<$($name: Component + Clone),+> CloneSet for ($($name,)+) {
            fn for_each_clone<V: CloneVisitor>(visitor: &mut V) {
                $(visitor.visit::<$name>();)+
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);
impl_component_set!(A, B, C, D, E, F, G);
impl_component_set!(A, B, C, D, E, F, G, H);
impl_component_set!(A, B, C, D, E, F, G, H, I);
impl_component_set!(A, B, C, D, E, F, G, H, I, J);
impl_component_set!(A, B, C, D, E, F, G, H, I, J, K);
impl_component_set!(A, B, C, D, E, F, G, H, I, J, K, L);
