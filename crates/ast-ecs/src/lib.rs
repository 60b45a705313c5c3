// Allow missing docs for now
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::iter_without_into_iter)]
#![allow(clippy::float_cmp)]

//! AST ECS - single-threaded Entity Component System for small 2D games
//!
//! One [`Registry`] owns everything. Entities are plain ids, each component
//! type lives in its own sparse-set pool, and systems run once per frame over
//! the entities whose [`Signature`] covers the components they require.
//!
//! # Key Concepts
//!
//! - **Entity**: A unique, never reused identifier for a game object
//! - **Component**: Any `'static` type attached to entities (e.g., Position, Velocity)
//! - **Signature**: 64-bit set of the component types an entity owns
//! - **System**: Per-frame logic plus membership hooks, keyed by its type
//! - **Prefab**: A named template entity, copied onto fresh entities
//!
//! # Frames
//!
//! [`Registry::update`] runs every system, destroys entities marked as
//! expired, then flushes deferred structural changes. Adding or removing a
//! component stores or drops the value immediately (removal at the flush),
//! while signature and membership updates wait for the flush:
//! ```ignore
//! let enemy = registry.create_entity();
//! registry.emplace(enemy, Position { x: 10.0, y: 0.0 });
//! assert!(!registry.has::<Position>(enemy)); // not yet flushed
//!
//! registry.update(dt);
//! assert!(registry.has::<Position>(enemy));
//! ```
//!
//! # Prefabs
//!
//! Prefabs hold component values without a signature, so no system ever
//! matches them. Instantiate with a silent copy and one membership check:
//! ```ignore
//! registry.emplace_prefab("Asteroid", Sprite::new("asteroid.png"));
//! let asteroid = registry.create_entity();
//! registry.copy_all_silent::<(Sprite, Collider)>(asteroid, registry.prefab("Asteroid"));
//! registry.force_check(asteroid);
//! ```

mod command;
mod component;
mod context;
mod entity;
mod error;
mod registry;
mod signature;
mod storage;
mod system;

pub use command::{Command, CommandQueue};
pub use component::{
    CloneSet, CloneVisitor, Component, ComponentId, ComponentInfo, ComponentRegistry, ComponentSet,
    ComponentVisitor,
};
pub use context::{Context, GameState, RendererHandle};
pub use entity::{Entity, EntityAllocator, EntityId};
pub use error::{ContentError, ContentResult};
pub use registry::Registry;
pub use signature::{SIGNATURE_BITS, Signature};
pub use storage::{ErasedPool, SparseSet};
pub use system::{System, SystemBase, SystemId};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Component, Context, Entity, GameState, Registry, Signature, System};
}
