//! Deferred structural work.
//!
//! Component additions and removals made during a frame are not applied to
//! system membership right away. They are recorded as [`Command`]s and
//! executed in order at the end of [`Registry::update`](crate::Registry::update).

use std::fmt;

use crate::{component::ComponentId, entity::Entity, registry::Registry};

/// A unit of deferred work.
pub enum Command {
    /// A component was stored; set its signature bit and notify systems.
    ComponentAdded {
        entity: Entity,
        component: ComponentId,
    },
    /// Notify systems, clear the signature bit, then drop the value.
    ComponentRemoved {
        entity: Entity,
        component: ComponentId,
    },
    /// Remove every component and forget the entity.
    EntityErased { entity: Entity },
    /// Remove every component but keep the entity alive.
    ComponentsErased { entity: Entity },
    /// Re-run membership matching for an entity.
    ForceCheck { entity: Entity },
    /// Arbitrary deferred call.
    Call(Box<dyn FnOnce(&mut Registry)>),
}

impl Command {
    /// The entity this command targets, if any.
    #[must_use]
    pub fn entity(&self) -> Option<Entity> {
        match self {
            Self::ComponentAdded { entity, .. }
            | Self::ComponentRemoved { entity, .. }
            | Self::EntityErased { entity }
            | Self::ComponentsErased { entity }
            | Self::ForceCheck { entity } => Some(*entity),
            Self::Call(_) => None,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ComponentAdded { entity, component } => f
                .debug_struct("ComponentAdded")
                .field("entity", entity)
                .field("component", component)
                .finish(),
            Self::ComponentRemoved { entity, component } => f
                .debug_struct("ComponentRemoved")
                .field("entity", entity)
                .field("component", component)
                .finish(),
            Self::EntityErased { entity } => f
                .debug_struct("EntityErased")
                .field("entity", entity)
                .finish(),
            Self::ComponentsErased { entity } => f
                .debug_struct("ComponentsErased")
                .field("entity", entity)
                .finish(),
            Self::ForceCheck { entity } => {
                f.debug_struct("ForceCheck").field("entity", entity).finish()
            }
            Self::Call(_) => f.debug_tuple("Call").finish_non_exhaustive(),
        }
    }
}

/// FIFO of deferred commands.
#[derive(Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    /// Create a new empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Commands in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Move every queued command out, leaving the queue empty.
    ///
    /// Anything pushed afterwards lands in the now-empty queue.
    pub fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.commands).finish()
    }
}
