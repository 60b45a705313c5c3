//! Shared per-registry scratch state readable and writable by every system.

use std::{fmt, str::FromStr};

use crate::{
    entity::Entity,
    error::{ContentError, ContentResult},
};

/// High-level state of the running game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GameState {
    #[default]
    Playing,
    GameOver,
    Paused,
    Quit,
}

impl GameState {
    /// Name used in content files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Playing => "PLAYING",
            Self::GameOver => "GAME_OVER",
            Self::Paused => "PAUSED",
            Self::Quit => "QUIT",
        }
    }
}

impl FromStr for GameState {
    type Err = ContentError;

    fn from_str(s: &str) -> ContentResult<Self> {
        match s {
            "PLAYING" => Ok(Self::Playing),
            "GAME_OVER" => Ok(Self::GameOver),
            "PAUSED" => Ok(Self::Paused),
            "QUIT" => Ok(Self::Quit),
            _ => Err(ContentError::InvalidVariant {
                kind: "GameState",
                value: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to the renderer owned by the platform layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RendererHandle(u64);

impl RendererHandle {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Plain configuration data shared by all systems through the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub game_state: GameState,
    /// The controlled entity, or [`Entity::NULL`] before one is spawned.
    pub player_entity: Entity,
    pub screen_width: f32,
    pub screen_height: f32,
    pub renderer: Option<RendererHandle>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            game_state: GameState::Playing,
            player_entity: Entity::NULL,
            screen_width: 800.0,
            screen_height: 600.0,
            renderer: None,
        }
    }
}
