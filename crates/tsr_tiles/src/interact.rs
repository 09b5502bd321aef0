//! Tile interaction dispatch.
//!
//! A tile's role is decided by its flags, checked in [`INTERACTION_ORDER`];
//! the first flag that is set decides the outcome even when several are set.
//!
//! | flag          | outcome                                              |
//! |---------------|------------------------------------------------------|
//! | `STATIC_NPC`  | [`Interaction::Say`] with `lines_to_say`             |
//! | `TELEPORTER`  | [`Interaction::Teleport`] to `teleport_map`          |
//! | `CUSTOM_CODE` | handler registered under `function`, if any          |
//!
//! Custom handlers are plain closures registered in a [`HandlerRegistry`] at
//! startup. A missing or unregistered handler is a soft failure: dispatch
//! logs a warning and returns `None`.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::flags::TileFlags;
use crate::metadata::TileMetadata;

/// Flags consulted by [`dispatch`], highest priority first.
pub const INTERACTION_ORDER: [TileFlags; 3] = [
    TileFlags::STATIC_NPC,
    TileFlags::TELEPORTER,
    TileFlags::CUSTOM_CODE,
];

#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Say(Vec<String>),
    Teleport {
        map: String,
        position: Option<(i64, i64)>,
    },
    Custom(Value),
}

pub type Handler = Box<dyn Fn(&InteractionContext<'_>, &TileMetadata) -> Option<Value>>;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&InteractionContext<'_>, &TileMetadata) -> Option<Value> + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// What a handler gets to see about the interaction.
#[derive(Debug, Clone, Copy)]
pub struct InteractionContext<'a> {
    pub handlers: &'a HandlerRegistry,
    /// `(x, y)` in tiles.
    pub position: (u32, u32),
    pub layer: usize,
}

impl<'a> InteractionContext<'a> {
    pub fn new(handlers: &'a HandlerRegistry) -> Self {
        Self {
            handlers,
            position: (0, 0),
            layer: 0,
        }
    }

    pub fn at(self, x: u32, y: u32, layer: usize) -> Self {
        Self {
            position: (x, y),
            layer,
            ..self
        }
    }
}

pub fn dispatch(
    flags: TileFlags,
    metadata: &TileMetadata,
    ctx: &InteractionContext<'_>,
) -> Option<Interaction> {
    let role = INTERACTION_ORDER
        .into_iter()
        .find(|flag| flags.contains(*flag))?;

    if role == TileFlags::STATIC_NPC {
        return Some(Interaction::Say(metadata.lines_to_say().unwrap_or_default()));
    }

    if role == TileFlags::TELEPORTER {
        let Some(map) = metadata.teleport_map() else {
            log::warn!("Teleporter at {:?} has no teleport_map", ctx.position);
            return None;
        };
        return Some(Interaction::Teleport {
            map: map.to_string(),
            position: metadata.teleport_pos(),
        });
    }

    let Some(name) = metadata.function() else {
        log::warn!(
            "Custom-code tile at {:?} has no function name",
            ctx.position
        );
        return None;
    };
    let Some(handler) = ctx.handlers.get(name) else {
        log::warn!(
            "No handler registered for '{}' (tile at {:?})",
            name,
            ctx.position
        );
        return None;
    };
    handler(ctx, metadata).map(Interaction::Custom)
}
