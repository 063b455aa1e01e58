use braid_core::types::VertexHash;
use braid_core::vertex::{Vertex, VertexLike};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Everything the node announces to in-process subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The manager finished startup (genesis and replay included).
    ManagerStart,
    ManagerStop,

    /// A vertex passed validation and was integrated.
    Accepted { vertex: Arc<Vertex> },

    /// An integrated vertex left the executed state, or its void reasons
    /// changed while it stayed voided.
    Voided {
        vertex: VertexHash,
        voided_by: BTreeSet<VertexHash>,
    },

    /// A previously voided vertex is executed again.
    Unvoided { vertex: VertexHash },

    ReorgStarted {
        old_best_block: VertexHash,
        new_best_block: VertexHash,
        common_block: VertexHash,
    },

    /// `reorg_size` is the number of blocks that left the best chain.
    ReorgFinished { reorg_size: usize },
}

/// Discriminant used to key subscriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ManagerStart,
    ManagerStop,
    Accepted,
    Voided,
    Unvoided,
    ReorgStarted,
    ReorgFinished,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::ManagerStart,
        EventKind::ManagerStop,
        EventKind::Accepted,
        EventKind::Voided,
        EventKind::Unvoided,
        EventKind::ReorgStarted,
        EventKind::ReorgFinished,
    ];
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ManagerStart => EventKind::ManagerStart,
            Event::ManagerStop => EventKind::ManagerStop,
            Event::Accepted { .. } => EventKind::Accepted,
            Event::Voided { .. } => EventKind::Voided,
            Event::Unvoided { .. } => EventKind::Unvoided,
            Event::ReorgStarted { .. } => EventKind::ReorgStarted,
            Event::ReorgFinished { .. } => EventKind::ReorgFinished,
        }
    }

    /// The vertex an event is about, if any.
    pub fn vertex_hash(&self) -> Option<VertexHash> {
        match self {
            Event::Accepted { vertex } => Some(vertex.hash()),
            Event::Voided { vertex, .. } | Event::Unvoided { vertex } => Some(*vertex),
            _ => None,
        }
    }
}
