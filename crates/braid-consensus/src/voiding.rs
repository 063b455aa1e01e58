//! Voided-state propagation.
//!
//! Two passes run after every integration. The conflict pass recomputes
//! `conflict_voided_by` (lost double-spends and everything built on them),
//! which decides which blocks may become best. The full pass, run once the
//! best chain is settled, recomputes `voided_by` by adding off-chain blocks
//! and orphaned transactions to the conflict marks.
//!
//! Both passes walk a worklist ordered by `(timestamp, hash)`. Every vertex is
//! strictly younger than its dependencies, so popping the minimum visits a
//! vertex only after everything it inherits from is final.

use braid_core::error::InvariantViolation;
use braid_core::metadata::VertexMetadata;
use braid_core::types::{Timestamp, VertexHash};
use braid_core::vertex::{Vertex, VertexLike};
use braid_storage::VertexStore;
use std::collections::BTreeSet;
use tracing::trace;

use crate::engine::fatal;

/// A vertex whose `voided_by` changed during the full pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoidChange {
    pub hash: VertexHash,
    pub voided_by: BTreeSet<VertexHash>,
}

pub(crate) fn metadata<'a>(store: &'a VertexStore, hash: &VertexHash) -> &'a VertexMetadata {
    match store.metadata(hash) {
        Some(m) => m,
        None => fatal(InvariantViolation::MissingMetadata(*hash)),
    }
}

fn vertex<'a>(store: &'a VertexStore, hash: &VertexHash) -> &'a Vertex {
    match store.get(hash) {
        Some(v) => v,
        None => fatal(InvariantViolation::DanglingParent(*hash)),
    }
}

/// Whether `a` beats `b` in a conflict: more accumulated work, then the
/// smaller hash.
pub fn outranks(store: &VertexStore, a: &VertexHash, b: &VertexHash) -> bool {
    let wa = metadata(store, a).accumulated_weight;
    let wb = metadata(store, b).accumulated_weight;
    wa > wb || (wa == wb && a < b)
}

/// Whether `hash` can still void its rivals: every conflict mark it carries
/// comes from its own conflict set. A rival that lost somewhere else
/// upstream spends nothing and voids nobody.
pub fn contends(store: &VertexStore, hash: &VertexHash) -> bool {
    let meta = metadata(store, hash);
    meta.conflict_voided_by.is_subset(&meta.conflict_with)
}

/// Contending rivals of `hash` that beat it.
pub fn conflict_own(store: &VertexStore, hash: &VertexHash) -> BTreeSet<VertexHash> {
    metadata(store, hash)
        .conflict_with
        .iter()
        .filter(|rival| contends(store, rival) && outranks(store, rival, hash))
        .copied()
        .collect()
}

/// `{hash}` for a block off the best chain, or for a transaction whose
/// confirming blocks all left it. Empty otherwise.
pub fn chain_own(store: &VertexStore, hash: &VertexHash) -> BTreeSet<VertexHash> {
    let orphaned = match vertex(store, hash) {
        Vertex::Block(_) => !store.is_on_best_chain(hash),
        Vertex::Transaction(_) => {
            let confirmed_by = &metadata(store, hash).confirmed_by;
            !confirmed_by.is_empty() && !confirmed_by.iter().any(|b| store.is_on_best_chain(b))
        }
    };
    if orphaned {
        BTreeSet::from([*hash])
    } else {
        BTreeSet::new()
    }
}

fn key(store: &VertexStore, hash: &VertexHash) -> (Timestamp, VertexHash) {
    (vertex(store, hash).timestamp(), *hash)
}

/// Children and spenders: everything that inherits void marks from `hash`.
fn dependents(store: &VertexStore, hash: &VertexHash) -> Vec<VertexHash> {
    let meta = metadata(store, hash);
    meta.children.iter().chain(meta.spenders()).copied().collect()
}

/// Recompute `conflict_voided_by` from `roots` forward. Roots are always
/// recomputed; other vertices only when a dependency or a rival changed.
/// Blocks whose conflict state flips enter or leave the best-block
/// candidates. Returns the vertices whose value changed.
///
/// Rivals are requeued because `conflict_own` reads their marks. A rival's
/// eligibility only depends on marks inherited from its own dependencies,
/// so the loop settles.
pub fn propagate_conflicts(
    store: &mut VertexStore,
    roots: impl IntoIterator<Item = VertexHash>,
) -> BTreeSet<VertexHash> {
    let mut queue: BTreeSet<(Timestamp, VertexHash)> =
        roots.into_iter().map(|h| key(store, &h)).collect();
    let mut changed = BTreeSet::new();

    while let Some((_, hash)) = queue.pop_first() {
        let mut value = conflict_own(store, &hash);
        if !value.is_empty() && metadata(store, &hash).conflict_with.is_empty() {
            fatal(InvariantViolation::ConflictVoidWithoutConflict(hash));
        }
        for dep in vertex(store, &hash).dependencies() {
            value.extend(metadata(store, &dep).conflict_voided_by.iter().copied());
        }

        let meta = metadata(store, &hash);
        if meta.conflict_voided_by == value {
            continue;
        }
        let was_clean = meta.conflict_voided_by.is_empty();
        let score = meta.score;
        let is_block = vertex(store, &hash).is_block();
        trace!(vertex = %hash.short(), marks = value.len(), "conflict marks changed");

        if is_block {
            match (was_clean, value.is_empty()) {
                (true, false) => store.remove_candidate(hash, score),
                (false, true) => store.add_candidate(hash, score),
                _ => {}
            }
        }
        if let Some(meta) = store.metadata_mut(&hash) {
            meta.conflict_voided_by = value;
        }
        changed.insert(hash);
        let rivals = metadata(store, &hash).conflict_with.clone();
        for next in dependents(store, &hash).into_iter().chain(rivals) {
            queue.insert(key(store, &next));
        }
    }
    changed
}

/// Recompute `voided_by` (and `first_block` for transactions) from `roots`
/// forward against the current best chain. Returns every change in
/// topological order.
pub fn propagate_voids(
    store: &mut VertexStore,
    roots: impl IntoIterator<Item = VertexHash>,
) -> Vec<VoidChange> {
    let mut queue: BTreeSet<(Timestamp, VertexHash)> =
        roots.into_iter().map(|h| key(store, &h)).collect();
    let mut changes = Vec::new();

    while let Some((_, hash)) = queue.pop_first() {
        let mut value = metadata(store, &hash).conflict_voided_by.clone();
        value.extend(chain_own(store, &hash));
        for dep in vertex(store, &hash).dependencies() {
            value.extend(metadata(store, &dep).voided_by.iter().copied());
        }

        if vertex(store, &hash).is_transaction() {
            let first_block = metadata(store, &hash)
                .confirmed_by
                .iter()
                .find(|b| store.is_on_best_chain(b))
                .copied();
            if let Some(meta) = store.metadata_mut(&hash) {
                meta.first_block = first_block;
            }
        }

        if metadata(store, &hash).voided_by == value {
            continue;
        }
        if let Some(meta) = store.metadata_mut(&hash) {
            meta.voided_by = value.clone();
        }
        trace!(vertex = %hash.short(), voided = !value.is_empty(), "void marks changed");
        changes.push(VoidChange {
            hash,
            voided_by: value,
        });
        for next in dependents(store, &hash) {
            queue.insert(key(store, &next));
        }
    }
    changes
}
