use braid_core::constants::WEIGHT_TOLERANCE;
use braid_core::error::{InvariantViolation, RejectReason};
use braid_core::metadata::VertexMetadata;
use braid_core::settings::Settings;
use braid_core::types::{Timestamp, VertexHash, Work};
use braid_core::vertex::{Vertex, VertexLike};
use braid_core::weight::weight_to_work;
use braid_events::Event;
use braid_storage::VertexStore;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::reward::tokens_issued_per_block;
use crate::verifier::{verify_reward_lock, StructuralVerifier, VertexVerifier};
use crate::voiding::{metadata, propagate_conflicts, propagate_voids};
use crate::weight::WeightCalculator;

/// Log a broken ledger invariant and abort.
pub(crate) fn fatal(violation: impl Display) -> ! {
    error!(%violation, "ledger invariant violated, aborting");
    panic!("ledger invariant violated: {violation}");
}

// ── Reports ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReorgInfo {
    pub old_best_block: VertexHash,
    pub new_best_block: VertexHash,
    pub common_block: VertexHash,
    /// Blocks that left the best chain.
    pub size: usize,
}

/// Outcome of integrating one vertex.
#[derive(Clone, Debug)]
pub struct AcceptanceReport {
    pub hash: VertexHash,
    /// Events to publish, in order.
    pub events: Vec<Event>,
    /// Whether the new vertex itself ended up voided.
    pub voided: bool,
    pub best_block: VertexHash,
    pub reorg: Option<ReorgInfo>,
}

// ── ConsensusEngine ───────────────────────────────────────────────────────────

/// Admission checks and DAG integration.
///
/// `validate` is read-only and may refuse a vertex for any [`RejectReason`].
/// `integrate` is only called with validated vertices and never fails: a
/// broken invariant inside it aborts the process.
pub struct ConsensusEngine {
    settings: Arc<Settings>,
    weights: WeightCalculator,
    verifier: Box<dyn VertexVerifier>,
}

impl ConsensusEngine {
    pub fn new(settings: Arc<Settings>) -> Self {
        let verifier = Box::new(StructuralVerifier::new(settings.clone()));
        Self::with_verifier(settings, verifier)
    }

    pub fn with_verifier(settings: Arc<Settings>, verifier: Box<dyn VertexVerifier>) -> Self {
        Self {
            weights: WeightCalculator::new(settings.clone()),
            settings,
            verifier,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn weights(&self) -> &WeightCalculator {
        &self.weights
    }

    // ── Validation ───────────────────────────────────────────────────────────

    pub fn validate(
        &self,
        store: &VertexStore,
        vertex: &Vertex,
        now: Timestamp,
    ) -> Result<(), RejectReason> {
        self.admit(store, vertex, Some(now))
    }

    /// Admission for a vertex read back from disk. It was admitted once, so
    /// neither local time nor the reward lock bounds it any more.
    pub fn validate_persisted(&self, store: &VertexStore, vertex: &Vertex) -> Result<(), RejectReason> {
        self.admit(store, vertex, None)
    }

    fn admit(&self, store: &VertexStore, vertex: &Vertex, now: Option<Timestamp>) -> Result<(), RejectReason> {
        let hash = vertex.hash();

        // ── 1. Genesis set ───────────────────────────────────────────────────
        if vertex.is_genesis() {
            return if store.is_genesis(&hash) {
                Ok(())
            } else {
                Err(RejectReason::UnknownGenesis(hash))
            };
        }

        // ── 2. Duplicate ─────────────────────────────────────────────────────
        if store.contains(&hash) {
            return Err(RejectReason::Duplicate(hash));
        }

        // ── 3. Future drift ──────────────────────────────────────────────────
        let max_drift = self.settings.max_future_timestamp_drift;
        if let Some(now) = now {
            if vertex.timestamp() > now.saturating_add(max_drift) {
                return Err(RejectReason::TimestampInFuture {
                    timestamp: vertex.timestamp(),
                    now,
                    max_drift,
                });
            }
        }

        // ── 4. Parents must be accepted ──────────────────────────────────────
        if let Some(missing) = vertex.parents().iter().find(|p| !store.contains(p)) {
            return Err(RejectReason::MissingParent(*missing));
        }

        // ── 5. Weight ────────────────────────────────────────────────────────
        let minimum = self.weights.minimum_weight(store, vertex);
        let weight = vertex.weight();
        // Written negated so a NaN weight is refused too.
        if !(weight >= minimum - WEIGHT_TOLERANCE) {
            return Err(RejectReason::WeightTooLow { weight, minimum });
        }

        // ── 6. Block reward ──────────────────────────────────────────────────
        if let Vertex::Block(block) = vertex {
            let expected = tokens_issued_per_block(&self.settings, block.height);
            let got = vertex.sum_outputs().ok_or(RejectReason::AmountOverflow)?;
            if got != expected {
                return Err(RejectReason::RewardMismatch {
                    height: block.height,
                    expected,
                    got,
                });
            }
        }

        // ── 7. Structure and proof ───────────────────────────────────────────
        self.verifier.verify(store, vertex)?;

        // ── 8. Reward lock ───────────────────────────────────────────────────
        if now.is_some() {
            verify_reward_lock(&self.settings, store, vertex)?;
        }
        Ok(())
    }

    // ── Integration ──────────────────────────────────────────────────────────

    /// Add a validated vertex to the DAG and settle every consequence:
    /// accumulated weight, conflicts, best chain and voided states.
    pub fn integrate(
        &self,
        store: &mut VertexStore,
        vertex: Vertex,
        received_at: Timestamp,
    ) -> AcceptanceReport {
        let hash = vertex.hash();
        let own_work = weight_to_work(vertex.weight());
        let height = vertex.height().unwrap_or(0);
        let accepted = Arc::new(vertex.clone());

        let mut meta = VertexMetadata::new(hash, own_work, height, received_at);
        meta.conflict_with = self.register_spends(store, &vertex);
        let rivals = meta.conflict_with.clone();

        if let Err(e) = store.put(vertex, meta) {
            fatal(e);
        }
        for parent in accepted.parents() {
            match store.metadata_mut(parent) {
                Some(m) => {
                    m.children.insert(hash);
                }
                None => fatal(InvariantViolation::DanglingParent(*parent)),
            }
        }

        let touched_conflicts = self.propagate_work(store, &hash, own_work);
        let confirms = match accepted.as_block() {
            Some(_) => self.confirm_transactions(store, &hash, own_work),
            None => Vec::new(),
        };
        self.check_own_invariants(store, &hash, own_work);

        // ── Conflict pass ────────────────────────────────────────────────────
        let mut conflict_roots: BTreeSet<VertexHash> = BTreeSet::from([hash]);
        conflict_roots.extend(rivals.iter().copied());
        for touched in &touched_conflicts {
            conflict_roots.insert(*touched);
            conflict_roots.extend(metadata(store, touched).conflict_with.iter().copied());
        }
        let conflict_changed = propagate_conflicts(store, conflict_roots.iter().copied());

        if accepted.is_block() {
            let meta = metadata(store, &hash);
            if !meta.is_conflict_voided() {
                let score = meta.score;
                store.add_candidate(hash, score);
            }
        }

        // ── Best chain ───────────────────────────────────────────────────────
        let old_best = store.best_block();
        let top = match store.best_candidate() {
            Some(b) => b,
            None => fatal(format!("no best block candidate after integrating {hash}")),
        };
        // Drawing level is not enough: the best block only moves when it is
        // overtaken or loses its candidacy.
        let new_best = match old_best {
            Some(old)
                if old != top
                    && store.is_candidate(&old)
                    && metadata(store, &old).score == metadata(store, &top).score =>
            {
                old
            }
            _ => top,
        };
        if metadata(store, &new_best).is_conflict_voided() {
            fatal(InvariantViolation::BestBlockConflictVoided(new_best));
        }

        let mut reorg = None;
        let mut leaving: Vec<VertexHash> = Vec::new();
        let mut joining: Vec<VertexHash> = Vec::new();
        if old_best != Some(new_best) {
            let stop = match old_best {
                Some(old) if store.is_block_ancestor(&old, &new_best) => Some(old),
                Some(old) => {
                    let common = match store.fork_point(&new_best) {
                        Some(c) => c,
                        None => fatal(format!("{new_best} shares no block with the best chain")),
                    };
                    leaving = chain_until(store, &old, &common);
                    reorg = Some(ReorgInfo {
                        old_best_block: old,
                        new_best_block: new_best,
                        common_block: common,
                        size: leaving.len(),
                    });
                    Some(common)
                }
                None => None,
            };
            joining = match stop {
                Some(stop) => chain_until(store, &new_best, &stop),
                None => store.block_chain(&new_best).map(|b| b.hash).collect(),
            };
            store.set_best_block(new_best);
        }

        // ── Full void pass ───────────────────────────────────────────────────
        let mut void_roots: BTreeSet<VertexHash> = BTreeSet::from([hash]);
        void_roots.extend(conflict_changed.iter().copied());
        void_roots.extend(conflict_roots.iter().copied());
        void_roots.extend(confirms.iter().copied());
        for block in leaving.iter().chain(joining.iter()) {
            void_roots.insert(*block);
            void_roots.extend(metadata(store, block).confirms.iter().copied());
        }
        let changes = propagate_voids(store, void_roots);

        // ── Events ───────────────────────────────────────────────────────────
        let mut events = Vec::new();
        if let Some(r) = &reorg {
            warn!(
                old = %r.old_best_block,
                new = %r.new_best_block,
                common = %r.common_block,
                size = r.size,
                "best chain reorganization"
            );
            events.push(Event::ReorgStarted {
                old_best_block: r.old_best_block,
                new_best_block: r.new_best_block,
                common_block: r.common_block,
            });
        }
        for change in changes.iter().filter(|c| c.hash != hash) {
            events.push(if change.voided_by.is_empty() {
                Event::Unvoided { vertex: change.hash }
            } else {
                Event::Voided {
                    vertex: change.hash,
                    voided_by: change.voided_by.clone(),
                }
            });
        }
        if let Some(r) = &reorg {
            events.push(Event::ReorgFinished { reorg_size: r.size });
        }
        events.push(Event::Accepted {
            vertex: accepted.clone(),
        });

        let voided_by = metadata(store, &hash).voided_by.clone();
        let voided = !voided_by.is_empty();
        if voided {
            events.push(Event::Voided {
                vertex: hash,
                voided_by,
            });
        }

        if let Err(e) = store.persist() {
            fatal(e);
        }

        info!(
            hash = %hash,
            kind = ?accepted.kind(),
            voided,
            best_block = %new_best.short(),
            "integrated vertex"
        );

        AcceptanceReport {
            hash,
            events,
            voided,
            best_block: new_best,
            reorg,
        }
    }

    /// Add `own_work` to every ancestor within the propagation depth that
    /// takes part in a conflict, and return those ancestors.
    ///
    /// Accumulated work only decides conflicts, so it is kept exact for
    /// conflict participants alone. The walk reads memory; only the
    /// participants it reaches are rewritten.
    fn propagate_work(&self, store: &mut VertexStore, hash: &VertexHash, own_work: Work) -> Vec<VertexHash> {
        let in_conflict: Vec<VertexHash> = {
            let view: &VertexStore = store;
            view.walk_ancestors(hash, |_| true, self.settings.accumulated_weight_max_depth)
                .map(|(v, _)| v.hash())
                .filter(|a| view.metadata(a).map_or(false, |m| !m.conflict_with.is_empty()))
                .collect()
        };
        for ancestor in &in_conflict {
            let Some(meta) = store.metadata_mut(ancestor) else {
                fatal(InvariantViolation::MissingMetadata(*ancestor));
            };
            meta.accumulated_weight = meta.accumulated_weight.saturating_add(own_work);
        }
        in_conflict
    }

    /// Own work plus the work of every descendant within the propagation
    /// depth.
    pub fn accumulated_work(&self, store: &VertexStore, hash: &VertexHash) -> Work {
        let own = store.get(hash).map_or(0, |v| weight_to_work(v.weight()));
        store
            .walk_descendants(hash, self.settings.accumulated_weight_max_depth)
            .fold(own, |acc, v| acc.saturating_add(weight_to_work(v.weight())))
    }

    /// Record `vertex`'s spends on the spent vertices. Returns the
    /// transactions that already spend any of the same outputs. A rival
    /// entering its first conflict gets its accumulated work counted from
    /// its descendants.
    fn register_spends(&self, store: &mut VertexStore, vertex: &Vertex) -> BTreeSet<VertexHash> {
        let hash = vertex.hash();
        let mut rivals = BTreeSet::new();
        for input in vertex.inputs() {
            let Some(spent) = store.metadata_mut(&input.tx_id) else {
                fatal(InvariantViolation::MissingMetadata(input.tx_id));
            };
            let spenders = spent.spent_outputs.entry(input.index).or_default();
            rivals.extend(spenders.iter().copied().filter(|s| *s != hash));
            spenders.insert(hash);
        }
        for rival in &rivals {
            let accumulated = if metadata(store, rival).conflict_with.is_empty() {
                Some(self.accumulated_work(store, rival))
            } else {
                None
            };
            match store.metadata_mut(rival) {
                Some(m) => {
                    m.conflict_with.insert(hash);
                    if let Some(work) = accumulated {
                        m.accumulated_weight = work;
                    }
                }
                None => fatal(InvariantViolation::MissingMetadata(*rival)),
            }
        }
        if !rivals.is_empty() {
            debug!(tx = %hash.short(), rivals = rivals.len(), "double spend registered");
        }
        rivals
    }

    /// Score a new block and record the transactions it newly confirms:
    /// transaction ancestors not already confirmed by a block on its own
    /// chain.
    fn confirm_transactions(&self, store: &mut VertexStore, hash: &VertexHash, own_work: Work) -> Vec<VertexHash> {
        let Some(parent) = store.get_block(hash).and_then(|b| b.block_parent()) else {
            return Vec::new();
        };
        let parent_score = metadata(store, &parent).score;

        let confirms: Vec<(VertexHash, Work)> = {
            let view: &VertexStore = store;
            view.walk_ancestors(
                hash,
                |v| {
                    v.is_transaction()
                        && !view.metadata(&v.hash()).map_or(false, |m| {
                            m.confirmed_by.iter().any(|b| view.is_block_ancestor(b, &parent))
                        })
                },
                usize::MAX,
            )
            .map(|(v, _)| (v.hash(), weight_to_work(v.weight())))
            .collect()
        };

        let score = confirms
            .iter()
            .fold(parent_score.saturating_add(own_work), |acc, (_, w)| acc.saturating_add(*w));
        for (tx, _) in &confirms {
            if let Some(m) = store.metadata_mut(tx) {
                m.confirmed_by.insert(*hash);
            }
        }
        let confirmed: Vec<VertexHash> = confirms.into_iter().map(|(h, _)| h).collect();
        debug!(block = %hash.short(), confirms = confirmed.len(), score = %score, "scored block");
        if let Some(m) = store.metadata_mut(hash) {
            m.score = score;
            m.confirms = confirmed.clone();
        }
        confirmed
    }

    fn check_own_invariants(&self, store: &VertexStore, hash: &VertexHash, own_work: Work) {
        let meta = metadata(store, hash);
        if meta.accumulated_weight < own_work {
            fatal(InvariantViolation::AccumulatedBelowOwn {
                hash: *hash,
                accumulated: meta.accumulated_weight,
                own: own_work,
            });
        }
    }
}

/// Blocks from `from` down its chain, stopping before `stop`.
fn chain_until(store: &VertexStore, from: &VertexHash, stop: &VertexHash) -> Vec<VertexHash> {
    store
        .block_chain(from)
        .map(|b| b.hash)
        .take_while(|h| h != stop)
        .collect()
}
