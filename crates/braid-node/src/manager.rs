use braid_consensus::ConsensusEngine;
use braid_core::error::{BraidError, RejectReason};
use braid_core::metadata::VertexMetadata;
use braid_core::settings::Settings;
use braid_core::types::{Timestamp, VertexHash};
use braid_core::vertex::{BlockData, PowAlgorithm, Vertex, VertexLike};
use braid_events::{Event, EventBus, Reactor};
use braid_genesis::apply_genesis;
use braid_storage::{StateDb, VertexStore};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::template::BlockTemplate;

/// The manager as shared on the loop thread.
pub type SharedManager = Rc<RefCell<Manager>>;

/// Owns the store and the consensus engine and is the single entry point
/// for new vertices, whether they come from peers, wallets or the local
/// producers.
///
/// Events are published on the bus after each integration. While the
/// reactor runs they are delivered on a later loop turn, so subscribers may
/// borrow the manager again.
pub struct Manager {
    settings: Arc<Settings>,
    store: VertexStore,
    engine: ConsensusEngine,
    bus: EventBus,
    reactor: Rc<dyn Reactor>,
    synced: bool,
    started: bool,
}

impl Manager {
    pub fn new(settings: Arc<Settings>, db: StateDb, reactor: Rc<dyn Reactor>, bus: EventBus) -> Self {
        Self {
            engine: ConsensusEngine::new(settings.clone()),
            settings,
            store: VertexStore::new(db),
            bus,
            reactor,
            synced: false,
            started: false,
        }
    }

    /// Wrap in the shared handle producers and callbacks hold.
    pub fn into_shared(self) -> SharedManager {
        Rc::new(RefCell::new(self))
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Apply genesis, replay persisted vertices and announce `ManagerStart`.
    pub fn start(&mut self) -> Result<(), BraidError> {
        if self.started {
            return Ok(());
        }
        info!(network = %self.settings.network, "manager starting");
        self.startup_replay()?;
        self.started = true;
        self.bus.publish(Event::ManagerStart);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), BraidError> {
        if !self.started {
            return Ok(());
        }
        self.bus.publish(Event::ManagerStop);
        self.store.persist()?;
        self.store.db().flush()?;
        self.bus.shutdown();
        self.started = false;
        info!("manager stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Rebuild every in-memory index from the persisted vertices: genesis
    /// first, then each stored vertex in dependency order through the normal
    /// validate and integrate path. Returns the number of vertices replayed.
    pub fn startup_replay(&mut self) -> Result<usize, BraidError> {
        let persisted = self.store.persisted_vertices()?;
        self.store.reset()?;
        apply_genesis(&mut self.store, &self.settings)?;

        let mut replayed = 0;
        let mut skipped = 0;
        for vertex in persisted {
            let hash = vertex.hash();
            if self.store.contains(&hash) {
                continue;
            }
            match self.engine.validate_persisted(&self.store, &vertex) {
                Ok(()) => {
                    let received_at = vertex.timestamp();
                    self.engine.integrate(&mut self.store, vertex, received_at);
                    replayed += 1;
                }
                Err(reason) => {
                    warn!(hash = %hash, %reason, "dropping persisted vertex during replay");
                    skipped += 1;
                }
            }
        }
        info!(
            replayed,
            skipped,
            best_block = ?self.store.best_block().map(|h| h.short()),
            "startup replay finished"
        );
        Ok(replayed)
    }

    // ── Submission ───────────────────────────────────────────────────────────

    /// Validate and integrate `vertex`. Returns `false` when it is already
    /// known or was rejected.
    pub fn submit_vertex(&mut self, vertex: Vertex) -> bool {
        let hash = vertex.hash();
        match self.try_submit(vertex) {
            Ok(_) => true,
            Err(RejectReason::Duplicate(_)) => {
                debug!(hash = %hash, "ignoring known vertex");
                false
            }
            Err(reason) => {
                warn!(hash = %hash, %reason, "vertex rejected");
                false
            }
        }
    }

    /// Like [`Manager::submit_vertex`] but reports why a vertex was refused.
    pub fn try_submit(&mut self, vertex: Vertex) -> Result<VertexHash, RejectReason> {
        let hash = vertex.hash();
        if self.store.contains(&hash) {
            return Err(RejectReason::Duplicate(hash));
        }
        let now = self.reactor.now();
        if let Err(reason) = self.engine.validate(&self.store, &vertex, now) {
            debug!(hash = %hash, %reason, "validation failed");
            return Err(reason);
        }

        let report = self.engine.integrate(&mut self.store, vertex, now);
        for event in report.events {
            self.bus.publish(event);
        }
        Ok(hash)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn get_best_block(&self) -> Option<&BlockData> {
        self.store.best_block().and_then(|h| self.store.get_block(&h))
    }

    /// Transaction tips, optionally as they stood at `before`.
    pub fn get_tips(&self, before: Option<Timestamp>) -> Vec<VertexHash> {
        match before {
            Some(ts) => self.store.tips_at(ts),
            None => self.store.tx_tips().iter().copied().collect(),
        }
    }

    /// Template for the next block on `parent`, or on the best block.
    pub fn generate_block_template(&self, parent: Option<VertexHash>) -> Result<BlockTemplate, BraidError> {
        self.generate_block_template_with(parent, PowAlgorithm::Sha3)
    }

    pub fn generate_block_template_with(
        &self,
        parent: Option<VertexHash>,
        algorithm: PowAlgorithm,
    ) -> Result<BlockTemplate, BraidError> {
        let parent = match parent.or_else(|| self.store.best_block()) {
            Some(p) => p,
            None => return Err(BraidError::Other("no best block yet".into())),
        };
        BlockTemplate::build(&self.store, self.engine.weights(), parent, algorithm)
    }

    pub fn get_vertex(&self, hash: &VertexHash) -> Option<&Vertex> {
        self.store.get(hash)
    }

    pub fn get_metadata(&self, hash: &VertexHash) -> Option<&VertexMetadata> {
        self.store.metadata(hash)
    }

    // ── Sync gate ────────────────────────────────────────────────────────────

    /// Whether local block production may begin. Until the node reports
    /// itself caught up with its peers it only follows.
    pub fn can_start_producing(&self) -> bool {
        self.started && self.synced
    }

    pub fn set_synced(&mut self, synced: bool) {
        if synced != self.synced {
            info!(synced, "sync state changed");
        }
        self.synced = synced;
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn store(&self) -> &VertexStore {
        &self.store
    }

    pub fn engine(&self) -> &ConsensusEngine {
        &self.engine
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn reactor(&self) -> &Rc<dyn Reactor> {
        &self.reactor
    }
}
