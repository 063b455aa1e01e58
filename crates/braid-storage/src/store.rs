use braid_core::error::BraidError;
use braid_core::metadata::VertexMetadata;
use braid_core::types::{Timestamp, VertexHash, Work};
use braid_core::vertex::{BlockData, Vertex, VertexLike};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

use crate::db::StateDb;

/// Vertices plus their consensus metadata, with the indexes consensus
/// queries need.
///
/// Everything lives in memory and is written through to sled: vertices on
/// `put`, metadata on `persist` (only the entries touched since the last
/// call).
pub struct VertexStore {
    db: StateDb,
    vertices: HashMap<VertexHash, Vertex>,
    metadata: HashMap<VertexHash, VertexMetadata>,
    dirty: BTreeSet<VertexHash>,

    by_timestamp: BTreeSet<(Timestamp, VertexHash)>,
    tx_tips: BTreeSet<VertexHash>,
    block_tips: BTreeSet<VertexHash>,
    genesis: BTreeSet<VertexHash>,

    /// `best_chain[h]` is the best-chain block at height `h`.
    best_chain: Vec<VertexHash>,
    /// Blocks eligible as best block, ordered by score then smaller hash.
    candidates: BTreeSet<(Work, Reverse<VertexHash>)>,
}

impl VertexStore {
    pub fn new(db: StateDb) -> Self {
        Self {
            db,
            vertices: HashMap::new(),
            metadata: HashMap::new(),
            dirty: BTreeSet::new(),
            by_timestamp: BTreeSet::new(),
            tx_tips: BTreeSet::new(),
            block_tips: BTreeSet::new(),
            genesis: BTreeSet::new(),
            best_chain: Vec::new(),
            candidates: BTreeSet::new(),
        }
    }

    pub fn db(&self) -> &StateDb {
        &self.db
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    pub fn contains(&self, hash: &VertexHash) -> bool {
        self.vertices.contains_key(hash)
    }

    pub fn get(&self, hash: &VertexHash) -> Option<&Vertex> {
        self.vertices.get(hash)
    }

    pub fn get_block(&self, hash: &VertexHash) -> Option<&BlockData> {
        self.vertices.get(hash).and_then(Vertex::as_block)
    }

    pub fn metadata(&self, hash: &VertexHash) -> Option<&VertexMetadata> {
        self.metadata.get(hash)
    }

    /// Mutable metadata access. The entry is written back on the next
    /// `persist`.
    pub fn metadata_mut(&mut self, hash: &VertexHash) -> Option<&mut VertexMetadata> {
        let meta = self.metadata.get_mut(hash)?;
        self.dirty.insert(*hash);
        Some(meta)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    // ── Insertion ────────────────────────────────────────────────────────────

    /// Store a new vertex with its initial metadata and update the tip
    /// indexes.
    pub fn put(&mut self, vertex: Vertex, metadata: VertexMetadata) -> Result<(), BraidError> {
        let hash = vertex.hash();
        self.db.put_vertex(&vertex)?;

        match &vertex {
            Vertex::Block(b) => {
                if let Some(parent) = b.block_parent() {
                    self.block_tips.remove(&parent);
                }
                self.block_tips.insert(hash);
            }
            Vertex::Transaction(t) => {
                for parent in &t.parents {
                    self.tx_tips.remove(parent);
                }
                self.tx_tips.insert(hash);
            }
        }

        self.by_timestamp.insert((vertex.timestamp(), hash));
        self.vertices.insert(hash, vertex);
        self.metadata.insert(hash, metadata);
        self.dirty.insert(hash);
        Ok(())
    }

    pub fn mark_genesis(&mut self, hash: VertexHash) {
        self.genesis.insert(hash);
    }

    pub fn is_genesis(&self, hash: &VertexHash) -> bool {
        self.genesis.contains(hash)
    }

    pub fn genesis(&self) -> &BTreeSet<VertexHash> {
        &self.genesis
    }

    /// Write every metadata entry touched since the last call in one batch.
    pub fn persist(&mut self) -> Result<(), BraidError> {
        let dirty = std::mem::take(&mut self.dirty);
        let written = self
            .db
            .put_metadata_batch(dirty.iter().filter_map(|h| self.metadata.get(h)))?;
        trace!(written, "metadata persisted");
        Ok(())
    }

    /// Entries waiting for the next `persist`.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    // ── Tips ─────────────────────────────────────────────────────────────────

    /// Transactions without a transaction child.
    pub fn tx_tips(&self) -> &BTreeSet<VertexHash> {
        &self.tx_tips
    }

    /// Blocks without a block child.
    pub fn block_tips(&self) -> &BTreeSet<VertexHash> {
        &self.block_tips
    }

    /// Transaction tips as they were at `timestamp`: transactions with
    /// timestamp ≤ `timestamp` none of whose transaction children had been
    /// created by then.
    pub fn tips_at(&self, timestamp: Timestamp) -> Vec<VertexHash> {
        let latest = self.by_timestamp.last().map(|(ts, _)| *ts);
        if latest.map_or(true, |ts| timestamp >= ts) {
            return self.tx_tips.iter().copied().collect();
        }

        self.by_timestamp
            .range(..=(timestamp, VertexHash([0xff; 32])))
            .map(|(_, h)| *h)
            .filter(|h| self.get(h).map_or(false, Vertex::is_transaction))
            .filter(|h| {
                self.metadata(h).map_or(false, |m| {
                    !m.children.iter().any(|c| {
                        self.get(c)
                            .map_or(false, |v| v.is_transaction() && v.timestamp() <= timestamp)
                    })
                })
            })
            .collect()
    }

    // ── Walks ────────────────────────────────────────────────────────────────

    /// Breadth-first walk over the ancestors of `hash` (the vertex itself
    /// excluded), yielding `(vertex, distance)`. A vertex rejected by
    /// `predicate` is neither yielded nor walked through. Vertices farther
    /// than `max_depth` parent hops are not visited.
    pub fn walk_ancestors<P>(&self, hash: &VertexHash, predicate: P, max_depth: usize) -> AncestorWalk<'_, P>
    where
        P: FnMut(&Vertex) -> bool,
    {
        let mut queue = VecDeque::new();
        let mut seen = HashSet::new();
        if max_depth > 0 {
            if let Some(v) = self.get(hash) {
                for p in v.parents() {
                    if seen.insert(*p) {
                        queue.push_back((*p, 1));
                    }
                }
            }
        }
        AncestorWalk {
            store: self,
            queue,
            seen,
            predicate,
            max_depth,
        }
    }

    /// Breadth-first walk over the descendants of `hash` (the vertex itself
    /// excluded) no farther than `max_depth` child hops.
    pub fn walk_descendants(&self, hash: &VertexHash, max_depth: usize) -> impl Iterator<Item = &Vertex> + '_ {
        let origin = *hash;
        let mut queue = VecDeque::from([(origin, 0usize)]);
        let mut seen = HashSet::from([origin]);
        std::iter::from_fn(move || {
            while let Some((current, depth)) = queue.pop_front() {
                if depth < max_depth {
                    if let Some(meta) = self.metadata.get(&current) {
                        for child in &meta.children {
                            if seen.insert(*child) {
                                queue.push_back((*child, depth + 1));
                            }
                        }
                    }
                }
                if current != origin {
                    if let Some(v) = self.vertices.get(&current) {
                        return Some(v);
                    }
                }
            }
            None
        })
    }

    /// `hash` followed by its block-parent chain down to genesis.
    pub fn block_chain(&self, hash: &VertexHash) -> BlockChain<'_> {
        BlockChain {
            store: self,
            next: Some(*hash),
        }
    }

    // ── Best chain ───────────────────────────────────────────────────────────

    pub fn best_block(&self) -> Option<VertexHash> {
        self.best_chain.last().copied()
    }

    pub fn best_height(&self) -> Option<u64> {
        self.best_chain.len().checked_sub(1).map(|h| h as u64)
    }

    pub fn best_chain_at(&self, height: u64) -> Option<VertexHash> {
        self.best_chain.get(height as usize).copied()
    }

    pub fn is_on_best_chain(&self, hash: &VertexHash) -> bool {
        self.get_block(hash)
            .map_or(false, |b| self.best_chain_at(b.height) == Some(*hash))
    }

    /// Point the best-chain index at `tip`, rewriting only the heights that
    /// differ from the current chain.
    pub fn set_best_block(&mut self, tip: VertexHash) {
        let Some(tip_height) = self.get_block(&tip).map(|b| b.height as usize) else {
            return;
        };

        let mut updates = Vec::new();
        for block in self.block_chain(&tip) {
            let height = block.height as usize;
            if self.best_chain.get(height) == Some(&block.hash) {
                break;
            }
            updates.push((height, block.hash));
        }

        self.best_chain.truncate(tip_height + 1);
        if self.best_chain.len() < tip_height + 1 {
            self.best_chain.resize(tip_height + 1, VertexHash::ZERO);
        }
        debug!(tip = %tip, height = tip_height, rewritten = updates.len(), "best chain index updated");
        for (height, hash) in updates {
            self.best_chain[height] = hash;
        }
    }

    /// Whether block `ancestor` is `descendant` or one of its block-chain
    /// ancestors.
    pub fn is_block_ancestor(&self, ancestor: &VertexHash, descendant: &VertexHash) -> bool {
        let Some(target) = self.get_block(ancestor) else {
            return false;
        };
        let target_on_best = self.is_on_best_chain(ancestor);
        for block in self.block_chain(descendant) {
            if block.height < target.height {
                return false;
            }
            if block.hash == *ancestor {
                return true;
            }
            if self.is_on_best_chain(&block.hash) {
                return target_on_best;
            }
        }
        false
    }

    /// First block on the current best chain reached from `hash` by
    /// following block parents.
    pub fn fork_point(&self, hash: &VertexHash) -> Option<VertexHash> {
        self.block_chain(hash)
            .find(|b| self.is_on_best_chain(&b.hash))
            .map(|b| b.hash)
    }

    // ── Best block candidates ────────────────────────────────────────────────

    pub fn add_candidate(&mut self, hash: VertexHash, score: Work) {
        self.candidates.insert((score, Reverse(hash)));
    }

    pub fn remove_candidate(&mut self, hash: VertexHash, score: Work) {
        self.candidates.remove(&(score, Reverse(hash)));
    }

    /// Whether `hash` is currently eligible as best block.
    pub fn is_candidate(&self, hash: &VertexHash) -> bool {
        self.metadata
            .get(hash)
            .map_or(false, |m| self.candidates.contains(&(m.score, Reverse(*hash))))
    }

    /// Highest-score candidate; equal scores go to the smaller hash.
    pub fn best_candidate(&self) -> Option<VertexHash> {
        self.candidates.last().map(|(_, Reverse(h))| *h)
    }

    // ── Replay ───────────────────────────────────────────────────────────────

    /// Persisted vertices in an order where every vertex follows its
    /// dependencies.
    pub fn persisted_vertices(&self) -> Result<Vec<Vertex>, BraidError> {
        let mut all = self.db.all_vertices()?;
        all.sort_by_key(|v| (!v.parents().is_empty(), v.timestamp(), v.hash()));
        Ok(all)
    }

    /// Forget every in-memory index and all persisted metadata. Persisted
    /// vertices are kept for replay.
    pub fn reset(&mut self) -> Result<(), BraidError> {
        self.db.clear_metadata()?;
        self.vertices.clear();
        self.metadata.clear();
        self.dirty.clear();
        self.by_timestamp.clear();
        self.tx_tips.clear();
        self.block_tips.clear();
        self.genesis.clear();
        self.best_chain.clear();
        self.candidates.clear();
        Ok(())
    }
}

// ── Iterators ────────────────────────────────────────────────────────────────

pub struct AncestorWalk<'a, P> {
    store: &'a VertexStore,
    queue: VecDeque<(VertexHash, usize)>,
    seen: HashSet<VertexHash>,
    predicate: P,
    max_depth: usize,
}

impl<'a, P> Iterator for AncestorWalk<'a, P>
where
    P: FnMut(&Vertex) -> bool,
{
    type Item = (&'a Vertex, usize);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((hash, depth)) = self.queue.pop_front() {
            let Some(vertex) = self.store.get(&hash) else {
                continue;
            };
            if !(self.predicate)(vertex) {
                continue;
            }
            if depth < self.max_depth {
                for p in vertex.parents() {
                    if self.seen.insert(*p) {
                        self.queue.push_back((*p, depth + 1));
                    }
                }
            }
            return Some((vertex, depth));
        }
        None
    }
}

pub struct BlockChain<'a> {
    store: &'a VertexStore,
    next: Option<VertexHash>,
}

impl<'a> Iterator for BlockChain<'a> {
    type Item = &'a BlockData;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        let block = self.store.get_block(&hash)?;
        self.next = block.block_parent();
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::vertex::{PowAlgorithm, TxData};

    fn h(n: u8) -> VertexHash {
        VertexHash::from_bytes([n; 32])
    }

    fn block(n: u8, parent: Option<u8>, height: u64, ts: Timestamp) -> Vertex {
        Vertex::Block(BlockData {
            hash: h(n),
            parents: parent.map(|p| vec![h(p)]).unwrap_or_default(),
            weight: 1.0,
            timestamp: ts,
            nonce: 0,
            height,
            outputs: vec![],
            algorithm: PowAlgorithm::Sha3,
            data: vec![],
            poa: None,
        })
    }

    fn tx(n: u8, parents: &[u8], ts: Timestamp) -> Vertex {
        Vertex::Transaction(TxData {
            hash: h(n),
            parents: parents.iter().map(|p| h(*p)).collect(),
            weight: 1.0,
            timestamp: ts,
            nonce: 0,
            inputs: vec![],
            outputs: vec![],
        })
    }

    fn put(store: &mut VertexStore, v: Vertex) {
        let hash = v.hash();
        let parents: Vec<VertexHash> = v.parents().to_vec();
        store.put(v, VertexMetadata::new(hash, 2, 0, 0)).unwrap();
        for p in parents {
            store.metadata_mut(&p).unwrap().children.insert(hash);
        }
    }

    fn store() -> VertexStore {
        VertexStore::new(StateDb::temporary().unwrap())
    }

    /// g ← b1 ← b2 ← b3 (main), b1 ← c2 (side)
    fn chain_store() -> VertexStore {
        let mut s = store();
        put(&mut s, block(1, None, 0, 0));
        put(&mut s, block(2, Some(1), 1, 10));
        put(&mut s, block(3, Some(2), 2, 20));
        put(&mut s, block(4, Some(3), 3, 30));
        put(&mut s, block(5, Some(2), 2, 21));
        s.set_best_block(h(4));
        s
    }

    #[test]
    fn tips_track_children() {
        let mut s = store();
        put(&mut s, tx(1, &[], 0));
        put(&mut s, tx(2, &[], 0));
        put(&mut s, tx(3, &[1, 2], 5));
        assert_eq!(s.tx_tips().iter().copied().collect::<Vec<_>>(), vec![h(3)]);
        // before tx 3 existed both genesis txs were tips
        assert_eq!(s.tips_at(4), vec![h(1), h(2)]);
        assert_eq!(s.tips_at(5), vec![h(3)]);
    }

    #[test]
    fn ancestor_walk_respects_depth_and_predicate() {
        let mut s = store();
        put(&mut s, tx(1, &[], 0));
        put(&mut s, tx(2, &[], 0));
        put(&mut s, tx(3, &[1, 2], 1));
        put(&mut s, tx(4, &[3, 2], 2));

        let all: Vec<_> = s.walk_ancestors(&h(4), |_| true, 10).map(|(v, d)| (v.hash(), d)).collect();
        assert_eq!(all, vec![(h(3), 1), (h(2), 1), (h(1), 2)]);

        let shallow: Vec<_> = s.walk_ancestors(&h(4), |_| true, 1).map(|(v, _)| v.hash()).collect();
        assert_eq!(shallow, vec![h(3), h(2)]);

        let filtered: Vec<_> = s
            .walk_ancestors(&h(4), |v| v.hash() != h(3), 10)
            .map(|(v, _)| v.hash())
            .collect();
        assert_eq!(filtered, vec![h(2)]);
    }

    #[test]
    fn descendant_walk_respects_depth() {
        let mut s = store();
        put(&mut s, tx(1, &[], 0));
        put(&mut s, tx(2, &[], 0));
        put(&mut s, tx(3, &[1, 2], 1));
        put(&mut s, tx(4, &[3, 2], 2));
        put(&mut s, tx(5, &[4, 3], 3));

        let mut all: Vec<_> = s.walk_descendants(&h(1), 10).map(|v| v.hash()).collect();
        all.sort();
        assert_eq!(all, vec![h(3), h(4), h(5)]);

        let near: Vec<_> = s.walk_descendants(&h(1), 1).map(|v| v.hash()).collect();
        assert_eq!(near, vec![h(3)]);
        let mut from_two: Vec<_> = s.walk_descendants(&h(2), 2).map(|v| v.hash()).collect();
        from_two.sort();
        assert_eq!(from_two, vec![h(3), h(4), h(5)]);
        assert_eq!(s.walk_descendants(&h(5), 10).count(), 0);
    }

    #[test]
    fn persist_clears_the_dirty_set() {
        let mut s = chain_store();
        assert!(s.dirty_len() > 0);
        s.persist().unwrap();
        assert_eq!(s.dirty_len(), 0);
        s.metadata_mut(&h(3)).unwrap().score = 42;
        assert_eq!(s.dirty_len(), 1);
        s.persist().unwrap();
        assert_eq!(s.db().get_metadata(&h(3)).unwrap().unwrap().score, 42);
    }

    #[test]
    fn best_chain_index_and_ancestry() {
        let mut s = chain_store();
        assert_eq!(s.best_block(), Some(h(4)));
        assert_eq!(s.best_height(), Some(3));
        assert!(s.is_on_best_chain(&h(3)));
        assert!(!s.is_on_best_chain(&h(5)));

        assert!(s.is_block_ancestor(&h(2), &h(4)));
        assert!(s.is_block_ancestor(&h(2), &h(5)));
        assert!(!s.is_block_ancestor(&h(3), &h(5)));
        assert!(!s.is_block_ancestor(&h(5), &h(4)));
        assert_eq!(s.fork_point(&h(5)), Some(h(2)));

        s.set_best_block(h(5));
        assert_eq!(s.best_height(), Some(2));
        assert_eq!(s.best_chain_at(2), Some(h(5)));
        assert!(!s.is_on_best_chain(&h(4)));
        assert!(s.is_block_ancestor(&h(5), &h(5)));
    }

    #[test]
    fn candidates_break_ties_by_smaller_hash() {
        let mut s = store();
        s.add_candidate(h(9), 10);
        s.add_candidate(h(3), 10);
        s.add_candidate(h(1), 5);
        assert_eq!(s.best_candidate(), Some(h(3)));
        s.remove_candidate(h(3), 10);
        assert_eq!(s.best_candidate(), Some(h(9)));
    }

    #[test]
    fn candidacy_follows_the_metadata_score() {
        let mut s = chain_store();
        s.metadata_mut(&h(4)).unwrap().score = 7;
        assert!(!s.is_candidate(&h(4)));
        s.add_candidate(h(4), 7);
        assert!(s.is_candidate(&h(4)));
        s.remove_candidate(h(4), 7);
        assert!(!s.is_candidate(&h(4)));
        assert!(!s.is_candidate(&h(99)));
    }

    #[test]
    fn reset_keeps_vertices_for_replay() {
        let mut s = chain_store();
        s.persist().unwrap();
        s.reset().unwrap();
        assert!(s.is_empty());
        assert_eq!(s.best_block(), None);
        let replay = s.persisted_vertices().unwrap();
        assert_eq!(replay.len(), 5);
        assert_eq!(replay[0].hash(), h(1));
    }
}
