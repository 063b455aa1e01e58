use braid_core::error::BraidError;
use braid_core::metadata::VertexMetadata;
use braid_core::types::VertexHash;
use braid_core::vertex::{Vertex, VertexLike};
use std::path::Path;

/// Persistent store backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   vertices   : VertexHash bytes → bincode(Vertex)
///   metadata   : VertexHash bytes → bincode(VertexMetadata)
///   meta       : utf8 key bytes   → raw bytes
pub struct StateDb {
    db: sled::Db,
    vertices: sled::Tree,
    metadata: sled::Tree,
    meta: sled::Tree,
}

fn storage(e: sled::Error) -> BraidError {
    BraidError::Storage(e.to_string())
}

impl StateDb {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BraidError> {
        let db = sled::open(path).map_err(storage)?;
        Self::from_db(db)
    }

    /// A database that lives only as long as this value.
    pub fn temporary() -> Result<Self, BraidError> {
        let db = sled::Config::new().temporary(true).open().map_err(storage)?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, BraidError> {
        let vertices = db.open_tree("vertices").map_err(storage)?;
        let metadata = db.open_tree("metadata").map_err(storage)?;
        let meta     = db.open_tree("meta").map_err(storage)?;
        Ok(Self { db, vertices, metadata, meta })
    }

    // ── Vertices ─────────────────────────────────────────────────────────────

    pub fn get_vertex(&self, hash: &VertexHash) -> Result<Option<Vertex>, BraidError> {
        match self.vertices.get(hash.as_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_vertex(&self, vertex: &Vertex) -> Result<(), BraidError> {
        let bytes = bincode::serialize(vertex)?;
        self.vertices
            .insert(vertex.hash().as_bytes(), bytes)
            .map_err(storage)?;
        Ok(())
    }

    pub fn vertex_exists(&self, hash: &VertexHash) -> bool {
        self.vertices.contains_key(hash.as_bytes()).unwrap_or(false)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Every persisted vertex, in key order.
    pub fn all_vertices(&self) -> Result<Vec<Vertex>, BraidError> {
        let mut out = Vec::with_capacity(self.vertices.len());
        for item in self.vertices.iter() {
            let (_, bytes) = item.map_err(storage)?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn get_metadata(&self, hash: &VertexHash) -> Result<Option<VertexMetadata>, BraidError> {
        match self.metadata.get(hash.as_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_metadata(&self, meta: &VertexMetadata) -> Result<(), BraidError> {
        let bytes = bincode::serialize(meta)?;
        self.metadata
            .insert(meta.hash.as_bytes(), bytes)
            .map_err(storage)?;
        Ok(())
    }

    /// Write several metadata entries as one atomic sled batch.
    pub fn put_metadata_batch<'a, I>(&self, entries: I) -> Result<usize, BraidError>
    where
        I: IntoIterator<Item = &'a VertexMetadata>,
    {
        let mut batch = sled::Batch::default();
        let mut n = 0;
        for meta in entries {
            batch.insert(meta.hash.as_bytes(), bincode::serialize(meta)?);
            n += 1;
        }
        if n > 0 {
            self.metadata.apply_batch(batch).map_err(storage)?;
        }
        Ok(n)
    }

    /// Drop all metadata; vertices are kept so they can be replayed.
    pub fn clear_metadata(&self) -> Result<(), BraidError> {
        self.metadata.clear().map_err(storage)
    }

    // ── Meta ──────────────────────────────────────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), BraidError> {
        self.meta.insert(key.as_bytes(), value).map_err(storage)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, BraidError> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(storage)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), BraidError> {
        self.db.flush().map_err(storage)?;
        Ok(())
    }
}
