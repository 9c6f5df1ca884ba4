use std::fmt::{Debug, Formatter};
use std::path::Path;

use serde::de::DeserializeOwned;
use sled::Db;

use crate::error::Result;
use crate::topology::ClusterTopology;

const TOPOLOGY_KEY: &str = "topology";

/// Single slot store holding the last known [`ClusterTopology`] of this node.
///
/// A sled insert of one key is atomic, so a crash during [`PersistedClusterTopology::update`]
/// leaves either the previous snapshot or the new one on disk.
pub struct PersistedClusterTopology {
    db: Db,
    topology: Option<ClusterTopology>,
}

impl Debug for PersistedClusterTopology {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PersistedClusterTopology {{ version: {:?} }}",
            self.topology.as_ref().map(|t| t.version)
        )
    }
}

impl PersistedClusterTopology {
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        // every update flushes explicitly, so no background flusher
        let db = sled::Config::new()
            .path(directory.as_ref())
            .flush_every_ms(None)
            .open()?;
        Ok(Self::new(db))
    }

    pub fn new(db: Db) -> Self {
        Self { db, topology: None }
    }

    /// Loads the stored snapshot, if there is one.
    #[tracing::instrument]
    pub async fn initialize(&mut self) -> Result<()> {
        let db = self.db.clone();
        self.topology = tokio::task::spawn_blocking(move || get(&db, TOPOLOGY_KEY)).await??;
        tracing::debug!(found = self.topology.is_some(), "loaded persisted topology");
        Ok(())
    }

    pub fn get_topology(&self) -> Option<&ClusterTopology> {
        self.topology.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.topology.is_none()
    }

    /// Overwrites the in-memory and the on-disk snapshot. The in-memory copy only changes once
    /// the snapshot is flushed.
    #[tracing::instrument(skip(topology), fields(version = topology.version))]
    pub async fn update(&mut self, topology: ClusterTopology) -> Result<()> {
        let db = self.db.clone();
        let value = bincode::serialize(&topology)?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            db.insert(TOPOLOGY_KEY, value)?;
            db.flush()?;
            Ok(())
        })
        .await??;
        self.topology = Some(topology);
        Ok(())
    }
}

fn get<T: DeserializeOwned, K: AsRef<[u8]>>(db: &Db, key: K) -> Result<Option<T>> {
    db.get(key.as_ref())?
        .map(|x| bincode::deserialize(&x).map_err(Into::into))
        .transpose()
}
