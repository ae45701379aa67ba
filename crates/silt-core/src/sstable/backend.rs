use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::codec::PairCodec;
use crate::error::{Error, Result};
use crate::memstore::{MemoryStore, StoreFactory};
use crate::segment::{Segment, SegmentBackend, SegmentId, SegmentWrite};
use crate::sstable::{Table, Writer};
use crate::vfs::Vfs;

/// Filesystem-backed segment storage.
///
/// One `segment-<uuid>.dat` file per segment under `root`, reached through
/// the [`Vfs`] facade so the same backend runs against the OS filesystem or
/// an in-memory one. The store factory supplies the sparse-index stores for
/// writers and loaded segments.
pub struct Backend {
    root: PathBuf,
    vfs: Arc<dyn Vfs>,
    codec: Arc<dyn PairCodec>,
    index_factor: usize,
    store_factory: StoreFactory,
}

impl Backend {
    pub fn new(
        root: impl Into<PathBuf>,
        vfs: Arc<dyn Vfs>,
        codec: Arc<dyn PairCodec>,
        index_factor: usize,
        store_factory: StoreFactory,
    ) -> Self {
        Self {
            root: root.into(),
            vfs,
            codec,
            index_factor,
            store_factory,
        }
    }

    /// Path of the file holding segment `id`.
    fn segment_path(&self, id: SegmentId) -> PathBuf {
        self.root.join(format!("segment-{}.dat", id))
    }

    fn map_open_error(id: SegmentId, e: io::Error) -> Error {
        if e.kind() == io::ErrorKind::NotFound {
            Error::SegmentNotFound(id)
        } else {
            Error::Io(e)
        }
    }
}

impl SegmentBackend for Backend {
    fn new_writer(&self, id: SegmentId) -> Result<Box<dyn SegmentWrite>> {
        let path = self.segment_path(id);
        debug!(%id, ?path, "creating segment writer");

        let sink = self.vfs.create(&path)?;
        Ok(Box::new(Writer::new(
            id,
            sink,
            Arc::clone(&self.codec),
            (self.store_factory)(),
            self.index_factor,
        )))
    }

    fn create(&self, id: SegmentId, store: &dyn MemoryStore) -> Result<()> {
        let mut writer = self.new_writer(id)?;
        let bytes = writer.write_all(&store.pairs())?;
        writer.close()?;

        info!(%id, pairs = store.len(), bytes, "persisted memory store as segment");
        Ok(())
    }

    fn get(&self, id: SegmentId) -> Result<Box<dyn Segment>> {
        let path = self.segment_path(id);
        let data = self
            .vfs
            .open(&path)
            .map_err(|e| Self::map_open_error(id, e))?;

        let table = Table::load(id, data, Arc::clone(&self.codec), (self.store_factory)())?;
        Ok(Box::new(table))
    }

    fn delete(&self, id: SegmentId) -> Result<()> {
        let path = self.segment_path(id);
        self.vfs
            .remove(&path)
            .map_err(|e| Self::map_open_error(id, e))?;

        info!(%id, ?path, "deleted segment");
        Ok(())
    }
}
